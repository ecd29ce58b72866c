//! Child process transport over piped stdio.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use mcp_bridge_core::{JsonRpcMessage, TargetSpec, Transport, TransportError, TransportKind};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{ChildStderr, ChildStdin, ChildStdout, Command},
    task::JoinHandle,
};

use crate::command::CommandBuilder;

/// How long a child gets to exit after its stdin is closed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Newline-delimited JSON-RPC over a child's stdin/stdout.
///
/// The child runs in its own process group so that closing the transport
/// also reaps anything it spawned.
pub struct ProcessTransport {
    program: String,
    child: Option<AsyncGroupChild>,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    /// Bytes of a line not yet terminated; kept when a read is cancelled.
    buffer: Vec<u8>,
    stderr_task: Option<JoinHandle<()>>,
}

impl ProcessTransport {
    /// Spawn the process described by `spec`.
    ///
    /// The child inherits the bridge's environment with `spec.env` laid on
    /// top, so overlay values win on conflict.
    ///
    /// # Errors
    /// Returns error if the command is invalid, the executable cannot be
    /// found, or the spawn fails.
    pub async fn spawn(spec: &TargetSpec) -> Result<Self, TransportError> {
        let parts = CommandBuilder::new(spec.target.as_str())
            .params(spec.args.iter().cloned())
            .build()?;
        let program = parts.program.clone();
        let (executable, args) = parts.into_resolved().await?;

        let mut command = Command::new(&executable);
        command
            .args(&args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .group_spawn()
            .map_err(|e| TransportError::Connect(format!("failed to spawn {program}: {e}")))?;

        let stdin = child.inner().stdin.take();
        let stdout = child.inner().stdout.take();
        let stderr = child.inner().stderr.take();

        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            if let Err(e) = child.kill().await {
                tracing::warn!(program = %program, "Failed to kill child without stdio: {e}");
            }
            return Err(TransportError::Connect(format!(
                "stdio of {program} was not captured"
            )));
        };

        let stderr_task =
            stderr.map(|stderr| tokio::spawn(forward_stderr(program.clone(), stderr)));

        tracing::debug!(program = %program, pid = ?child.id(), "Spawned process transport");

        Ok(Self {
            program,
            child: Some(child),
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            buffer: Vec::new(),
            stderr_task,
        })
    }
}

async fn forward_stderr(program: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(program = %program, "stderr: {line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(program = %program, "stderr read failed: {e}");
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for ProcessTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Process
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let stdin = self.stdin.as_mut().ok_or(TransportError::Closed)?;
        let json = serde_json::to_string(message)?;

        let written = async {
            stdin.write_all(json.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;

        written.map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe => TransportError::Closed,
            _ => TransportError::Io(e),
        })
    }

    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>, TransportError> {
        if self.child.is_none() {
            return Err(TransportError::Closed);
        }

        loop {
            // `read_until` appends, so a cancelled call leaves its partial line
            // in the buffer for the next one.
            let read = self.stdout.read_until(b'\n', &mut self.buffer).await?;
            if read == 0 && self.buffer.is_empty() {
                return Ok(None);
            }

            let line = std::mem::take(&mut self.buffer);
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_slice::<JsonRpcMessage>(line) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    tracing::warn!(program = %self.program, "Skipping non JSON-RPC stdout line: {e}");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        // EOF on stdin is the polite shutdown request.
        drop(self.stdin.take());

        let result = match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(program = %self.program, %status, "Process exited");
                Ok(())
            }
            Ok(Err(e)) => Err(TransportError::Close(format!("wait failed: {e}"))),
            Err(_) => {
                tracing::debug!(program = %self.program, "Process ignored stdin EOF, killing group");
                child
                    .kill()
                    .await
                    .map_err(|e| TransportError::Close(format!("kill failed: {e}")))
            }
        };

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        result
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::warn!(program = %self.program, "Process transport dropped without close, killing group");
            let _ = child.start_kill();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use mcp_bridge_core::RequestId;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_round_trip_through_cat() {
        let mut transport = ProcessTransport::spawn(&TargetSpec::new("cat")).await.unwrap();
        let request = JsonRpcMessage::request(RequestId::Number(1), "ping", Some(json!({})));

        transport.send(&request).await.unwrap();
        let echoed = transport.receive().await.unwrap().unwrap();
        assert_eq!(echoed, request);

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_env_overlay_reaches_child() {
        let script = concat!(
            r#"printf '{"jsonrpc":"2.0","method":"env","params":{"value":"%s"}}\n' "#,
            r#""$BRIDGE_TEST_VALUE""#,
        );
        let spec = TargetSpec::new("sh")
            .with_args(["-c", script])
            .with_env("BRIDGE_TEST_VALUE", "overlay");
        let mut transport = ProcessTransport::spawn(&spec).await.unwrap();

        let message = transport.receive().await.unwrap().unwrap();
        assert_eq!(message.params, Some(json!({"value": "overlay"})));
        assert!(transport.receive().await.unwrap().is_none());

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_skips_noise_on_stdout() {
        let script = r#"echo 'starting up'; echo '{"jsonrpc":"2.0","id":1,"result":{}}'"#;
        let spec = TargetSpec::new("sh").with_args(["-c", script]);
        let mut transport = ProcessTransport::spawn(&spec).await.unwrap();

        let message = transport.receive().await.unwrap().unwrap();
        assert!(message.is_response());

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_receive_keeps_partial_line() {
        let script = r#"printf '{"jsonrpc":"2.0",'; sleep 1; printf '"id":7,"result":{}}\n'"#;
        let spec = TargetSpec::new("sh").with_args(["-c", script]);
        let mut transport = ProcessTransport::spawn(&spec).await.unwrap();

        let first = tokio::time::timeout(Duration::from_millis(300), transport.receive()).await;
        tokio_test::assert_err!(first);

        let message = transport.receive().await.unwrap().unwrap();
        assert_eq!(message.id, Some(RequestId::Number(7)));
        assert!(transport.receive().await.unwrap().is_none());

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_kills_stubborn_children() {
        let spec = TargetSpec::new("sh").with_args(["-c", "trap '' TERM; sleep 30"]);
        let mut transport = ProcessTransport::spawn(&spec).await.unwrap();

        tokio_test::assert_ok!(transport.close().await);
        tokio_test::assert_ok!(transport.close().await);
        assert!(matches!(
            transport.send(&JsonRpcMessage::notification("x", None)).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_reported() {
        let result = ProcessTransport::spawn(&TargetSpec::new("no-such-mcp-server-9999")).await;
        assert!(matches!(result, Err(TransportError::ExecutableNotFound(_))));
    }
}
