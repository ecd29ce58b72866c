//! Scripted in-memory peer for tests.
//!
//! `MockFactory` hands out `MockTransport`s that answer the MCP handshake and
//! every method locally, while counting creations and closes so tests can
//! assert on session lifecycle.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use mcp_bridge_core::{
    JsonRpcMessage, RequestId, RpcError, TargetSpec, Transport, TransportError, TransportFactory,
    TransportKind,
};
use serde_json::{Value, json};

#[derive(Debug, Default)]
struct MockState {
    creates: AtomicUsize,
    closes: AtomicUsize,
    dead_through: AtomicUsize,
    rejected_peer_requests: AtomicUsize,
    fail_create: AtomicBool,
    fail_close: AtomicBool,
    fail_handshake: AtomicBool,
    silent: AtomicBool,
    stalled_send: AtomicBool,
    create_delay: Mutex<Duration>,
    sent: Mutex<Vec<String>>,
}

/// Factory for [`MockTransport`]s sharing one set of counters and switches.
#[derive(Debug, Clone, Default)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Transports created so far, including failed attempts.
    #[must_use]
    pub fn creates(&self) -> usize {
        self.state.creates.load(Ordering::SeqCst)
    }

    /// Close calls observed so far, including failed ones.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Peer requests the session answered with an error.
    #[must_use]
    pub fn rejected_peer_requests(&self) -> usize {
        self.state.rejected_peer_requests.load(Ordering::SeqCst)
    }

    /// Methods sent by sessions, in order.
    #[must_use]
    pub fn sent_methods(&self) -> Vec<String> {
        self.state
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make every transport created so far behave as if its peer exited.
    pub fn kill_existing(&self) {
        let created = self.creates();
        self.state.dead_through.store(created, Ordering::SeqCst);
    }

    pub fn set_create_fails(&self, fail: bool) {
        self.state.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_close_fails(&self, fail: bool) {
        self.state.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn set_handshake_fails(&self, fail: bool) {
        self.state.fail_handshake.store(fail, Ordering::SeqCst);
    }

    /// Stop answering requests; `receive` then waits forever.
    pub fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// Make `send` block forever, like a peer that stopped reading.
    pub fn set_send_stalls(&self, stalls: bool) {
        self.state.stalled_send.store(stalls, Ordering::SeqCst);
    }

    /// Delay every creation, widening the window for concurrent callers.
    pub fn set_create_delay(&self, delay: Duration) {
        *self
            .state
            .create_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = delay;
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create(&self, spec: &TargetSpec) -> Result<Box<dyn Transport>, TransportError> {
        let instance = self.state.creates.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self
            .state
            .create_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::Connect(format!("refused: {}", spec.target)));
        }

        Ok(Box::new(MockTransport {
            state: Arc::clone(&self.state),
            kind: spec.kind(),
            instance,
            outbox: VecDeque::new(),
            closed: false,
        }))
    }
}

/// In-memory transport whose peer answers from a fixed script.
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<MockState>,
    kind: TransportKind,
    instance: usize,
    outbox: VecDeque<JsonRpcMessage>,
    closed: bool,
}

impl MockTransport {
    fn is_dead(&self) -> bool {
        self.closed || self.instance <= self.state.dead_through.load(Ordering::SeqCst)
    }

    fn answer(&mut self, id: RequestId, method: &str, params: Option<Value>) {
        let reply = match method {
            "initialize" if self.state.fail_handshake.load(Ordering::SeqCst) => {
                JsonRpcMessage::error_response(id, rpc_error(-32603, "initialize rejected"))
            }
            "initialize" => JsonRpcMessage::response(
                id,
                json!({
                    "protocolVersion": mcp_bridge_core::jsonrpc::MCP_PROTOCOL_VERSION,
                    "capabilities": { "tools": {}, "resources": { "subscribe": true } },
                    "serverInfo": { "name": "mock", "version": "1.0.0" },
                }),
            ),
            "ping" => JsonRpcMessage::response(id, json!({})),
            "tools/call" => {
                let name = params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match name {
                    // Peer exits without answering.
                    "crash" => return,
                    "fail" => JsonRpcMessage::error_response(id, rpc_error(-32000, "tool failed")),
                    "legacy" => JsonRpcMessage::response(id, json!({ "toolResult": "legacy" })),
                    _ => JsonRpcMessage::response(
                        id,
                        json!({ "content": [{ "type": "text", "text": "ok" }] }),
                    ),
                }
            }
            "resources/read" => {
                self.outbox.push_back(JsonRpcMessage::notification(
                    "notifications/message",
                    Some(json!({ "level": "info", "data": "reading" })),
                ));
                self.outbox.push_back(JsonRpcMessage::request(
                    RequestId::String("peer-1".to_string()),
                    "roots/list",
                    None,
                ));
                JsonRpcMessage::response(
                    id,
                    json!({ "method": method, "params": params, "instance": self.instance }),
                )
            }
            _ => JsonRpcMessage::response(
                id,
                json!({ "method": method, "params": params, "instance": self.instance }),
            ),
        };
        self.outbox.push_back(reply);
    }
}

fn rpc_error(code: i64, message: &str) -> RpcError {
    RpcError {
        code,
        message: message.to_string(),
        data: None,
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.is_dead() {
            return Err(TransportError::Closed);
        }
        if self.state.stalled_send.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        if let Some(method) = &message.method {
            self.state
                .sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(method.clone());
        }

        if message.is_response() && message.error.is_some() {
            self.state
                .rejected_peer_requests
                .fetch_add(1, Ordering::SeqCst);
        }

        if message.is_request() && !self.state.silent.load(Ordering::SeqCst) {
            if let (Some(id), Some(method)) = (message.id.clone(), message.method.as_deref()) {
                self.answer(id, method, message.params.clone());
            }
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>, TransportError> {
        if self.is_dead() {
            return Ok(None);
        }
        if let Some(message) = self.outbox.pop_front() {
            return Ok(Some(message));
        }
        if self.state.silent.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        self.closed = true;
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::Close("mock close failure".to_string()));
        }
        Ok(())
    }
}
