//! HTTP transport: server-sent events in, POST out.
//!
//! The remote opens with an `endpoint` event naming the URL that outbound
//! messages are POSTed to; every later `message` event carries one JSON-RPC
//! message.

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use mcp_bridge_core::{JsonRpcMessage, Transport, TransportError, TransportKind};
use reqwest::header::ACCEPT;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use url::Url;

const INCOMING_CAPACITY: usize = 64;

type Incoming = Result<JsonRpcMessage, TransportError>;

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Feed a chunk and return every event it completes.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if self.event.is_some() || !self.data.is_empty() {
                    events.push(SseEvent {
                        event: self.event.take(),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = line.split_once(':').map_or((line, ""), |(field, value)| {
                (field, value.strip_prefix(' ').unwrap_or(value))
            });
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Server-sent events transport.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: Url,
    incoming: mpsc::Receiver<Incoming>,
    reader: Option<AbortOnDrop>,
}

impl SseTransport {
    /// Open the event stream at `url` and wait for the endpoint announcement.
    ///
    /// # Errors
    /// Returns error if the URL is invalid, the stream cannot be opened, or
    /// it ends before announcing an endpoint.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let base =
            Url::parse(url).map_err(|e| TransportError::Connect(format!("invalid URL: {e}")))?;
        let client = reqwest::Client::new();

        let response = client
            .get(base.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Connect(format!(
                "event stream returned {}",
                response.status()
            )));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (tx, incoming) = mpsc::channel(INCOMING_CAPACITY);
        let reader = AbortOnDrop(tokio::spawn(read_events(response, base, endpoint_tx, tx)));

        let endpoint = match endpoint_rx.await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(TransportError::Connect(
                    "event stream ended before announcing an endpoint".to_string(),
                ));
            }
        };
        tracing::debug!(endpoint = %endpoint.path(), "SSE endpoint announced");

        Ok(Self {
            client,
            endpoint,
            incoming,
            reader: Some(reader),
        })
    }
}

async fn read_events(
    response: reqwest::Response,
    base: Url,
    endpoint_tx: oneshot::Sender<Result<Url, TransportError>>,
    tx: mpsc::Sender<Incoming>,
) {
    let mut stream = response.bytes_stream();
    let mut parser = SseParser::default();
    let mut endpoint_tx = Some(endpoint_tx);

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(TransportError::Http(e.to_string()))).await;
                return;
            }
        };

        for event in parser.feed(&chunk) {
            match event.event.as_deref() {
                Some("endpoint") => {
                    let announced = base
                        .join(event.data.trim())
                        .map_err(|e| TransportError::Connect(format!("invalid endpoint: {e}")));
                    if let Some(endpoint_tx) = endpoint_tx.take() {
                        let _ = endpoint_tx.send(announced);
                    }
                }
                None | Some("message") => match serde_json::from_str(&event.data) {
                    Ok(message) => {
                        if tx.send(Ok(message)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!("Skipping malformed SSE message: {e}"),
                },
                Some(other) => tracing::debug!(event = other, "Ignoring SSE event"),
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        if self.reader.is_none() {
            return Err(TransportError::Closed);
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(format!("POST returned {status}")));
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>, TransportError> {
        if self.reader.is_none() {
            return Err(TransportError::Closed);
        }
        self.incoming.recv().await.transpose()
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.reader.take();
        self.incoming.close();
        Ok(())
    }
}
