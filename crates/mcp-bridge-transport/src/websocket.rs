//! WebSocket transport.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use mcp_bridge_core::{JsonRpcMessage, Transport, TransportError, TransportKind};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Error as WsError, Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL},
    },
};

/// Subprotocol MCP servers expect on the upgrade request.
const SUBPROTOCOL: &str = "mcp";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One JSON-RPC message per text (or binary) frame.
pub struct WebSocketTransport {
    stream: Option<WsStream>,
}

impl WebSocketTransport {
    /// Connect to `url`.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the upgrade fails.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid URL: {e}")))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket connected");

        Ok(Self {
            stream: Some(stream),
        })
    }
}

fn ws_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::WebSocket(other.to_string()),
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn send(&mut self, message: &JsonRpcMessage) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let json = serde_json::to_string(message)?;
        stream.send(Message::Text(json.into())).await.map_err(ws_error)
    }

    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        loop {
            let frame = match stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(ws_error(e)),
                Some(Ok(frame)) => frame,
            };

            let decoded: Result<JsonRpcMessage, _> = match frame {
                Message::Text(text) => serde_json::from_str(text.as_str()),
                Message::Binary(data) => serde_json::from_slice(&data),
                Message::Close(_) => return Ok(None),
                _ => continue,
            };
            match decoded {
                Ok(message) => return Ok(Some(message)),
                Err(e) => tracing::warn!("Skipping non JSON-RPC WebSocket frame: {e}"),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };

        match stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Close(e.to_string())),
        }
    }
}
