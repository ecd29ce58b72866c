//! Default transport factory.

use async_trait::async_trait;
use mcp_bridge_core::{TargetSpec, Transport, TransportError, TransportFactory, TransportKind};

use crate::{ProcessTransport, SseTransport, WebSocketTransport};

/// Picks the transport variant from the target's scheme and opens it.
///
/// Arguments and environment overlay only apply to process targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn create(&self, spec: &TargetSpec) -> Result<Box<dyn Transport>, TransportError> {
        let kind = spec.kind();
        tracing::debug!(transport = %kind, "Creating transport");

        let transport: Box<dyn Transport> = match kind {
            TransportKind::Process => Box::new(ProcessTransport::spawn(spec).await?),
            TransportKind::Sse => Box::new(SseTransport::connect(&spec.target).await?),
            TransportKind::WebSocket => Box::new(WebSocketTransport::connect(&spec.target).await?),
        };
        Ok(transport)
    }
}
