//! Response bodies of the HTTP surface.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mcp_bridge_core::{BridgeError, RpcError};
use serde::{Deserialize, Serialize};

/// Body of every failed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
    /// The peer's JSON-RPC error, for remote failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_error: Option<RpcError>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
}

impl HealthStatus {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// A [`BridgeError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl ApiError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            BridgeError::MalformedRequest(_) | BridgeError::Unsupported(_) => {
                StatusCode::BAD_REQUEST
            }
            BridgeError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BridgeError::Forbidden(_) => StatusCode::FORBIDDEN,
            BridgeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::Connect(_)
            | BridgeError::Handshake(_)
            | BridgeError::Transport(_)
            | BridgeError::Remote(_)
            | BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        let rpc_error = match &self.0 {
            BridgeError::Remote(rpc) => Some(rpc.clone()),
            _ => None,
        };
        ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind().to_string(),
            rpc_error,
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(BridgeError::MalformedRequest(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(kind = self.0.kind(), "Call failed: {}", self.0);
        }
        (status, Json(self.body())).into_response()
    }
}
