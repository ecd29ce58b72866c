//! Bearer-token gate for bridge calls.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use mcp_bridge_core::BridgeError;
use subtle::ConstantTimeEq;

use crate::{AppState, protocol::ApiError};

/// Reject the request unless it carries the configured bearer token.
///
/// Does nothing when no token is configured.
///
/// # Errors
/// `Unauthorized` for a missing or non-Bearer header, `Forbidden` for a
/// wrong token.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.auth_token.as_deref() {
        check_bearer(request.headers(), expected)?;
    }
    Ok(next.run(request).await)
}

fn check_bearer(headers: &HeaderMap, expected: &str) -> Result<(), BridgeError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| BridgeError::Unauthorized("missing Authorization header".to_string()))?;
    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| BridgeError::Unauthorized("expected a Bearer token".to_string()))?;

    if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(BridgeError::Forbidden("invalid token".to_string()))
    }
}
