//! HTTP routes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    middleware,
    routing::{get, post},
};
use mcp_bridge_core::BridgeError;
use mcp_bridge_session::CallEnvelope;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    AppState,
    auth::require_bearer,
    protocol::{ApiError, HealthStatus},
};

/// Build the application router.
///
/// `/bridge` sits behind the bearer gate; `/health` never does.
pub fn router(state: AppState) -> Router {
    let bridge = Router::new()
        .route("/bridge", post(bridge))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .merge(bridge)
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health() -> Json<HealthStatus> {
    Json(HealthStatus::ok())
}

async fn bridge(
    State(state): State<AppState>,
    payload: Result<Json<CallEnvelope>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(envelope) = payload?;
    let dispatcher = Arc::clone(&state.dispatcher);

    // Run detached so a client hang-up does not cancel the remote call.
    let task = tokio::spawn(async move { dispatcher.handle(envelope).await });
    match task.await {
        Ok(result) => Ok(Json(result?)),
        Err(e) => {
            tracing::error!("Dispatch task failed: {e}");
            Err(BridgeError::Internal("dispatch task failed".to_string()).into())
        }
    }
}
