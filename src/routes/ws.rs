use axum::{routing::any, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::call;
use crate::state::AppState;

/// Router for the per-call audio WebSocket.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", any(call::call_handler))
        .layer(TraceLayer::new_for_http())
}
