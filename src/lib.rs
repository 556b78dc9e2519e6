pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use core::*;
pub use errors::bridge_error::{BridgeError, BridgeResult};
pub use state::AppState;

use axum::Router;
use std::sync::Arc;

/// Assemble the full application router around shared state.
pub fn app(state: AppState) -> Router {
    routes::api::create_api_router()
        .merge(routes::ws::create_ws_router())
        .with_state(Arc::new(state))
}
