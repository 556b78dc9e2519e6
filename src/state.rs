//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::credentials;
use crate::core::inference::{BedrockConnector, StreamConnector};

/// State shared by all handlers. Written once at startup, read-only for the
/// lifetime of the process; per-call state lives in each call's `Session`.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub connector: Arc<dyn StreamConnector>,
}

impl AppState {
    /// Resolve credentials once and build the production connector.
    /// Credential failure is logged but not fatal; sessions fail at handshake
    /// until the host has credentials.
    pub async fn new(config: ServerConfig) -> Self {
        let resolved = credentials::resolve_at_startup(&config).await;
        let connector = Arc::new(BedrockConnector::new(
            &config.model_id,
            &config.region,
            resolved,
        ));
        Self { config, connector }
    }

    /// Build state around an arbitrary connector. Used by tests to run calls
    /// against an in-memory stream.
    pub fn with_connector(config: ServerConfig, connector: Arc<dyn StreamConnector>) -> Self {
        Self { config, connector }
    }
}
