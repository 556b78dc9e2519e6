//! Abstraction over the inference service's bidirectional event stream.
//!
//! A session never talks to the AWS SDK directly; it opens a stream through a
//! [`StreamConnector`] and gets back the two halves separately, so the send
//! half can live with the session while the receive half moves into the
//! draining task. Tests swap in an in-memory connector behind the same seam.

pub mod bedrock;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::session::events::{ClientEvent, ServerEvent};

pub use bedrock::BedrockConnector;

/// Errors at the stream seam. The session layer maps these onto its own
/// taxonomy; which variant occurred only matters for logging.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to open bidirectional stream: {0}")]
    ConnectFailed(String),

    #[error("stream send failed: {0}")]
    SendFailed(String),

    #[error("stream receive failed: {0}")]
    ReceiveFailed(String),

    #[error("malformed stream frame: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The outbound half of a bidirectional stream.
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: ClientEvent) -> Result<(), StreamError>;

    /// Close the outbound half. The service sees end-of-input; the receive
    /// half keeps draining whatever is still in flight.
    async fn close(&mut self) -> Result<(), StreamError>;
}

/// The inbound half of a bidirectional stream.
#[async_trait]
pub trait EventSource: Send {
    /// Next event from the service. `Ok(None)` means the service closed its
    /// half of the stream.
    async fn recv(&mut self) -> Result<Option<ServerEvent>, StreamError>;
}

/// Opens bidirectional streams. One connector is shared by all calls; each
/// `connect` yields a fresh stream owned by exactly one session.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn EventSink>, Box<dyn EventSource>), StreamError>;
}
