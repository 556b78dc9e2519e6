//! Session-level error taxonomy.
//!
//! Everything here is fatal to the call's session: the bridge loop reacts to
//! any of these by tearing the session down. Recoverable conditions (a failed
//! forward of one outbound audio chunk, errors during the shutdown sequence)
//! are logged where they occur and never surface as a `BridgeError`.

use thiserror::Error;

use crate::core::inference::StreamError;

/// Errors that terminate a bridging session.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A handshake step failed; the session never became active.
    #[error("handshake failed: {0}")]
    Handshake(#[source] StreamError),

    /// Sending an audio chunk on the active stream failed. The session is
    /// already marked inactive when this is returned.
    #[error("audio send failed: {0}")]
    Send(#[source] StreamError),

    /// The draining task's read from the inference stream failed.
    #[error("stream receive failed: {0}")]
    Receive(#[source] StreamError),
}

/// Result type for session operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
