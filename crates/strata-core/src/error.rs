//! Shared error taxonomy. One `thiserror`-derived enum used at every
//! library boundary (`strata-backend`, `libstrata`). Binaries and tests
//! that only propagate errors upward use `anyhow::Result` instead.

use crate::transform::TransformError;
use crate::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    /// A caller-supplied name, key, or argument fails a precondition —
    /// never retryable without changing the call.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// The configured backend could not be reached or opened at all (e.g.
    /// a daemon down, a missing storage root).
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A network-layer failure that a retry, possibly against a different
    /// pooled connection, might resolve.
    #[error("network error: {0}")]
    NetworkTransient(#[source] std::io::Error),

    /// The backend accepted the request but failed to carry it out (e.g.
    /// object not found, disk full).
    #[error("backend operation failed: {0}")]
    BackendOpFailed(String),

    /// Client and server disagree about the wire contract — a corrupt
    /// message, an unexpected reply id, an unsupported message type.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),
}

impl From<WireError> for StrataError {
    fn from(e: WireError) -> Self {
        StrataError::ProtocolMismatch(e.to_string())
    }
}

impl From<TransformError> for StrataError {
    fn from(e: TransformError) -> Self {
        StrataError::BackendOpFailed(e.to_string())
    }
}

impl From<std::io::Error> for StrataError {
    fn from(e: std::io::Error) -> Self {
        StrataError::NetworkTransient(e)
    }
}
