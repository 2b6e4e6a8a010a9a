// src/core/warden/errors.rs

//! The error taxonomy for the Warden supervisor, mirroring the categories in
//! the design spec: transient network, protocol violation, staleness,
//! logical conflict, quorum/election failure, and fatal (persistence).

use std::sync::Arc;
use thiserror::Error;

/// All possible failures within the Warden supervisor.
#[derive(Error, Debug, Clone)]
pub enum WardenError {
    /// A socket connect/read/write failure or timeout. Recovered by
    /// disconnecting the channel and retrying on a later tick.
    #[error("network error talking to {addr}: {source}")]
    Network {
        addr: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("timed out waiting for a reply from {0}")]
    Timeout(String),

    /// A reply that doesn't match the expected shape. Recovered by
    /// discarding the reply; repeated violations should trigger a reconnect.
    #[error("protocol violation from {addr}: {detail}")]
    ProtocolViolation { addr: String, detail: String },

    /// Cached data (INFO, hello) is older than its validity window.
    #[error("stale data for {0}, dependent judgements cleared")]
    Stale(String),

    /// Two peers claim the same identity, or a role contradiction was seen.
    #[error("logical conflict: {0}")]
    LogicalConflict(String),

    /// Could not reach quorum or an election attempt timed out.
    #[error("quorum/election failure for master '{0}': {1}")]
    ElectionFailed(String, String),

    /// A value in the bootstrap or persisted configuration is invalid.
    #[error("invalid warden configuration: {0}")]
    InvalidConfig(String),

    /// The config file could not be written or fsynced. This is a
    /// correctness invariant violation, not a recoverable condition: votes
    /// and epochs must be durable before they are externalized.
    #[error("fatal: config persistence failed: {0}")]
    PersistenceFailed(String),
}

impl From<std::io::Error> for WardenError {
    fn from(e: std::io::Error) -> Self {
        WardenError::Network {
            addr: "<unknown>".to_string(),
            source: Arc::new(e),
        }
    }
}

pub type WardenResult<T> = Result<T, WardenError>;
