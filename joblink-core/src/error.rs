//! Error types for the relay core

use thiserror::Error;

/// Relay error types
#[derive(Debug, Error)]
pub enum Error {
    /// The upstream endpoint could not be reached. Fatal to startup; the
    /// orchestrator never retries a failed dial.
    #[error("failed to dial upstream {addr}: {reason}")]
    Dial { addr: String, reason: String },

    /// The upstream rejected the passphrase. Never retried automatically.
    #[error("upstream {addr} rejected the stream request: {reason}")]
    Auth { addr: String, reason: String },

    /// The upstream stream kept failing past the retry budget.
    #[error("upstream unavailable after {attempts} receive attempts")]
    Unavailable { attempts: u32 },

    /// The listen address could not be bound. Fatal to startup.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The serving endpoint failed after it was bound.
    #[error("job stream endpoint failed: {0}")]
    Serve(#[source] tonic::transport::Error),

    /// The processing component reported a failure from `start` or
    /// `register`; fatal to the node.
    #[error("engine error: {0}")]
    Engine(#[from] anyhow::Error),
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, Error>;
