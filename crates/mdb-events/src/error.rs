//! Error types for the event pipeline.
//!
//! [`EventsError`] covers failures that affect the viability of the
//! pipeline itself (bad configuration, unreachable transport, unreadable
//! spool). These are returned to whoever owns the emitter lifecycle.
//!
//! [`PublishError`] covers per-event delivery failures. Those never leave
//! the delivery loop: they are logged and the event is counted as lost.

use std::path::PathBuf;

/// Errors that can occur while building, running, or closing the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum EventsError {
    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// The streaming transport could not be connected or set up.
    #[error("transport error: {0}")]
    Transport(String),

    /// The spool file could not be read, decoded, written, or removed.
    #[error("spool error at {}: {message}", .path.display())]
    Spool {
        /// Location of the spool file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A background worker stopped abnormally.
    #[error("worker error: {0}")]
    Worker(String),

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<config::ConfigError> for EventsError {
    fn from(source: config::ConfigError) -> Self {
        Self::Config(source.to_string())
    }
}

/// A single event could not be handed to the transport.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// No acknowledgment arrived within the configured wait.
    #[error("no acknowledgment within {timeout_ms}ms")]
    Timeout {
        /// The acknowledgment wait in milliseconds.
        timeout_ms: u128,
    },

    /// The transport refused or failed the publish.
    #[error("publish rejected: {0}")]
    Rejected(String),

    /// The transport connection has already been released.
    #[error("transport closed")]
    Closed,

    /// The event could not be encoded for the wire.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}
