//! Error types for export operations and the channel facade.

use thiserror::Error;

/// Error returned by an [`Exporter`](crate::exporter::Exporter) implementation
/// or produced internally while driving the retry loop.
#[derive(Debug, Error, Clone)]
pub enum ExportError {
    /// Transport-layer error (network, gRPC, HTTP, file I/O).
    #[error("transport error: {0}")]
    Transport(String),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// All retry attempts exhausted.
    #[error("all retry attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },
    /// Export operation timed out.
    #[error("export operation timed out")]
    Timeout,
    /// Circuit breaker is open (backend unavailable).
    #[error("circuit breaker open: backend unavailable")]
    CircuitOpen,
}

/// Error returned by the public [`Channel`](crate::channel::Channel) facade.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel has been closed and no longer accepts writes.
    #[error("channel is closed")]
    Closed,
    /// The inbound buffer is full and the configured full-mode does not wait.
    #[error("inbound buffer is full")]
    Full,
}
