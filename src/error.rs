//! Error types for simbus.

use std::net::SocketAddr;

use thiserror::Error;

use crate::codec::CodecError;

/// Main error type for all simbus operations.
#[derive(Debug, Error)]
pub enum SimbusError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Listener could not bind/listen at the requested address.
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// The underlying OS error.
        source: std::io::Error,
    },

    /// Write attempted after the connection was closed or errored.
    #[error("connection closed")]
    ConnectionClosed,

    /// Serialization, compression, or frame decoding failure.
    ///
    /// On the inbound path this means the stream is corrupt: frame
    /// boundaries can no longer be trusted and the connection is closed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// `unsubscribe` on a channel with no registered callbacks.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// Protocol violation (empty channel name, zero-length frame, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using SimbusError.
pub type Result<T> = std::result::Result<T, SimbusError>;
