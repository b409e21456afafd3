//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all framing failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame payload exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The stream ended before a complete frame could be read or written.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Any other transport I/O failure.
    #[error("I/O error: {0}")]
    Io(std::io::Error),
}

impl ProtocolError {
    /// Returns true if the error means the peer went away (clean or truncated
    /// close) rather than an abnormal transport failure.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ProtocolError::ConnectionClosed(_))
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => ProtocolError::ConnectionClosed(err.to_string()),
            _ => ProtocolError::Io(err),
        }
    }
}
