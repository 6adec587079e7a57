//! Protocol-level errors for framing and control-message decoding
//!
//! Connection loss is kept distinct from desync: the former ends the peer, the
//! latter concerns a single message whose framing was still intact.

use std::io;

use thiserror::Error;
use types::PayloadError;

/// Framing and schema errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Peer closed the stream or the stream failed mid-message
    #[error("Connection lost: {0}")]
    ConnectionLost(#[source] io::Error),

    /// Any other I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Declared payload size disagrees with the registered schema
    #[error("Size mismatch for message type {msg_type}: expected {expected} bytes, got {got}")]
    SizeMismatch {
        msg_type: i32,
        expected: usize,
        got: usize,
    },

    /// Non-zero schema hash disagrees with the registered schema
    #[error("Version mismatch for message type {msg_type}: expected hash {expected:#010x}, got {got:#010x}")]
    VersionMismatch { msg_type: i32, expected: i32, got: i32 },

    /// Declared payload exceeds the framing limit
    #[error("Payload too large: message type {msg_type} declares {declared} bytes, limit {limit}")]
    PayloadTooLarge {
        msg_type: i32,
        declared: usize,
        limit: usize,
    },

    /// Negative payload length, the stream can no longer be framed
    #[error("Invalid payload length {declared} for message type {msg_type}")]
    InvalidLength { msg_type: i32, declared: i32 },

    /// Module name empty or wider than the fixed name field
    #[error("Invalid module name: {0}")]
    InvalidName(String),
}

impl ProtocolError {
    /// True if the error ends the connection rather than a single message
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionLost(_)
                | ProtocolError::Io(_)
                | ProtocolError::PayloadTooLarge { .. }
                | ProtocolError::InvalidLength { .. }
        )
    }

    /// Classify an I/O error raised while reading or writing a frame
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ProtocolError::ConnectionLost(err),
            _ => ProtocolError::Io(err),
        }
    }

    pub(crate) fn from_payload(msg_type: i32, err: PayloadError) -> Self {
        match err {
            PayloadError::SizeMismatch { expected, got, .. } => ProtocolError::SizeMismatch {
                msg_type,
                expected,
                got,
            },
            PayloadError::TextTooLong { .. } => ProtocolError::InvalidName(err.to_string()),
        }
    }
}

/// Result type for codec operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
