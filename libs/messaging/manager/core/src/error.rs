//! # Broker Error Types
//!
//! Only startup failures (configuration, bind) are fatal. Everything raised while
//! serving a connection is handled inside the event loop and turned into removal,
//! a `FAILED_MESSAGE` or an `MM_LOG` record.

use codec::ProtocolError;
use thiserror::Error;

/// Broker operation errors
#[derive(Error, Debug)]
pub enum ManagerError {
    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listening socket could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Framing or control-payload error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// IO errors from tokio operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Every id in the dynamic band is held by a connected module
    #[error("All dynamic module ids in [{start}, {end}) are in use")]
    IdentityExhausted { start: i16, end: i16 },
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, ManagerError>;
