//! Client error types

use std::io;

use codec::ProtocolError;
use thiserror::Error;
use types::PayloadError;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Nothing accepted the TCP connection
    #[error("No message manager responding at {addr}: {source}")]
    ManagerNotFound {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Not connected to a message manager")]
    NotConnected,

    /// The manager closed the connection or the stream broke mid-message
    #[error("Connection to message manager lost")]
    ConnectionLost(#[source] Option<ProtocolError>),

    #[error("No acknowledgement from message manager within {0:?}")]
    AcknowledgementTimeout(std::time::Duration),

    #[error("Invalid destination module id {0}")]
    InvalidDestinationModule(i16),

    #[error("Invalid destination host id {0}")]
    InvalidDestinationHost(i16),

    /// Static ids must be below the dynamic band
    #[error("Module id {0} must be >= 0 and < {1}")]
    InvalidModuleId(i16, i16),

    #[error("Payload of {len} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { len: usize, limit: usize },

    #[error("Invalid module name: {0}")]
    InvalidName(String),

    /// A message did not match the local schema registry
    #[error("Message definitions out of sync: {0}")]
    Desync(#[source] ProtocolError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        if err.is_fatal() {
            ClientError::ConnectionLost(Some(err))
        } else {
            ClientError::Desync(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
