//! Client error types.

use kinetic_protocol::{ProtocolError, StatusCode};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("timed out")]
    Timeout,

    #[error("drive returned {code}: {message}")]
    Status { code: StatusCode, message: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot resolve address: {0}")]
    AddressResolution(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
}

impl ClientError {
    pub(crate) fn status(code: StatusCode, message: impl Into<String>) -> Self {
        ClientError::Status {
            code,
            message: message.into(),
        }
    }

    /// Returns the drive status code, if this is a status error.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns whether the error leaves the transport unusable.
    ///
    /// The connection is closed whenever one of these surfaces.
    pub fn is_connection_fault(&self) -> bool {
        match self {
            ClientError::Io(_)
            | ClientError::Disconnected(_)
            | ClientError::Timeout
            | ClientError::TlsHandshake(_) => true,
            ClientError::Protocol(e) => e.is_stream_fault(),
            _ => false,
        }
    }

    /// Returns whether the request may succeed if retried on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) | ClientError::Timeout | ClientError::Disconnected(_) => true,
            ClientError::Protocol(ProtocolError::Io(_))
            | ClientError::Protocol(ProtocolError::Disconnected(_)) => true,
            ClientError::Status { code, .. } => code.is_retryable(),
            _ => false,
        }
    }
}
