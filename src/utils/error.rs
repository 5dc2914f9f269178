//! The `error` module defines the error types used within `inkrelay`.
//!
//! Connection failures are classified into a fixed taxonomy so callers can
//! tell configuration mistakes and authorization failures (never retried)
//! apart from transport trouble.

use std::io;

use thiserror::Error;

use crate::transport::message::DisconnectReason;

/// Failure of a single connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("server unreachable: {0}")]
    Unreachable(String),
    #[error("communication failure: {0}")]
    Communication(String),
    #[error("connection timed out")]
    Timeout,
    #[error("bad username or password")]
    BadCredentials,
    #[error("connection failed: {0}")]
    Other(String),
}

/// Errors raised by a pub/sub transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("unreachable: {0}")]
    Unreachable(String),
    #[error("timed out")]
    Timeout,
    #[error("connection rejected: {0}")]
    Rejected(DisconnectReason),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("not connected")]
    NotConnected,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("control topic '{0}' cannot be unsubscribed")]
    ControlTopic(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("publish to '{topic}' rejected: '{payload}' is not a known topic or session")]
    ForgedControlWrite { topic: String, payload: String },
    #[error("no session registered with id {0}")]
    UnknownSession(String),
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unreachable(detail) => ConnectError::Unreachable(detail),
            TransportError::Timeout => ConnectError::Timeout,
            TransportError::Rejected(DisconnectReason::BadCredentials) => {
                ConnectError::BadCredentials
            }
            TransportError::Rejected(reason) => ConnectError::Other(reason.to_string()),
            TransportError::Protocol(detail) => ConnectError::Communication(detail),
            TransportError::InvalidAddress(detail) => ConnectError::InvalidConfiguration(detail),
            TransportError::NotConnected => ConnectError::Communication("not connected".to_string()),
        }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(io_err) if is_unreachable(&io_err) => {
                TransportError::Unreachable(io_err.to_string())
            }
            tungstenite::Error::Io(io_err) if io_err.kind() == io::ErrorKind::TimedOut => {
                TransportError::Timeout
            }
            tungstenite::Error::Url(url_err) => TransportError::InvalidAddress(url_err.to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

fn is_unreachable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::NotFound
    )
}
