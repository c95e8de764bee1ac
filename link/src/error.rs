//! Telescope link error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the telescope link
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    #[error("Connection to {addr} failed: {cause}")]
    Connection { addr: String, cause: String },

    #[error("Connection to {addr} timed out after {duration:?}")]
    ConnectTimeout { addr: String, duration: Duration },

    #[error("Not connected to telescope")]
    NotConnected,

    #[error("Command '{method}' timed out after {duration:?}")]
    CommandTimeout { method: String, duration: Duration },

    #[error("Telescope rejected '{method}' with code {code}: {message}")]
    CommandError {
        method: String,
        code: i64,
        message: String,
    },

    #[error("Connection lost after {attempts} reconnection attempts: {last_error}")]
    ConnectionLost { attempts: u32, last_error: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl LinkError {
    /// Whether retrying the same command may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Connection { .. } => true,
            LinkError::ConnectTimeout { .. } => true,
            LinkError::CommandTimeout { .. } => true,
            LinkError::CommandError { code, .. } => *code == crate::protocol::CODE_EQUIPMENT_MOVING,
            LinkError::Io(_) => true,
            LinkError::NotConnected => false,
            LinkError::ConnectionLost { .. } => false,
            LinkError::Protocol(_) => false,
        }
    }

    /// Whether the socket itself failed (as opposed to the command)
    pub fn is_socket_level(&self) -> bool {
        matches!(self, LinkError::Io(_))
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            LinkError::CommandError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::Protocol(err.to_string())
    }
}

pub type LinkResult<T> = Result<T, LinkError>;
