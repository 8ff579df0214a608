//! Error types

use std::io;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the plugin, the producer and the native driver
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected at initialize time
    #[error("{0}")]
    Config(String),

    /// A connection was requested before a successful initialize
    #[error("connection has not been initialized")]
    NotInitialized,

    /// Malformed connection string, or a build with missing host/port
    #[error("invalid connection string: {0}")]
    ConnectionString(String),

    /// Handle creation failed while verifying a fresh configuration
    #[error("error verifying - connection: {0}")]
    VerifyConnection(#[source] Box<Error>),

    /// Liveness probe failed while verifying a fresh configuration
    #[error("error verifying - ping: {0}")]
    VerifyPing(#[source] Box<Error>),

    /// A rendered statement failed; the batch was aborted
    #[error("failed to execute statement: {0}")]
    Execution(#[source] Box<Error>),

    /// Request rejected before any connection was touched
    #[error("{0}")]
    InvalidInput(String),

    /// Password rotation failed
    #[error("failed to change password: {0}")]
    PasswordChange(#[source] Box<Error>),

    /// Username template could not be parsed or rendered
    #[error("{0}")]
    UsernameTemplate(String),

    /// Exception packet returned by the server
    #[error("code: {code}, {name}: {message}")]
    Server {
        /// ClickHouse error code
        code: i32,
        /// Exception class name
        name: String,
        /// Server message
        message: String,
    },

    /// Unexpected or malformed data on the wire
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server closed the socket
    #[error("connection closed")]
    ConnectionClosed,

    /// Illegal connection state transition
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// What the caller expected
        expected: String,
        /// What was observed
        actual: String,
    },

    /// The pool was closed while an operation was pending
    #[error("connection pool is closed")]
    PoolClosed,

    /// A network deadline expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// Socket level failure
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error means the server could not be reached or the session broke
    pub fn is_connectivity(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionClosed | Error::Timeout(_) | Error::PoolClosed => true,
            Error::VerifyConnection(_) | Error::VerifyPing(_) => true,
            Error::Execution(inner) | Error::PasswordChange(inner) => inner.is_connectivity(),
            _ => false,
        }
    }

    /// ClickHouse error code, looking through wrapping variants
    pub fn server_code(&self) -> Option<i32> {
        match self {
            Error::Server { code, .. } => Some(*code),
            Error::Execution(inner)
            | Error::PasswordChange(inner)
            | Error::VerifyConnection(inner)
            | Error::VerifyPing(inner) => inner.server_code(),
            _ => None,
        }
    }

    /// Short stable label for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::UsernameTemplate(_) => "configuration",
            Error::NotInitialized => "not_initialized",
            Error::ConnectionString(_) => "connection_string",
            Error::VerifyConnection(_) | Error::VerifyPing(_) => "connectivity",
            Error::Execution(_) => "execution",
            Error::InvalidInput(_) => "input_validation",
            Error::PasswordChange(inner) => inner.category(),
            Error::Server { .. } => "server",
            Error::Protocol(_) | Error::InvalidState { .. } => "protocol",
            Error::ConnectionClosed | Error::PoolClosed | Error::Timeout(_) | Error::Io(_) => {
                "connectivity"
            }
        }
    }
}
