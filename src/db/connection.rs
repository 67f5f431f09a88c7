// Connection Errors
// Failures raised while establishing or using a physical connection

use thiserror::Error;

/// Connection errors
///
/// Driver failures are carried through unchanged in meaning; this layer does
/// not retry or reinterpret them.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid connect string: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Password expired. Please change your password using another tool properly.")]
    PasswordExpired,

    #[error("Connection is closed")]
    Closed,

    #[error("Timeout error")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tiberius::error::Error> for ConnectionError {
    fn from(err: tiberius::error::Error) -> Self {
        // Check for password expired error (usually 18488)
        if let tiberius::error::Error::Server(e) = &err {
            if e.code() == 18488 {
                return ConnectionError::PasswordExpired;
            }
            // Login failed for user
            if e.code() == 18456 {
                return ConnectionError::AuthenticationFailed(e.message().to_string());
            }
        }
        ConnectionError::ConnectionFailed(err.to_string())
    }
}

impl From<tokio_postgres::Error> for ConnectionError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            // SQLSTATE class 28: invalid authorization specification
            if db_err.code().code().starts_with("28") {
                return ConnectionError::AuthenticationFailed(db_err.message().to_string());
            }
        }
        ConnectionError::ConnectionFailed(err.to_string())
    }
}

impl From<rusqlite::Error> for ConnectionError {
    fn from(err: rusqlite::Error) -> Self {
        ConnectionError::ConnectionFailed(err.to_string())
    }
}
