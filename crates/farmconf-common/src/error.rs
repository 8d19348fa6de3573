//! Error types for farmconf.

use thiserror::Error;

/// Result type alias for farmconf operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for farmconf.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Network errors
    #[error("Network error: {0}")]
    Network(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A consumer application could not be reached or refused a call
    #[error("Discovery error for {app}: {message}")]
    Discovery { app: String, message: String },

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a discovery failure against `app`.
    pub fn discovery(app: impl Into<String>, message: impl ToString) -> Self {
        Error::Discovery {
            app: app.into(),
            message: message.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
