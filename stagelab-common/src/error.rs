//! Common error types for stagelab

use thiserror::Error;

/// Common result type for stagelab operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the stagelab crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A remote collaborator rejected or failed a request
    #[error("{service} error: {message}")]
    Remote {
        /// Collaborator name ("storage", "jobs", "persistence", "assist")
        service: &'static str,
        message: String,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a [`Error::Remote`] error
    pub fn remote(service: &'static str, message: impl Into<String>) -> Self {
        Error::Remote {
            service,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display_names_service() {
        let err = Error::remote("storage", "503 Service Unavailable");
        assert_eq!(err.to_string(), "storage error: 503 Service Unavailable");
    }

    #[test]
    fn test_io_error_converts() {
        fn open_missing() -> Result<()> {
            std::fs::File::open("/definitely/not/here.jpg")?;
            Ok(())
        }
        assert!(matches!(open_missing(), Err(Error::Io(_))));
    }
}
