//! Error types for feedmail.

use thiserror::Error;

use crate::feed::FetchError;

/// Common error type for feedmail.
#[derive(Error, Debug)]
pub enum FeedmailError {
    /// Database error.
    ///
    /// Errors from sqlx are converted into this variant.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (unreadable, unparsable or incomplete settings).
    #[error("configuration error: {0}")]
    Config(String),

    /// Feed could not be fetched or parsed.
    #[error("feed error: {0}")]
    Fetch(#[from] FetchError),

    /// Email could not be built or delivered.
    #[error("mail error: {0}")]
    Mail(String),

    /// Validation error for input values.
    #[error("validation error: {0}")]
    Validation(String),
}

impl From<sqlx::Error> for FeedmailError {
    fn from(e: sqlx::Error) -> Self {
        FeedmailError::Database(e.to_string())
    }
}

/// Result type alias for feedmail operations.
pub type Result<T> = std::result::Result<T, FeedmailError>;
