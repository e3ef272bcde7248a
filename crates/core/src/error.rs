use thiserror::Error;

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type for sqlpush
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Logging error: {message}")]
    Logging { message: String },
}

impl CoreError {
    /// Create a new logging error
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }
}
