use thiserror::Error;

/// Failure taxonomy shared by the schedule and attendance core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing or malformed input; nothing was written.
    #[error("{0}")]
    Validation(String),

    /// An identifier resolved to nothing; nothing was written.
    #[error("{0}")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("stored value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Wire code used in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) | Self::Serialization(_) => "db_query_failed",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
