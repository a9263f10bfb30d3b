use std::fmt::Display;

use thiserror::Error;

/// Classifier attached to every failed attempt. The string forms are the ones
/// that show up in log records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureStatus {
    Timeout,
    Error,
    Abort,
    ParserError,
    Other(String),
}
impl FailureStatus {
    pub fn as_str(&self) -> &str {
        match self {
            FailureStatus::Timeout => "timeout",
            FailureStatus::Error => "error",
            FailureStatus::Abort => "abort",
            FailureStatus::ParserError => "parsererror",
            FailureStatus::Other(s) => s.as_str(),
        }
    }
    /// Only transport level hiccups are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureStatus::Timeout | FailureStatus::Error)
    }
}
impl Display for FailureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    NetworkTimeout(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("request aborted: {0}")]
    Aborted(String),
    #[error("invalid data received: {0}")]
    InvalidData(String),
    #[error("{status}: {message}")]
    Unknown { message: String, status: String },
}
impl FetchError {
    pub fn status(&self) -> FailureStatus {
        match self {
            FetchError::NetworkTimeout(_) => FailureStatus::Timeout,
            FetchError::NetworkError(_) => FailureStatus::Error,
            FetchError::Aborted(_) => FailureStatus::Abort,
            FetchError::InvalidData(_) => FailureStatus::ParserError,
            FetchError::Unknown { status, .. } => FailureStatus::Other(status.clone()),
        }
    }
    pub fn message(&self) -> &str {
        match self {
            FetchError::NetworkTimeout(m)
            | FetchError::NetworkError(m)
            | FetchError::Aborted(m)
            | FetchError::InvalidData(m) => m,
            FetchError::Unknown { message, .. } => message,
        }
    }
}
