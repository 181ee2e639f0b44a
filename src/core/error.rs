// src/core/error.rs
//! Typed failures surfaced by the request layer and everything built on it

use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The backend could not be reached after every allowed attempt.
    #[error("backend unreachable after {attempts} attempts: {last_error}")]
    NetworkUnavailable { attempts: u32, last_error: String },

    /// HTTP 401. The caller must re-authenticate; never retried.
    #[error("session expired")]
    SessionExpired,

    #[error("request failed with status {status}: {message}")]
    RequestFailed { status: u16, message: String },

    /// Rejected before any network call was made.
    #[error("validation rejected: {0}")]
    ValidationRejected(String),

    #[error("invalid response body: {0}")]
    InvalidResponse(String),

    #[error("request cancelled by caller")]
    Cancelled,
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationRejected(message.into())
    }

    /// Only connectivity failures are worth retrying from the caller's side.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable { .. })
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RequestFailed { status, .. } => Some(*status),
            Self::SessionExpired => Some(401),
            _ => None,
        }
    }
}
