use axum::http::StatusCode;
use thiserror::Error;

use matrix_domain::UtilityStatus;

pub type Result<T> = std::result::Result<T, MatrixError>;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("Username already in use")]
    UsernameTaken,

    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("Missing required contact field: {0}")]
    MissingContactField(&'static str),

    #[error("Matrix depth limit reached")]
    DepthLimitReached,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Member not found")]
    MemberNotFound,

    #[error("Utility not found")]
    UtilityNotFound,

    #[error("Utility status change {from:?} -> {to:?} is not allowed")]
    InvalidStatusTransition {
        from: UtilityStatus,
        to: UtilityStatus,
    },

    #[error("Not authorized to perform this change")]
    NotAuthorized,

    #[error("Remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Local storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MatrixError {
    /// HTTP status for the wire surface.
    pub fn to_status(&self) -> StatusCode {
        match self {
            MatrixError::UsernameTaken => StatusCode::CONFLICT,
            MatrixError::InvalidUsername(_)
            | MatrixError::InvalidEmail(_)
            | MatrixError::InvalidPhone(_)
            | MatrixError::MissingContactField(_)
            | MatrixError::DepthLimitReached
            | MatrixError::InvalidStatusTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            MatrixError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            MatrixError::NotAuthorized => StatusCode::FORBIDDEN,
            MatrixError::MemberNotFound | MatrixError::UtilityNotFound => StatusCode::NOT_FOUND,
            MatrixError::RemoteUnavailable(_) => StatusCode::BAD_GATEWAY,
            // Don't leak local paths or serialization details
            MatrixError::Storage(_) | MatrixError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sheet_store::SheetStoreError> for MatrixError {
    fn from(err: sheet_store::SheetStoreError) -> Self {
        MatrixError::RemoteUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for MatrixError {
    fn from(err: std::io::Error) -> Self {
        tracing::error!("Snapshot I/O error: {}", err);
        MatrixError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for MatrixError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("Snapshot serialization error: {}", err);
        MatrixError::Storage(err.to_string())
    }
}
