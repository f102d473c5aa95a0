use thiserror::Error;

pub type SheetStoreResult<T> = std::result::Result<T, SheetStoreError>;

/// Failure taxonomy for the remote store boundary.
///
/// Every variant is non-fatal to the core: callers fall back to the local
/// snapshot and flag the system as degraded.
#[derive(Debug, Error)]
pub enum SheetStoreError {
    /// The request exceeded the configured hard timeout. Treated exactly
    /// like a transport failure by callers.
    #[error("Remote store timed out")]
    Timeout,

    /// Connection-level failure (DNS, TLS, reset, ...).
    #[error("Remote store unreachable: {0}")]
    Transport(String),

    /// The endpoint answered with something that is not the expected JSON
    /// shape (HTML error page, truncated body, non-array user list, ...).
    #[error("Remote store returned an unrecognized response: {0}")]
    Malformed(String),

    /// The backing script executed and reported its own error.
    #[error("Remote store script error: {0}")]
    Script(String),

    /// No endpoint URL is configured; remote persistence is disabled.
    #[error("Remote store endpoint not configured")]
    NotConfigured,
}

impl From<reqwest::Error> for SheetStoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SheetStoreError::Timeout
        } else if err.is_decode() {
            SheetStoreError::Malformed(err.to_string())
        } else {
            SheetStoreError::Transport(err.to_string())
        }
    }
}
