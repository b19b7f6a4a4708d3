use thiserror::Error;

pub type FeedResult<T> = std::result::Result<T, FeedError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("backend request failed: {0}")]
    Backend(String),
    #[error("{0} was not found")]
    NotFound(String),
    #[error("sign up to save, report, or like posts")]
    GuestAction,
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    LocationUnavailable(String),
    #[error("location request timed out, check your connection and try again")]
    LocationTimeout,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl FeedError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        FeedError::Backend(err.to_string())
    }

    /// Cancellation is never shown to the user.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FeedError::Cancelled)
    }

    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            FeedError::GuestAction
                | FeedError::PermissionDenied(_)
                | FeedError::LocationUnavailable(_)
                | FeedError::LocationTimeout
        )
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Backend(format!("decode: {err}"))
    }
}
