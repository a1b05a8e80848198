use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Upload(String),
    #[error("no task id received")]
    MissingTaskId,
    #[error("status request timed out")]
    PollTimeout,
    #[error("{0}")]
    Poll(String),
    #[error("status snapshot went backwards: {0}")]
    ProtocolViolation(String),
    #[error("server rejected request ({status})")]
    Rejected { status: u16, detail: Option<String> },
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Keychain(#[from] keyring::Error),
}

impl AppError {
    /// Server-provided `detail` message, if the failure carried one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            AppError::Rejected {
                detail: Some(detail),
                ..
            } => Some(detail.as_str()),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            AppError::PollTimeout => true,
            AppError::Http(err) => err.is_timeout(),
            _ => false,
        }
    }
}
