use thiserror::Error;

use crate::sync::SyncError;

#[derive(Error, Debug)]
pub enum StashError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Saved item not found: {0}")]
    ItemNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("{0}")]
    Other(String),
}

impl StashError {
    /// True when the error only signals that work was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, StashError::Sync(SyncError::Canceled))
    }
}

pub type Result<T> = std::result::Result<T, StashError>;
