use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid catalog config at {path}: {message}")]
    CatalogConfigInvalid { path: PathBuf, message: String },

    #[error("no catalog rows with both a name and a link in {0}")]
    NoCatalogRows(PathBuf),

    #[error("invalid settings: {0}")]
    SettingsInvalid(String),

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("render view failed: {0}")]
    Render(String),

    #[error("http session failed: {0}")]
    Http(String),

    #[error("human verification was not completed for {0}")]
    VerificationAborted(String),
}

pub type Result<T> = std::result::Result<T, HarvestError>;
