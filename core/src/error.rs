use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    // Structural errors
    #[error("corpus root not found: {}", path.display())]
    CorpusRootMissing { path: PathBuf },

    #[error("descriptor store not found: {}", path.display())]
    StoreMissing { path: PathBuf },

    // Query errors
    #[error("no usable features in query image: {reason}")]
    NoFeatures { reason: String },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // Storage errors
    #[error("record error: {0}")]
    Record(#[from] crate::record::RecordError),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // Config errors
    #[error("config error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for SearchError {
    fn from(e: toml::de::Error) -> Self {
        SearchError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;

impl SearchError {
    pub fn status_code(&self) -> u16 {
        match self {
            SearchError::NoFeatures { .. } | SearchError::Image(_) => 422,

            SearchError::DimensionMismatch { .. } | SearchError::Config(_) => 400,

            SearchError::CorpusRootMissing { .. } | SearchError::StoreMissing { .. } => 404,

            _ => 500,
        }
    }
}
