use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid run configuration: {0}")]
    InvalidSpec(String),

    #[error("data file not found: {}", .0.display())]
    DataNotFound(PathBuf),

    #[error("no valid training records in {}", .0.display())]
    EmptyDataset(PathBuf),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("unsupported by backend: {0}")]
    Unsupported(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
