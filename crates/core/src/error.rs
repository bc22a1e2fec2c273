use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("could not resolve target {id}: {reason}")]
    TargetResolution { id: i64, reason: String },
    #[error("probe failed for {path}: {reason}")]
    Probe { path: PathBuf, reason: String },
    #[error("conversion failed for {path}: {reason}")]
    Conversion { path: PathBuf, reason: String },
    #[error("upload failed for {path}: {reason}")]
    Upload { path: PathBuf, reason: String },
}

impl PipelineError {
    /// Only these stop a run; everything else is reported and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::Authentication(_) | PipelineError::TargetResolution { .. }
        )
    }

    pub fn conversion(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::Conversion {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn probe(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::Probe {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn upload(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PipelineError::Upload {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
