use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

/// Main error type for the executor and its collaborators
#[derive(Error, Debug)]
pub enum ExecutorError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration value for `{key}`: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("Unknown evaluator type: {0}")]
    UnknownEvaluator(String),

    #[error("Unknown metric `{metric}` for {evaluator}")]
    UnknownMetric {
        evaluator: &'static str,
        metric: String,
    },

    #[error("Device `{0}` is not available for this backend")]
    UnsupportedDevice(String),

    // Computation errors
    #[error("Computation error: {0}")]
    Computation(String),

    #[error("{evaluator} cannot collect `{kind}` outputs")]
    UnsupportedOutput {
        evaluator: &'static str,
        kind: &'static str,
    },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Gradient tracking is disabled in the current scope")]
    GradientsDisabled,

    // Degenerate input errors
    #[error("No batches processed in epoch {epoch}")]
    NoBatches { epoch: usize },

    #[error("{evaluator} has no collected outputs")]
    NothingCollected { evaluator: &'static str },

    // Persistence errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(RecorderError),

    #[error("No checkpoint in {}", dir.display())]
    NoCheckpoint { dir: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for ExecutorError
pub type Result<T> = std::result::Result<T, ExecutorError>;

impl From<RecorderError> for ExecutorError {
    fn from(err: RecorderError) -> Self {
        ExecutorError::Checkpoint(err)
    }
}

impl From<ndarray::ShapeError> for ExecutorError {
    fn from(err: ndarray::ShapeError) -> Self {
        ExecutorError::ShapeMismatch(err.to_string())
    }
}

impl ExecutorError {
    /// Whether the error was raised by configuration lookup or validation
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ExecutorError::Config(_)
                | ExecutorError::InvalidConfig { .. }
                | ExecutorError::UnknownEvaluator(_)
                | ExecutorError::UnknownMetric { .. }
                | ExecutorError::UnsupportedDevice(_)
        )
    }

    pub(crate) fn invalid_config(key: &str, reason: impl Into<String>) -> Self {
        ExecutorError::InvalidConfig {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
