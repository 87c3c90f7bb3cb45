//! Error types for classifier training and prediction

use crate::params::Algorithm;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Empty training set")]
    EmptyTrainingSet,

    #[error("Cross-validation requires at least 2 folds, got {0}")]
    TooFewFolds(usize),

    #[error("Size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Algorithm {0:?} does not support probability estimates")]
    ProbabilitiesUnsupported(Algorithm),

    #[error("Dictionary index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("External solver `{program}` failed ({status}): {detail}")]
    ExternalProcess {
        program: String,
        status: String,
        detail: String,
    },

    #[error("Missing entry in model root: {0}")]
    MissingEntry(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Concurrency error: {0}")]
    Concurrency(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrainError>;
