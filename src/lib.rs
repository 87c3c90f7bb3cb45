//! Classifier training orchestration
//!
//! Trains linear and kernel classifiers over named sparse features, either
//! in-process or through external liblinear/libsvm-compatible tools, with
//! parallel cross-validation and grid search on a shared bounded pool.

pub mod backend;
pub mod cache;
pub mod classifier;
pub mod context;
pub mod core;
pub mod data;
pub mod dictionary;
pub mod encoding;
pub mod grid;
pub mod params;
pub mod store;
pub mod validation;

// Re-export main types for convenience
pub use crate::backend::{Backend, Prediction, TrainedModel};
pub use crate::cache::GramCache;
pub use crate::classifier::Classifier;
pub use crate::context::{BackendPreference, CommandResolver, ExecContext};
pub use crate::core::error::{Result, TrainError};
pub use crate::core::types::*;
pub use crate::data::TrainingFile;
pub use crate::dictionary::Dictionary;
pub use crate::encoding::EncodedProblem;
pub use crate::grid::{by_accuracy, train_best};
pub use crate::params::{Algorithm, Family, Parameters};
pub use crate::validation::{cross_validate, evaluate};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
