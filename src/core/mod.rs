//! Core types and errors for classifier training

pub mod error;
pub mod types;

pub use self::error::*;
pub use self::types::*;
