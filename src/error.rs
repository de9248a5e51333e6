// src/error.rs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MatchError>;

/// Failure taxonomy for the matching engine.
///
/// `Configuration` and `InsufficientData` are fatal and always surface
/// before any artifact is written. Comparator failures are isolated to the
/// offending pair by the scoring layer and only reach the caller when a
/// single pair is scored directly. Low blocking coverage is deliberately
/// *not* represented here: it is a non-fatal condition reported through
/// `BlockingReport` and the log.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Insufficient training data: {matches} match and {distincts} distinct examples (both classes required)")]
    InsufficientData { matches: usize, distincts: usize },

    #[error("Comparator failure on field '{field}': {reason}")]
    Comparator { field: String, reason: String },

    #[error("Invalid clustering threshold {0}: must be in (0, 1]")]
    InvalidThreshold(f64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Labeling oracle error: {0}")]
    Oracle(#[from] anyhow::Error),
}

impl From<serde_json::Error> for MatchError {
    fn from(e: serde_json::Error) -> Self {
        MatchError::Serialization(e.to_string())
    }
}
