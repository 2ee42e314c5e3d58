//! Error type shared by the sampling engine, the model graph and the loaders.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed Newick, FASTA or configuration text.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A write would leave a variable outside its declared range.
    #[error("value {value} for {variable}[{index}] is outside bounds [{lower}, {upper}]")]
    BoundsViolation {
        variable: String,
        index: usize,
        value: f64,
        lower: f64,
        upper: f64,
    },

    /// operate/accept/reject called out of sequence. Always an engine bug.
    #[error("operator protocol violation in '{operator}': {detail}")]
    Protocol { operator: String, detail: String },

    #[error("invalid initial state: {0}")]
    InvalidInitialState(String),

    #[error("state evaluation mismatch: {0}")]
    EvaluationMismatch(String),

    #[error("unknown {kind} '{id}'")]
    UnknownReference { kind: &'static str, id: String },
}

pub type Result<T> = std::result::Result<T, ChainError>;
