//! Error types for the enrichment pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// A source dataset could not be read or parsed.
#[derive(Debug, Error)]
#[error("Failed to load {}: {reason}", path.display())]
pub struct DataLoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl DataLoadError {
    pub fn new(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// An attribute value could not be interpreted as the expected type.
#[derive(Debug, Error)]
#[error("Row {row}: column '{column}' has invalid value {value}")]
pub struct InvalidAttributeError {
    /// Row position in the table the value was read from
    pub row: usize,
    pub column: String,
    /// JSON rendering of the offending value
    pub value: String,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    DataLoad(#[from] DataLoadError),

    #[error(transparent)]
    InvalidAttribute(#[from] InvalidAttributeError),

    #[error("Unsupported coordinate reference system '{0}'")]
    UnsupportedCrs(String),

    #[error("Cannot combine tables in {left} and {right}")]
    CrsMismatch { left: String, right: String },

    #[error("Row {row}: cannot buffer a {kind} geometry")]
    InvalidGeometry { row: usize, kind: &'static str },

    #[error("Column '{0}' not found")]
    MissingColumn(String),

    #[error("Column '{0}' already exists")]
    ColumnConflict(String),

    #[error("Failed to write {}: {reason}", path.display())]
    Write { path: PathBuf, reason: String },

    #[error("Feature source error: {0}")]
    Source(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
