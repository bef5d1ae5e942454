//! Error types for the coordinate-to-map pipeline
//!
//! Schema and shape errors abort a run. Out-of-bounds coordinates and
//! empty studies are not errors; they only show up in the numeric output
//! and in the stream diagnostics.

use std::path::PathBuf;
use thiserror::Error;

/// The input coordinate table does not have the expected layout
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("Missing required column '{column}' (available: {available:?})")]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },

    #[error("Duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("Column '{column}' has {found} rows, expected {expected}")]
    RaggedColumn {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("Column '{column}' row {row}: cannot parse '{value}' as a number")]
    NotNumeric {
        column: String,
        row: usize,
        value: String,
    },
}

/// Two volumes that should share one grid have different shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Volume shape {found:?} does not match grid shape {expected:?}")]
pub struct ShapeMismatchError {
    pub expected: [usize; 3],
    pub found: [usize; 3],
}

/// Invalid grid geometry
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("Affine is not invertible")]
    SingularAffine,

    #[error("Grid dimensions must be non-zero, got {0:?}")]
    EmptyShape([usize; 3]),

    #[error("Mask shape {found:?} does not match grid shape {expected:?}")]
    MaskShape {
        expected: [usize; 3],
        found: [usize; 3],
    },

    #[error("Target resolution must be positive and finite, got {0:?}")]
    InvalidResolution([f64; 3]),
}

/// Any failure that aborts a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatchError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("NIfTI error: {0}")]
    Nifti(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
