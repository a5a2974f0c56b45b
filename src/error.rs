#[cfg(feature = "python")]
use pyo3::exceptions::{PyRuntimeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::PyErr;
use thiserror::Error;

/// Join-key and catalog violations raised while merging the source tables.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("{table} table has no '{column}' column")]
    MissingKeyColumn { table: String, column: String },

    #[error("{table} table contains duplicate sample id '{sample_id}'")]
    DuplicateSampleId { table: String, sample_id: String },

    #[error("{table} table contains a row without a sample id (row {row})")]
    NullSampleId { table: String, row: usize },

    #[error("catalog variable '{0}' is not a column of the merged table")]
    MissingCatalogColumn(String),

    #[error("override refers to unknown column '{0}'")]
    UnknownOverrideColumn(String),
}

#[derive(Error, Debug)]
pub enum HydroError {
    #[error("merge: {0}")]
    Merge(#[from] MergeError),

    #[error("transform: non-positive value {value} in '{column}' for sample '{sample_id}'")]
    NonPositiveValue {
        sample_id: String,
        column: String,
        value: f64,
    },

    #[error("factor analysis: {0}")]
    FactorFit(String),

    #[error("clustering: {requested} clusters requested but only {available} samples available")]
    ClusterConfig { requested: usize, available: usize },

    #[error("Column not found: {0}")]
    MissingColumn(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config: {0}")]
    Config(String),

    #[error("InvalidData: {0}")]
    InvalidData(String),

    #[error("Not loaded: {0}")]
    NotLoaded(String),
}

pub type Result<T> = std::result::Result<T, HydroError>;

impl From<serde_json::Error> for HydroError {
    fn from(err: serde_json::Error) -> Self {
        HydroError::Config(err.to_string())
    }
}

#[cfg(feature = "python")]
impl From<HydroError> for PyErr {
    fn from(err: HydroError) -> PyErr {
        match err {
            HydroError::Config(_) | HydroError::ClusterConfig { .. } => {
                PyValueError::new_err(err.to_string())
            }
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }
}
