//! Error types for the artifact store.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("SQL error: {0}")]
    Sql(#[from] duckdb::Error),

    #[error("cannot write an artifact from zero records")]
    EmptyRecordSet,

    #[error("unsupported column '{column}' ({data_type})")]
    UnsupportedColumn { column: String, data_type: String },
}

impl ArtifactError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ArtifactError>;
