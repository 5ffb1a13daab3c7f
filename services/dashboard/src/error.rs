//! Error taxonomy for the ingestion core.
//!
//! Workbook-level and storage-level failures abort an ingestion attempt.
//! Sheet-level and dataset-level failures are absorbed by the pipeline
//! (logged and skipped) and never surface through these variants.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The uploaded bytes could not be opened as a workbook, or a CSV
    /// fallback failed to parse.
    #[error("workbook could not be read: {reason}")]
    MalformedWorkbook { reason: String },

    /// The filename gate rejected the upload: it does not look like it
    /// belongs to the entity it was submitted for.
    #[error("file does not appear to belong to {selected} (detected: {})", detected.as_deref().unwrap_or("unrecognized"))]
    EntityMismatch {
        selected: &'static str,
        detected: Option<&'static str>,
    },

    /// An entity id outside the fixed reference set.
    #[error("unknown entity id: {0}")]
    UnknownEntity(String),

    /// A month name that does not parse as an English calendar month.
    #[error("unrecognized month name: {0}")]
    InvalidPeriod(String),

    /// A chart payload that must not be persisted (empty series, empty
    /// mapping, or an empty serialized form). Non-fatal: callers skip the
    /// dataset and continue.
    #[error("chart dataset {data_key} has no storable content")]
    InvalidChartValue { data_key: String },

    /// A spooled upload could not be written.
    #[error("upload spool: {0}")]
    Spool(#[from] std::io::Error),

    /// Could not connect to the storage backend.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] sqlx::Error),

    /// A query against an established connection failed.
    #[error("storage query failed: {0}")]
    Storage(#[from] sqlx::Error),
}

impl Error {
    pub fn malformed(reason: impl ToString) -> Self {
        Error::MalformedWorkbook {
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
