//! Error types for batch execution

use std::path::PathBuf;

use rf_mixdown::MixError;
use serde::Serialize;
use thiserror::Error;

use crate::job::JobId;

/// Batch execution errors
#[derive(Error, Debug)]
pub enum BatchError {
    /// Engine rejected or failed the song
    #[error("Mixdown failed: {0}")]
    Mix(#[from] MixError),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV decode or encode failure
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    /// Sample rate conversion failure
    #[error("Sample rate conversion failed: {0}")]
    Resample(String),

    /// Report (de)serialization failure
    #[error("Report serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Worker pool could not be built
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// Job panicked; carries the panic message
    #[error("Job panicked: {0}")]
    Panicked(String),

    /// Song folder does not exist
    #[error("Input not found: {0}")]
    InputNotFound(PathBuf),
}

/// Result type for batch operations
pub type BatchOpResult<T> = Result<T, BatchError>;

/// A failed job, with enough context to report it alone
#[derive(Error, Debug)]
#[error("job {job_id} ({job_name}): {source}")]
pub struct BatchJobFailure {
    /// Failed job
    pub job_id: JobId,
    /// Its display name
    pub job_name: String,
    /// What went wrong
    #[source]
    pub source: BatchError,
}

impl BatchJobFailure {
    /// Wrap an error for a job
    pub fn new(job_id: JobId, job_name: impl Into<String>, source: BatchError) -> Self {
        Self {
            job_id,
            job_name: job_name.into(),
            source,
        }
    }

    /// Plain record for logs and summaries
    pub fn record(&self) -> FailureRecord {
        FailureRecord {
            job_id: self.job_id,
            job_name: self.job_name.clone(),
            error: self.source.to_string(),
        }
    }
}

/// Serializable view of a [`BatchJobFailure`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Failed job
    pub job_id: JobId,
    /// Its display name
    pub job_name: String,
    /// Rendered error chain head
    pub error: String,
}
