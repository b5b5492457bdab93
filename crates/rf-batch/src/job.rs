//! Batch job definitions

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rf_mixdown::{MixReport, StemSet};
use serde::{Deserialize, Serialize};

use crate::error::BatchJobFailure;

/// Unique job identifier
pub type JobId = u64;

/// Where a job's stems come from
#[derive(Debug, Clone)]
pub enum JobInput {
    /// Folder of `*.wav` stems named by role
    Folder(PathBuf),
    /// Stems already decoded at the engine rate
    Stems(StemSet),
}

/// One song to mix
#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Unique job ID
    pub id: JobId,
    /// Display name, also the output folder name
    pub name: String,
    /// Stem source
    pub input: JobInput,
}

impl BatchJob {
    /// Job reading stems from a folder; named after the folder
    pub fn from_folder(id: JobId, folder: impl Into<PathBuf>) -> Self {
        let folder = folder.into();
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("job-{id}"));
        Self {
            id,
            name,
            input: JobInput::Folder(folder),
        }
    }

    /// Job over in-memory stems
    pub fn from_stems(id: JobId, name: impl Into<String>, stems: StemSet) -> Self {
        Self {
            id,
            name: name.into(),
            input: JobInput::Stems(stems),
        }
    }

    /// Source folder, if any
    pub fn folder(&self) -> Option<&Path> {
        match &self.input {
            JobInput::Folder(p) => Some(p),
            JobInput::Stems(_) => None,
        }
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Mixed (and written, unless dry run)
    Completed,
    /// Output already present
    Skipped,
    /// Failed with error
    Failed,
    /// Never started
    Cancelled,
}

/// Outcome of one job
#[derive(Debug)]
pub struct BatchResult {
    /// Job
    pub job_id: JobId,
    /// Display name
    pub name: String,
    /// Final status
    pub status: JobStatus,
    /// Present on completion, and on skip when read back from disk
    pub report: Option<MixReport>,
    /// Present when failed
    pub failure: Option<BatchJobFailure>,
    /// Files written for this job
    pub outputs: Vec<PathBuf>,
    /// Time spent mixing this job
    pub elapsed: Duration,
}

impl BatchResult {
    pub(crate) fn completed(job: &BatchJob, report: MixReport, outputs: Vec<PathBuf>, elapsed: Duration) -> Self {
        Self {
            job_id: job.id,
            name: job.name.clone(),
            status: JobStatus::Completed,
            report: Some(report),
            failure: None,
            outputs,
            elapsed,
        }
    }

    pub(crate) fn skipped(job: &BatchJob, report: Option<MixReport>, outputs: Vec<PathBuf>) -> Self {
        Self {
            job_id: job.id,
            name: job.name.clone(),
            status: JobStatus::Skipped,
            report,
            failure: None,
            outputs,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn failed(job: &BatchJob, failure: BatchJobFailure, elapsed: Duration) -> Self {
        Self {
            job_id: job.id,
            name: job.name.clone(),
            status: JobStatus::Failed,
            report: None,
            failure: Some(failure),
            outputs: Vec::new(),
            elapsed,
        }
    }

    pub(crate) fn cancelled(job: &BatchJob) -> Self {
        Self {
            job_id: job.id,
            name: job.name.clone(),
            status: JobStatus::Cancelled,
            report: None,
            failure: None,
            outputs: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// True for completed and skipped jobs
    pub fn is_success(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Skipped)
    }
}

/// Shared stop flag; jobs not yet dispatched are cancelled
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh token
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop dispatching
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check if cancelled
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_job_named_after_folder() {
        let job = BatchJob::from_folder(3, "/music/songs/intro");
        assert_eq!(job.name, "intro");
        assert_eq!(job.folder(), Some(Path::new("/music/songs/intro")));
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
