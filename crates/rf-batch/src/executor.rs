//! Parallel batch executor
//!
//! Each song runs on its own [`MixEngine`] inside a dedicated rayon pool.
//! A failing or panicking job yields a failed [`BatchResult`] and never
//! touches the others.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rayon::prelude::*;
use rf_mixdown::{MixConfig, MixEngine, MixReport, StemSet};

use crate::error::{BatchError, BatchJobFailure, BatchOpResult};
use crate::job::{BatchJob, BatchResult, CancelToken, JobId, JobInput, JobStatus};
use crate::sink::MixSink;
use crate::source::load_stem_folder;

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS & EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Executor options
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Worker threads, `None` for rayon's default
    pub workers: Option<usize>,
    /// Reuse output already present in the sink
    pub skip_existing: bool,
}

/// Progress notification
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// A worker picked up a job
    JobStarted {
        /// Job
        job_id: JobId,
        /// Display name
        name: String,
    },
    /// A job reached a final status
    JobFinished {
        /// Job
        job_id: JobId,
        /// Display name
        name: String,
        /// Final status
        status: JobStatus,
        /// Jobs finished so far, this one included
        completed: usize,
        /// Jobs in the batch
        total: usize,
        /// Estimated time left, from the mean job time so far
        eta: Duration,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUMMARY
// ═══════════════════════════════════════════════════════════════════════════════

/// Aggregate outcome of a batch
#[derive(Debug)]
pub struct BatchSummary {
    /// Jobs submitted
    pub total: usize,
    /// Jobs mixed
    pub succeeded: usize,
    /// Jobs with output already present
    pub skipped: usize,
    /// Jobs that failed or panicked
    pub failed: usize,
    /// Jobs never started
    pub cancelled: usize,
    /// Wall time of the whole batch
    pub elapsed: Duration,
    /// Per-job results in submission order
    pub results: Vec<BatchResult>,
}

impl BatchSummary {
    fn from_results(results: Vec<BatchResult>, elapsed: Duration) -> Self {
        let count = |status: JobStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            total: results.len(),
            succeeded: count(JobStatus::Completed),
            skipped: count(JobStatus::Skipped),
            failed: count(JobStatus::Failed),
            cancelled: count(JobStatus::Cancelled),
            elapsed,
            results,
        }
    }

    /// True when no job failed or was cancelled
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    /// Result for a job
    pub fn result(&self, job_id: JobId) -> Option<&BatchResult> {
        self.results.iter().find(|r| r.job_id == job_id)
    }

    /// One line per job
    pub fn lines(&self) -> Vec<String> {
        self.results
            .iter()
            .map(|r| match r.status {
                JobStatus::Completed => {
                    let level = |v: Option<f64>| v.map_or_else(|| "-inf".to_string(), |x| format!("{x:.1}"));
                    let report = r.report.as_ref();
                    format!(
                        "PASS {}: {} LUFS, {} dBTP",
                        r.name,
                        level(report.and_then(|rep| rep.output_lufs)),
                        level(report.and_then(|rep| rep.output_true_peak_db))
                    )
                }
                JobStatus::Skipped => format!("SKIP {} (output exists)", r.name),
                JobStatus::Failed => {
                    let reason = r
                        .failure
                        .as_ref()
                        .map_or_else(String::new, |f| f.source.to_string());
                    format!("FAIL {}: {reason}", r.name)
                }
                JobStatus::Cancelled => format!("CANCELLED {}", r.name),
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EXECUTOR
// ═══════════════════════════════════════════════════════════════════════════════

struct Progress {
    completed: usize,
    busy: Duration,
}

/// Runs many songs through the mixdown engine in parallel
pub struct BatchExecutor {
    config: Arc<MixConfig>,
    options: BatchOptions,
    sink: Option<Arc<dyn MixSink>>,
    events: Option<Sender<BatchEvent>>,
    cancel: CancelToken,
}

impl BatchExecutor {
    /// Executor sharing one config across jobs
    pub fn new(config: MixConfig) -> BatchOpResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            options: BatchOptions::default(),
            sink: None,
            events: None,
            cancel: CancelToken::new(),
        })
    }

    /// Set options
    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Set output sink; without one, mixes are kept in memory only
    pub fn with_sink(mut self, sink: Arc<dyn MixSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Send progress events to a channel
    pub fn with_events(mut self, events: Sender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Use an external cancel token
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops dispatch of further jobs
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Shared configuration
    pub fn config(&self) -> &MixConfig {
        &self.config
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is listening
            let _ = tx.send(event);
        }
    }

    /// Run all jobs; only a pool setup failure is an error
    pub fn run(&self, jobs: &[BatchJob]) -> BatchOpResult<BatchSummary> {
        let workers = self.options.workers.unwrap_or_else(rayon::current_num_threads).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("stem-mix-{i}"))
            .build()
            .map_err(|e| BatchError::Pool(e.to_string()))?;

        log::info!("batch: {} job(s) on {workers} worker(s)", jobs.len());
        let start = Instant::now();
        let total = jobs.len();
        let progress = Mutex::new(Progress {
            completed: 0,
            busy: Duration::ZERO,
        });

        let results: Vec<BatchResult> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let result = self.run_job(job);
                    self.finish(job, &result, total, workers, &progress);
                    result
                })
                .collect()
        });

        let summary = BatchSummary::from_results(results, start.elapsed());
        for line in summary.lines() {
            log::info!("{line}");
        }
        log::info!(
            "batch done in {:.1} s: {} passed, {} skipped, {} failed, {} cancelled",
            summary.elapsed.as_secs_f64(),
            summary.succeeded,
            summary.skipped,
            summary.failed,
            summary.cancelled
        );
        Ok(summary)
    }

    fn finish(&self, job: &BatchJob, result: &BatchResult, total: usize, workers: usize, progress: &Mutex<Progress>) {
        let (completed, eta) = {
            let mut p = progress.lock();
            p.completed += 1;
            p.busy += result.elapsed;
            let remaining = total - p.completed;
            let mean = p.busy.as_secs_f64() / p.completed as f64;
            let eta = Duration::from_secs_f64(mean * remaining as f64 / workers.min(remaining.max(1)) as f64);
            (p.completed, eta)
        };

        log::debug!("[{completed}/{total}] {} {:?}, eta {:.1} s", job.name, result.status, eta.as_secs_f64());
        self.emit(BatchEvent::JobFinished {
            job_id: job.id,
            name: job.name.clone(),
            status: result.status,
            completed,
            total,
            eta,
        });
    }

    fn run_job(&self, job: &BatchJob) -> BatchResult {
        if self.cancel.is_cancelled() {
            return BatchResult::cancelled(job);
        }

        if self.options.skip_existing && !self.config.dry_run {
            if let Some(sink) = &self.sink {
                match sink.existing(job) {
                    Ok(Some((report, outputs))) => {
                        log::info!("[{}] output exists, skipped", job.name);
                        return BatchResult::skipped(job, Some(report), outputs);
                    }
                    Ok(None) => {}
                    Err(e) => log::warn!("[{}] unreadable previous output, re-mixing: {e}", job.name),
                }
            }
        }

        self.emit(BatchEvent::JobStarted {
            job_id: job.id,
            name: job.name.clone(),
        });
        let start = Instant::now();

        let outcome = catch_unwind(AssertUnwindSafe(|| self.mix_job(job)))
            .unwrap_or_else(|payload| Err(BatchError::Panicked(panic_message(payload.as_ref()))));

        match outcome {
            Ok((report, outputs)) => BatchResult::completed(job, report, outputs, start.elapsed()),
            Err(source) => {
                let failure = BatchJobFailure::new(job.id, job.name.clone(), source);
                log::warn!("{failure}");
                BatchResult::failed(job, failure, start.elapsed())
            }
        }
    }

    fn mix_job(&self, job: &BatchJob) -> BatchOpResult<(MixReport, Vec<PathBuf>)> {
        let stems: StemSet = match &job.input {
            JobInput::Folder(folder) => load_stem_folder(folder, &self.config)?,
            JobInput::Stems(stems) => stems.clone(),
        };

        let mut engine = MixEngine::with_shared(Arc::clone(&self.config))?;
        let outcome = engine.mix(stems)?;

        let outputs = match (&self.sink, &outcome.mix) {
            (Some(sink), Some(mix)) => sink.write(job, mix, &outcome.report)?,
            _ => Vec::new(),
        };
        Ok((outcome.report, outputs))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 7");

        let payload = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }

    #[test]
    fn test_summary_counts() {
        let job = BatchJob::from_stems(0, "a", StemSet::new());
        let results = vec![
            BatchResult::cancelled(&job),
            BatchResult::skipped(&BatchJob::from_stems(1, "b", StemSet::new()), None, Vec::new()),
        ];
        let summary = BatchSummary::from_results(results, Duration::ZERO);

        assert_eq!(summary.total, 2);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.all_succeeded());
        assert_eq!(summary.lines(), vec!["CANCELLED a".to_string(), "SKIP b (output exists)".to_string()]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = MixConfig {
            bit_depth: 12,
            ..MixConfig::default()
        };
        assert!(BatchExecutor::new(config).is_err());
    }
}
