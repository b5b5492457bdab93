//! RF-Batch — Parallel Stem Mixdown Batches
//!
//! Runs many songs through [`rf_mixdown::MixEngine`] at once:
//! - Song folders of role-named WAV stems (any rate, mono or stereo)
//! - Resampling to the engine rate (rubato)
//! - Worker pool with per-job failure and panic isolation
//! - Progress events with ETA, cancellation, skip-existing
//! - `mix.wav` + `report.json` per song
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         BatchExecutor                          │
//! │                                                                │
//! │  ┌───────────┐   ┌─────────────────────────┐   ┌────────────┐  │
//! │  │ BatchJob  │ → │ rayon pool (stem-mix-N) │ → │  MixSink   │  │
//! │  │ folder or │   │ load → resample →       │   │ mix.wav    │  │
//! │  │ StemSet   │   │ MixEngine::mix          │   │ report.json│  │
//! │  └───────────┘   └─────────────────────────┘   └────────────┘  │
//! │                              ↓                                 │
//! │                 BatchEvent channel, BatchSummary               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rf_batch::{BatchExecutor, WavMixSink, discover_jobs};
//! use rf_mixdown::MixConfig;
//!
//! let jobs = discover_jobs("songs".as_ref())?;
//! let executor = BatchExecutor::new(MixConfig::default())?
//!     .with_sink(Arc::new(WavMixSink::new("mixes")));
//! let summary = executor.run(&jobs)?;
//! ```

#![warn(missing_docs)]

mod error;
mod executor;
mod job;
mod resample;
mod sink;
mod source;

pub use error::*;
pub use executor::*;
pub use job::*;
pub use resample::*;
pub use sink::*;
pub use source::*;
