//! RF-Mixdown — Deterministic Stem Mixdown Engine
//!
//! Turns isolated stems (vocal, drums, bass, other) into a balanced,
//! loudness-normalized stereo mix:
//! - BS.1770 integrated loudness and oversampled true peak per stem
//! - Spectral masking scores between stem pairs
//! - Vocal-anchored static gain plan with masking cuts
//! - Vocal sidechain ducking of drums and bass
//! - Look-ahead true-peak limiting, TPDF dither, integer quantization
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             MixEngine                                │
//! │                                                                      │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────────┐   │
//! │  │ StemSet  │ → │ Loudness │ → │ Masking  │ → │ Ducking envelope │   │
//! │  │ validate │   │ (rayon)  │   │ strategy │   │    strategy      │   │
//! │  └──────────┘   └──────────┘   └──────────┘   └──────────────────┘   │
//! │                                                        ↓             │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────────┐   │
//! │  │ Report   │ ← │ Dither   │ ← │ Limiter  │ ← │ GainPlanner →    │   │
//! │  │          │   │ (TPDF)   │   │ (TP)     │   │ MixBus           │   │
//! │  └──────────┘   └──────────┘   └──────────┘   └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rf_mixdown::{MixConfig, MixEngine, StemSet};
//!
//! let mut engine = MixEngine::new(MixConfig::default().with_seed(7))?;
//! let outcome = engine.mix(stems)?;
//! println!("{}", outcome.report.to_json()?);
//! ```

#![warn(missing_docs)]

mod bus;
mod config;
mod dither;
mod ducking;
mod error;
mod gain;
mod limiter;
mod loudness;
mod masking;
mod pipeline;
mod report;
mod stem;
mod true_peak;

pub use bus::*;
pub use config::*;
pub use dither::*;
pub use ducking::*;
pub use error::*;
pub use gain::*;
pub use limiter::*;
pub use loudness::*;
pub use masking::*;
pub use pipeline::*;
pub use report::*;
pub use stem::*;
pub use true_peak::*;
