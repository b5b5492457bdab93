//! Per-song mix report
//!
//! Serialized next to the rendered mix. Levels that can be `-inf` (digital
//! silence) are stored as `None`, since JSON has no infinities.

use serde::{Deserialize, Serialize};

use crate::config::{MixMode, QualityProfile};
use crate::gain::StemGain;
use crate::loudness::LoudnessProfile;
use crate::masking::MaskingScore;
use crate::stem::StemRole;

/// Number of masking pairs kept in the summary
pub const MASKING_SUMMARY_LEN: usize = 5;

/// Recovered problem, recorded instead of failing the job
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MixWarning {
    /// Stem stayed below the absolute gate and was muted
    InsufficientSignal {
        /// Muted stem
        role: StemRole,
    },
    /// Bus loudness missed the target tolerance
    UnreachableTarget {
        /// Requested loudness (LUFS)
        target_lufs: f64,
        /// Best effort, `None` when silent
        achieved_lufs: Option<f64>,
    },
    /// Limiter output needed a static trim
    LimiterTrim {
        /// Trim applied (dB, negative)
        trim_db: f64,
    },
}

/// Input measurements and gain decision for one stem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemReport {
    /// Stem the row describes
    pub role: StemRole,
    /// Input integrated loudness (LUFS)
    pub input_lufs: Option<f64>,
    /// Input true peak (dBTP)
    pub input_true_peak_db: Option<f64>,
    /// Input loudness range (LU)
    pub loudness_range_lu: Option<f64>,
    /// Loudness-matched gain (dB)
    pub baseline_db: f64,
    /// Masking cut (dB)
    pub masking_delta_db: f64,
    /// Share of the bus correction (dB)
    pub correction_db: f64,
    /// Applied static gain, `None` when muted
    pub gain_db: Option<f64>,
    /// Stem left out of the mix
    pub muted: bool,
}

impl StemReport {
    /// Combine a stem's profile (absent when silent) with its gain
    pub fn new(role: StemRole, profile: Option<&LoudnessProfile>, gain: Option<&StemGain>) -> Self {
        let muted = gain.is_none_or(|g| g.muted);
        Self {
            role,
            input_lufs: profile.and_then(|p| finite(p.integrated_lufs)),
            input_true_peak_db: profile.and_then(|p| finite(p.true_peak_db)),
            loudness_range_lu: profile.map(|p| p.loudness_range_lu),
            baseline_db: gain.map_or(0.0, |g| g.baseline_db),
            masking_delta_db: gain.map_or(0.0, |g| g.masking_delta_db),
            correction_db: gain.map_or(0.0, |g| g.correction_db),
            gain_db: if muted { None } else { gain.map(|g| g.total_db) },
            muted,
        }
    }
}

/// Everything measured and decided for one song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixReport {
    /// Demo or full processing
    pub mode: MixMode,
    /// Seed in force, `None` when non-deterministic
    pub seed: Option<u64>,
    /// No mix was handed back
    pub dry_run: bool,
    /// Analysis resolution
    pub quality_profile: QualityProfile,
    /// Requested integrated loudness (LUFS)
    pub target_lufs: f64,
    /// True-peak ceiling (dBTP)
    pub truepeak_margin_db: f64,
    /// One row per input stem, role order
    pub stems: Vec<StemReport>,
    /// Bus loudness with the planned gains (LUFS)
    pub planned_lufs: Option<f64>,
    /// Shared planner correction (dB)
    pub correction_db: f64,
    /// Integrated loudness of the rendered mix (LUFS)
    pub output_lufs: Option<f64>,
    /// True peak of the rendered mix (dBTP)
    pub output_true_peak_db: Option<f64>,
    /// Deepest limiter gain reduction (dB)
    pub limiter_reduction_db: f64,
    /// Static trim after limiting (dB)
    pub limiter_trim_db: Option<f64>,
    /// Deepest ducking attenuation (dB)
    pub ducking_max_attenuation_db: f64,
    /// Strongest masking pairs, highest first
    pub masking: Vec<MaskingScore>,
    /// Recovered problems
    pub warnings: Vec<MixWarning>,
    /// Output sample rate (Hz)
    pub sample_rate: u32,
    /// Output channel count
    pub channels: usize,
    /// Output word length
    pub bit_depth: u16,
    /// Output length in frames
    pub frames: usize,
    /// Output length in seconds
    pub duration_s: f64,
}

impl MixReport {
    /// Report for a role
    pub fn stem(&self, role: StemRole) -> Option<&StemReport> {
        self.stems.iter().find(|s| s.role == role)
    }

    /// True when the planner hit its target
    pub fn target_reached(&self) -> bool {
        !self
            .warnings
            .iter()
            .any(|w| matches!(w, MixWarning::UnreachableTarget { .. }))
    }

    /// Pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parse JSON written by [`to_json`](Self::to_json)
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// `None` for non-finite levels
pub(crate) fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
