//! Vocal sidechain ducking for drums and bass
//!
//! A peak follower on the vocal, read slightly ahead of the ducked signal,
//! is measured against the vocal's own integrated loudness. That makes the
//! envelope independent of the static gain plan. The activity (0..1) maps to
//! a target attenuation that is smoothed with separate attack and release
//! coefficients, so the envelope never steps.

use rf_core::{AudioBuffer, db_to_gain, gain_to_db};

use crate::config::DuckingConfig;
use crate::stem::Stem;

/// Detector attack (ms)
const DETECTOR_ATTACK_MS: f64 = 1.0;

/// Detector release (ms)
const DETECTOR_RELEASE_MS: f64 = 60.0;

/// One-pole coefficient for a time constant
#[inline]
fn time_coeff(ms: f64, sample_rate: f64) -> f64 {
    (-1.0 / (ms * sample_rate / 1000.0)).exp()
}

/// Per-frame gain applied to ducked stems
#[derive(Debug, Clone, PartialEq)]
pub struct DuckingEnvelope {
    // None means unity everywhere
    gains: Option<Vec<f64>>,
    frames: usize,
}

impl DuckingEnvelope {
    /// Unity gain for `frames` frames
    pub fn identity(frames: usize) -> Self {
        Self { gains: None, frames }
    }

    /// Envelope from explicit per-frame gains
    pub fn from_gains(gains: Vec<f64>) -> Self {
        let frames = gains.len();
        Self {
            gains: Some(gains),
            frames,
        }
    }

    /// True when the envelope leaves audio untouched
    pub fn is_identity(&self) -> bool {
        self.gains.is_none()
    }

    /// Length in frames
    pub fn len(&self) -> usize {
        self.frames
    }

    /// True for a zero-length envelope
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Gain at a frame (unity past the end)
    #[inline]
    pub fn gain(&self, frame: usize) -> f64 {
        self.gains
            .as_ref()
            .and_then(|g| g.get(frame))
            .copied()
            .unwrap_or(1.0)
    }

    /// Per-frame gains, `None` for identity
    pub fn gains(&self) -> Option<&[f64]> {
        self.gains.as_deref()
    }

    /// Largest sample-to-sample change
    pub fn max_step(&self) -> f64 {
        self.gains.as_ref().map_or(0.0, |g| {
            g.windows(2).map(|w| (w[1] - w[0]).abs()).fold(0.0, f64::max)
        })
    }

    /// Deepest attenuation reached (dB, positive)
    pub fn max_attenuation_db(&self) -> f64 {
        self.gains.as_ref().map_or(0.0, |g| {
            -gain_to_db(g.iter().copied().fold(1.0, f64::min))
        })
    }

    /// Multiply a buffer frame by frame
    pub fn apply(&self, buffer: &mut AudioBuffer) {
        if self.is_identity() {
            return;
        }
        let channels = buffer.channels;
        for (i, frame) in buffer.samples.chunks_exact_mut(channels).enumerate() {
            let g = self.gain(i);
            for sample in frame {
                *sample *= g;
            }
        }
    }
}

/// Vocal signal driving the sidechain
#[derive(Debug, Clone, Copy)]
pub struct Sidechain<'a> {
    /// Vocal stem
    pub vocal: &'a Stem,
    /// Its integrated loudness (LUFS)
    pub integrated_lufs: f64,
}

/// Produces the ducking envelope, or identity in demo mode
pub trait DuckingStrategy: Send + Sync {
    /// Envelope covering `frames` bus frames
    fn envelope(&self, sidechain: Option<Sidechain<'_>>, frames: usize) -> DuckingEnvelope;
}

/// Demo mode: no ducking
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDucking;

impl DuckingStrategy for NoDucking {
    fn envelope(&self, _sidechain: Option<Sidechain<'_>>, frames: usize) -> DuckingEnvelope {
        DuckingEnvelope::identity(frames)
    }
}

/// Exponentially smoothed vocal-activity ducker
#[derive(Debug, Clone)]
pub struct SidechainDucker {
    config: DuckingConfig,
    sample_rate: f64,
    attack_coeff: f64,
    release_coeff: f64,
}

impl SidechainDucker {
    /// Create ducker; config bounds are checked by `MixConfig::validate`
    pub fn new(config: DuckingConfig, sample_rate: u32) -> Self {
        let sr = sample_rate as f64;
        Self {
            config,
            sample_rate: sr,
            attack_coeff: time_coeff(config.attack_ms, sr),
            release_coeff: time_coeff(config.release_ms, sr),
        }
    }

    /// Upper bound on any sample-to-sample gain change
    pub fn step_bound(&self) -> f64 {
        (1.0 - self.attack_coeff) * (1.0 - db_to_gain(-self.config.max_attenuation_db))
    }

    /// Map a detector level to activity in [0, 1]
    #[inline]
    fn activity(&self, level_db: f64, reference_lufs: f64) -> f64 {
        let relative = level_db - reference_lufs;
        ((relative - self.config.activity_floor_lu) / self.config.activity_range_db).clamp(0.0, 1.0)
    }
}

impl DuckingStrategy for SidechainDucker {
    fn envelope(&self, sidechain: Option<Sidechain<'_>>, frames: usize) -> DuckingEnvelope {
        let Some(sidechain) = sidechain else {
            return DuckingEnvelope::identity(frames);
        };
        if !sidechain.integrated_lufs.is_finite() {
            return DuckingEnvelope::identity(frames);
        }

        let vocal = sidechain.vocal.buffer.to_mono().samples;
        let lookahead = (self.config.lookahead_ms * self.sample_rate / 1000.0).round() as usize;
        let det_attack = time_coeff(DETECTOR_ATTACK_MS, self.sample_rate);
        let det_release = time_coeff(DETECTOR_RELEASE_MS, self.sample_rate);

        let mut detector = 0.0_f64;
        let mut gain = 1.0_f64;
        let mut gains = Vec::with_capacity(frames);

        for n in 0..frames {
            let x = vocal.get(n + lookahead).map_or(0.0, |s| s.abs());
            let coeff = if x > detector { det_attack } else { det_release };
            detector = coeff * detector + (1.0 - coeff) * x;

            let activity = self.activity(gain_to_db(detector), sidechain.integrated_lufs);
            let target = db_to_gain(-self.config.max_attenuation_db * activity);

            let coeff = if target < gain { self.attack_coeff } else { self.release_coeff };
            gain = coeff * gain + (1.0 - coeff) * target;
            gains.push(gain);
        }

        DuckingEnvelope::from_gains(gains)
    }
}
