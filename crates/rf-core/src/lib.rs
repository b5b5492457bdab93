//! rf-core: Shared types for the StemForge mixdown crates
//!
//! Provides the interleaved [`AudioBuffer`] that every stage of the engine
//! consumes, plus decibel helpers and the core error type.

mod buffer;
mod error;

pub use buffer::*;
pub use error::*;

/// Type alias for audio samples (always f64 for maximum precision)
pub type Sample = f64;

/// Engine sample rate. Stems are resampled to this rate before mixing.
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Decibel value
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, serde::Serialize, serde::Deserialize)]
pub struct Decibels(pub f64);

impl Decibels {
    pub const ZERO: Self = Self(0.0);
    pub const NEG_INF: Self = Self(f64::NEG_INFINITY);

    #[inline]
    pub fn from_gain(gain: f64) -> Self {
        if gain <= 0.0 {
            Self::NEG_INF
        } else {
            Self(20.0 * gain.log10())
        }
    }

    #[inline]
    pub fn to_gain(self) -> f64 {
        if self.0 <= -144.0 {
            0.0
        } else {
            10.0_f64.powf(self.0 / 20.0)
        }
    }
}

impl Default for Decibels {
    fn default() -> Self {
        Self::ZERO
    }
}

/// Convert dB to linear gain
#[inline]
pub fn db_to_gain(db: f64) -> f64 {
    Decibels(db).to_gain()
}

/// Convert linear gain to dB (`-inf` for zero)
#[inline]
pub fn gain_to_db(gain: f64) -> f64 {
    Decibels::from_gain(gain).0
}
