//! Mixdown configuration
//!
//! One immutable [`MixConfig`] is threaded through every stage of a job.
//! It deserializes from JSON with per-field defaults, so a config file only
//! needs to name what it changes.

use std::path::Path;

use rf_core::DEFAULT_SAMPLE_RATE;
use serde::{Deserialize, Serialize};

use crate::error::{MixError, MixResult};
use crate::stem::StemRole;

/// Processing mode, selected once per job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixMode {
    /// Level balancing and limiting only (no masking, no ducking)
    Demo,
    /// Masking-aware gains and vocal sidechain ducking
    #[default]
    Full,
}

/// Analysis resolution preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityProfile {
    /// Coarse spectra, 4x true peak
    Draft,
    /// 1024-point spectra, 4x true peak
    #[default]
    Standard,
    /// 2048-point spectra, 8x true peak
    High,
}

impl QualityProfile {
    /// STFT geometry for masking analysis
    pub fn stft(self) -> StftParams {
        match self {
            QualityProfile::Draft => StftParams { fft_size: 512, hop_size: 256 },
            QualityProfile::Standard => StftParams::DETERMINISTIC,
            QualityProfile::High => StftParams { fft_size: 2048, hop_size: 512 },
        }
    }

    /// True-peak oversampling factor
    pub fn oversample(self) -> usize {
        match self {
            QualityProfile::Draft | QualityProfile::Standard => 4,
            QualityProfile::High => 8,
        }
    }
}

/// STFT parameters (Hann window, no centering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StftParams {
    /// FFT size in samples
    pub fft_size: usize,
    /// Hop between frames in samples
    pub hop_size: usize,
}

impl StftParams {
    /// Geometry required whenever a seed is set
    pub const DETERMINISTIC: StftParams = StftParams {
        fft_size: 1024,
        hop_size: 256,
    };
}

/// Loudness of each stem relative to the vocal anchor (LU)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StemBalance {
    /// Vocal offset, normally 0
    pub vocal_lu: f64,
    /// Drums offset
    pub drums_lu: f64,
    /// Bass offset
    pub bass_lu: f64,
    /// Instrumental remainder offset
    pub other_lu: f64,
}

impl Default for StemBalance {
    fn default() -> Self {
        Self {
            vocal_lu: 0.0,
            drums_lu: -1.0,
            bass_lu: -3.0,
            other_lu: -4.0,
        }
    }
}

impl StemBalance {
    /// Offset for a role
    pub fn offset(&self, role: StemRole) -> f64 {
        match role {
            StemRole::Vocal => self.vocal_lu,
            StemRole::Drums => self.drums_lu,
            StemRole::Bass => self.bass_lu,
            StemRole::Other => self.other_lu,
        }
    }
}

/// Gain planner limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Acceptance window around the target (LU)
    pub tolerance_lu: f64,
    /// Hard ceiling on any stem's total boost (dB)
    pub max_boost_db: f64,
    /// Masking score at which attenuation starts (0..1)
    pub masking_threshold: f64,
    /// Largest masking attenuation applied to one stem (dB)
    pub max_masking_cut_db: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            tolerance_lu: 0.5,
            max_boost_db: 24.0,
            masking_threshold: 0.35,
            max_masking_cut_db: 3.0,
        }
    }
}

/// Masking band partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingConfig {
    /// Ascending band edges in Hz; band `i` spans `edges[i]..edges[i + 1]`
    pub band_edges_hz: Vec<f64>,
    /// Band energy below this (dB re. full-scale sine) counts as inactive
    pub activity_floor_db: f64,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            band_edges_hz: octave_band_edges(),
            activity_floor_db: -60.0,
        }
    }
}

/// Octave bands centred on 62.5 Hz .. 16 kHz
pub fn octave_band_edges() -> Vec<f64> {
    (0..=9)
        .map(|k| 62.5 * 2.0_f64.powi(k) / std::f64::consts::SQRT_2)
        .collect()
}

/// Vocal sidechain ducking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuckingConfig {
    /// Attenuation at full vocal activity (dB, 0..6]
    pub max_attenuation_db: f64,
    /// Gain fall time constant (ms, 1..50)
    pub attack_ms: f64,
    /// Gain recovery time constant (ms, 50..2000)
    pub release_ms: f64,
    /// Detector reads this far ahead of the ducked signal (ms)
    pub lookahead_ms: f64,
    /// Vocal level, relative to its integrated loudness, where ducking begins (LU)
    pub activity_floor_lu: f64,
    /// Level span over which ducking ramps to full depth (dB)
    pub activity_range_db: f64,
}

impl Default for DuckingConfig {
    fn default() -> Self {
        Self {
            max_attenuation_db: 3.0,
            attack_ms: 10.0,
            release_ms: 250.0,
            lookahead_ms: 5.0,
            activity_floor_lu: -20.0,
            activity_range_db: 12.0,
        }
    }
}

/// Look-ahead limiter timing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterSettings {
    /// Look-ahead window (ms)
    pub lookahead_ms: f64,
    /// Gain-reduction ramp, shorter than the look-ahead (ms)
    pub attack_ms: f64,
    /// Exponential recovery (ms)
    pub release_ms: f64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            lookahead_ms: 5.0,
            attack_ms: 4.0,
            release_ms: 80.0,
        }
    }
}

/// Complete per-batch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    /// Target integrated loudness (LUFS)
    pub target_lufs: f64,
    /// True-peak ceiling (dBTP, negative)
    pub truepeak_margin_db: f64,
    /// Demo or full processing
    pub mix_mode: MixMode,
    /// Seed for deterministic mode
    pub seed: Option<u64>,
    /// Analysis resolution
    pub quality_profile: QualityProfile,
    /// Analyse and plan, but hand back no mix
    pub dry_run: bool,
    /// Engine sample rate
    pub sample_rate: u32,
    /// Output word length (16 or 24)
    pub bit_depth: u16,
    /// Roles that must be present
    pub required_stems: Vec<StemRole>,
    /// Loudness of each stem relative to the vocal
    pub balance: StemBalance,
    /// Planner tolerance and gain limits
    pub planner: PlannerConfig,
    /// Band partition for masking scores
    pub masking: MaskingConfig,
    /// Vocal sidechain ducking
    pub ducking: DuckingConfig,
    /// True-peak limiter timing
    pub limiter: LimiterSettings,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            target_lufs: -14.0,
            truepeak_margin_db: -1.0,
            mix_mode: MixMode::Full,
            seed: None,
            quality_profile: QualityProfile::Standard,
            dry_run: false,
            sample_rate: DEFAULT_SAMPLE_RATE,
            bit_depth: 24,
            required_stems: StemRole::ALL.to_vec(),
            balance: StemBalance::default(),
            planner: PlannerConfig::default(),
            masking: MaskingConfig::default(),
            ducking: DuckingConfig::default(),
            limiter: LimiterSettings::default(),
        }
    }
}

impl MixConfig {
    /// Parse JSON, filling absent fields with defaults
    pub fn from_json_str(json: &str) -> MixResult<Self> {
        serde_json::from_str(json).map_err(|e| MixError::InvalidConfig(e.to_string()))
    }

    /// Load JSON config file
    pub fn from_json_file(path: impl AsRef<Path>) -> MixResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MixError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Demo-mode config
    pub fn demo() -> Self {
        Self {
            mix_mode: MixMode::Demo,
            ..Default::default()
        }
    }

    /// Set seed (enables deterministic mode)
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set loudness target
    pub fn with_target(mut self, target_lufs: f64) -> Self {
        self.target_lufs = target_lufs;
        self
    }

    /// Set mode
    pub fn with_mode(mut self, mode: MixMode) -> Self {
        self.mix_mode = mode;
        self
    }

    /// Set dry run
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// True when a seed pins every random choice
    pub fn is_deterministic(&self) -> bool {
        self.seed.is_some()
    }

    /// Effective STFT geometry
    pub fn stft(&self) -> StftParams {
        if self.is_deterministic() {
            StftParams::DETERMINISTIC
        } else {
            self.quality_profile.stft()
        }
    }

    /// Effective true-peak oversampling factor
    pub fn oversample(&self) -> usize {
        self.quality_profile.oversample()
    }

    /// Reject configurations the engine cannot honour
    pub fn validate(&self) -> MixResult<()> {
        if !self.target_lufs.is_finite() || !(-60.0..0.0).contains(&self.target_lufs) {
            return Err(MixError::InvalidConfig(format!(
                "target_lufs {} outside [-60, 0)",
                self.target_lufs
            )));
        }
        if self.bit_depth != 16 && self.bit_depth != 24 {
            return Err(MixError::InvalidConfig(format!(
                "bit_depth {} (supported: 16, 24)",
                self.bit_depth
            )));
        }
        validate_margin(self.truepeak_margin_db, self.bit_depth)?;
        if self.sample_rate < 8000 {
            return Err(MixError::InvalidConfig(format!(
                "sample_rate {} too low",
                self.sample_rate
            )));
        }

        let p = &self.planner;
        if !(p.tolerance_lu > 0.0) || !(p.max_boost_db >= 0.0) || !(p.max_masking_cut_db >= 0.0) {
            return Err(MixError::InvalidConfig("planner limits must be positive".into()));
        }
        if !(0.0..1.0).contains(&p.masking_threshold) {
            return Err(MixError::InvalidConfig(format!(
                "masking_threshold {} outside [0, 1)",
                p.masking_threshold
            )));
        }

        let edges = &self.masking.band_edges_hz;
        if edges.len() < 2 || edges[0] <= 0.0 || edges.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(MixError::InvalidConfig(
                "band_edges_hz must be at least two ascending positive frequencies".into(),
            ));
        }

        let d = &self.ducking;
        if !(d.max_attenuation_db > 0.0 && d.max_attenuation_db <= 6.0) {
            return Err(MixError::InvalidConfig(format!(
                "ducking max_attenuation_db {} outside (0, 6]",
                d.max_attenuation_db
            )));
        }
        if !(1.0..=50.0).contains(&d.attack_ms) || !(50.0..=2000.0).contains(&d.release_ms) {
            return Err(MixError::InvalidConfig(format!(
                "ducking attack {} ms / release {} ms outside [1, 50] / [50, 2000]",
                d.attack_ms, d.release_ms
            )));
        }
        if !(d.lookahead_ms >= 0.0) || !(d.activity_range_db > 0.0) {
            return Err(MixError::InvalidConfig("ducking look-ahead and range must be positive".into()));
        }

        let l = &self.limiter;
        if !(l.lookahead_ms > 0.0) || !(l.attack_ms > 0.0) || !(l.release_ms > 0.0) {
            return Err(MixError::InvalidConfig("limiter times must be positive".into()));
        }
        if l.attack_ms >= l.lookahead_ms {
            return Err(MixError::InvalidConfig(format!(
                "limiter attack {} ms must be shorter than look-ahead {} ms",
                l.attack_ms, l.lookahead_ms
            )));
        }

        Ok(())
    }
}

/// A margin must sit below 0 dBFS and above the word length's noise floor
pub fn validate_margin(margin_db: f64, bit_depth: u16) -> MixResult<()> {
    let floor_db = -6.02 * bit_depth as f64;
    let reason = if !margin_db.is_finite() {
        "not a finite level".to_string()
    } else if margin_db >= 0.0 {
        "ceiling must be below 0 dBFS".to_string()
    } else if margin_db <= floor_db {
        format!("ceiling below the {bit_depth}-bit range ({floor_db:.1} dB)")
    } else {
        return Ok(());
    };

    Err(MixError::MarginUnreachable { margin_db, reason })
}
