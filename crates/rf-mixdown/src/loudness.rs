//! Loudness analysis with EBU R128 compliant LUFS metering
//!
//! Implements:
//! - K-weighting pre-filter (ITU-R BS.1770-4)
//! - Short-term curve: 400 ms window, 100 ms hop
//! - Integrated loudness with absolute gating (-70 LUFS) and relative gating (-10 LU)
//! - True peak via [`crate::true_peak`]

use rf_core::AudioBuffer;
use serde::{Deserialize, Serialize};

use crate::error::{MixError, MixResult};
use crate::stem::StemRole;
use crate::true_peak;

/// Absolute gate (LUFS)
pub const ABSOLUTE_GATE_LUFS: f64 = -70.0;

/// Relative gate below the ungated mean (LU)
pub const RELATIVE_GATE_LU: f64 = -10.0;

/// Sub-block hop (seconds)
const HOP_SECONDS: f64 = 0.1;

/// Sub-blocks per 400 ms window
const BLOCK_HOPS: usize = 4;

// ═══════════════════════════════════════════════════════════════════════════════
// K-WEIGHTING FILTER — ITU-R BS.1770-4
// ═══════════════════════════════════════════════════════════════════════════════

/// One transposed direct form II biquad
#[derive(Debug, Clone, Copy)]
struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn new((b0, b1, b2, a1, a2): (f64, f64, f64, f64, f64)) -> Self {
        Self {
            b0,
            b1,
            b2,
            a1,
            a2,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        let out = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * out + self.z2;
        self.z2 = self.b2 * input - self.a2 * out;
        out
    }
}

/// K-weighting pre-filter (two stages)
/// Stage 1: High shelf boost (+4dB above ~1.7kHz)
/// Stage 2: High-pass filter (~38Hz, RLB)
#[derive(Debug, Clone)]
pub struct KWeightingFilter {
    shelf: Biquad,
    high_pass: Biquad,
}

impl KWeightingFilter {
    /// Create K-weighting filter for given sample rate
    pub fn new(sample_rate: f64) -> Self {
        Self {
            shelf: Biquad::new(Self::high_shelf_coeffs(sample_rate)),
            high_pass: Biquad::new(Self::high_pass_coeffs(sample_rate)),
        }
    }

    /// High shelf filter coefficients for K-weighting
    fn high_shelf_coeffs(fs: f64) -> (f64, f64, f64, f64, f64) {
        if (fs - 48000.0).abs() < 1.0 {
            // 48 kHz coefficients (ITU-R BS.1770-4)
            (
                1.53512485958697,
                -2.69169618940638,
                1.19839281085285,
                -1.69065929318241,
                0.73248077421585,
            )
        } else {
            let gain_db = 3.999843853973347;
            let f0 = 1681.974450955533;
            let q = 0.7071752369554196;

            let k = (std::f64::consts::PI * f0 / fs).tan();
            let vh = 10.0_f64.powf(gain_db / 20.0);
            let vb = vh.powf(0.4996667741545416);
            let a0 = 1.0 + k / q + k * k;

            (
                (vh + vb * k / q + k * k) / a0,
                2.0 * (k * k - vh) / a0,
                (vh - vb * k / q + k * k) / a0,
                2.0 * (k * k - 1.0) / a0,
                (1.0 - k / q + k * k) / a0,
            )
        }
    }

    /// High-pass filter coefficients for K-weighting
    fn high_pass_coeffs(fs: f64) -> (f64, f64, f64, f64, f64) {
        if (fs - 48000.0).abs() < 1.0 {
            // 48 kHz coefficients (ITU-R BS.1770-4)
            (1.0, -2.0, 1.0, -1.99004745483398, 0.99007225036621)
        } else {
            let f0 = 38.13547087602444;
            let q = 0.5003270373238773;

            let k = (std::f64::consts::PI * f0 / fs).tan();
            let a0 = 1.0 + k / q + k * k;

            (
                1.0,
                -2.0,
                1.0,
                2.0 * (k * k - 1.0) / a0,
                (1.0 - k / q + k * k) / a0,
            )
        }
    }

    /// Process single sample through K-weighting filter
    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let shelved = self.shelf.process(input);
        self.high_pass.process(shelved)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOUDNESS PROFILE
// ═══════════════════════════════════════════════════════════════════════════════

/// One point of the short-term loudness curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessPoint {
    /// Window end (seconds)
    pub time_s: f64,
    /// Loudness of the 400 ms window (LUFS, `-inf` for digital silence)
    pub lufs: f64,
}

/// Loudness measurement of one stem
#[derive(Debug, Clone, PartialEq)]
pub struct LoudnessProfile {
    /// Stem this profile belongs to
    pub role: StemRole,
    /// Short-term curve
    pub curve: Vec<LoudnessPoint>,
    /// Gated integrated loudness (LUFS)
    pub integrated_lufs: f64,
    /// Oversampled true peak (dBTP)
    pub true_peak_db: f64,
    /// Sample peak (dBFS)
    pub sample_peak_db: f64,
    /// Spread of the gated curve, 10th to 95th percentile (LU)
    pub loudness_range_lu: f64,
}

/// Convert a weighted mean square to LUFS
#[inline]
pub fn power_to_lufs(mean_square: f64) -> f64 {
    if mean_square <= 0.0 {
        f64::NEG_INFINITY
    } else {
        -0.691 + 10.0 * mean_square.log10()
    }
}

/// Channel weighting (1.0 for L/R/C, 1.41 for surrounds)
#[inline]
fn channel_weight(channel: usize) -> f64 {
    if channel < 3 { 1.0 } else { 1.41 }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOUDNESS ANALYZER
// ═══════════════════════════════════════════════════════════════════════════════

/// Produces [`LoudnessProfile`]s
#[derive(Debug, Clone, Copy)]
pub struct LoudnessAnalyzer {
    oversample: usize,
}

impl LoudnessAnalyzer {
    /// Create analyzer with the given true-peak oversampling factor
    pub fn new(oversample: usize) -> Self {
        Self { oversample }
    }

    /// Measure one stem.
    ///
    /// Fails with [`MixError::InsufficientSignal`] when no block clears the
    /// absolute gate.
    pub fn analyze(&self, role: StemRole, buffer: &AudioBuffer) -> MixResult<LoudnessProfile> {
        let blocks = block_powers(buffer);
        let integrated_lufs =
            gated_loudness(&blocks).ok_or(MixError::InsufficientSignal { role })?;

        let hop = HOP_SECONDS;
        let full_window = blocks.len() > 1 || buffer.duration() >= hop * BLOCK_HOPS as f64;
        let curve: Vec<LoudnessPoint> = blocks
            .iter()
            .enumerate()
            .map(|(i, &z)| LoudnessPoint {
                time_s: if full_window {
                    (i + BLOCK_HOPS) as f64 * hop
                } else {
                    buffer.duration()
                },
                lufs: power_to_lufs(z),
            })
            .collect();

        let loudness_range_lu = loudness_range(&curve);
        let true_peak_db = true_peak::true_peak_db(buffer, self.oversample);
        let sample_peak_db = buffer.peak_db();

        log::debug!(
            "{role}: {integrated_lufs:.2} LUFS, {true_peak_db:.2} dBTP, LRA {loudness_range_lu:.1} LU"
        );

        Ok(LoudnessProfile {
            role,
            curve,
            integrated_lufs,
            true_peak_db,
            sample_peak_db,
            loudness_range_lu,
        })
    }
}

/// K-weighted mean square of each 400 ms block, hopping 100 ms.
///
/// A buffer shorter than one block yields a single block over its length.
pub fn block_powers(buffer: &AudioBuffer) -> Vec<f64> {
    let frames = buffer.frames();
    if frames == 0 {
        return Vec::new();
    }

    let sr = buffer.sample_rate as f64;
    let hop_len = ((sr * HOP_SECONDS).round() as usize).max(1);

    let mut filters: Vec<KWeightingFilter> =
        (0..buffer.channels).map(|_| KWeightingFilter::new(sr)).collect();

    // Sum of weighted squares per 100 ms hop
    let mut hops = Vec::with_capacity(frames / hop_len + 1);
    let mut acc = 0.0;
    let mut total = 0.0;
    for (i, frame) in buffer.samples.chunks_exact(buffer.channels).enumerate() {
        for (ch, &sample) in frame.iter().enumerate() {
            let weighted = filters[ch].process(sample);
            acc += weighted * weighted * channel_weight(ch);
        }
        if (i + 1) % hop_len == 0 {
            hops.push(acc);
            total += acc;
            acc = 0.0;
        }
    }

    if hops.len() < BLOCK_HOPS {
        return vec![(total + acc) / frames as f64];
    }

    let block_len = (hop_len * BLOCK_HOPS) as f64;
    hops.windows(BLOCK_HOPS)
        .map(|w| w.iter().sum::<f64>() / block_len)
        .collect()
}

/// Two-stage gated loudness over block powers; `None` when everything is gated out
pub fn gated_loudness(blocks: &[f64]) -> Option<f64> {
    let above_absolute: Vec<f64> = blocks
        .iter()
        .copied()
        .filter(|&z| power_to_lufs(z) > ABSOLUTE_GATE_LUFS)
        .collect();
    if above_absolute.is_empty() {
        return None;
    }

    let ungated = above_absolute.iter().sum::<f64>() / above_absolute.len() as f64;
    let relative_gate = power_to_lufs(ungated) + RELATIVE_GATE_LU;

    let (sum, count) = above_absolute
        .iter()
        .filter(|&&z| power_to_lufs(z) > relative_gate)
        .fold((0.0, 0usize), |(s, n), &z| (s + z, n + 1));

    // The loudest block always clears the relative gate
    if count == 0 {
        return None;
    }
    Some(power_to_lufs(sum / count as f64))
}

/// Integrated loudness of a whole buffer (LUFS), `None` below the absolute gate
pub fn integrated_loudness(buffer: &AudioBuffer) -> Option<f64> {
    gated_loudness(&block_powers(buffer))
}

/// 10th to 95th percentile spread of the gated curve
fn loudness_range(curve: &[LoudnessPoint]) -> f64 {
    let mut gated: Vec<f64> = curve
        .iter()
        .map(|p| p.lufs)
        .filter(|&l| l > ABSOLUTE_GATE_LUFS)
        .collect();
    if gated.len() < 2 {
        return 0.0;
    }

    let mean_power = gated.iter().map(|l| 10.0_f64.powf((l + 0.691) / 10.0)).sum::<f64>()
        / gated.len() as f64;
    let relative_gate = power_to_lufs(mean_power) - 20.0;
    gated.retain(|&l| l > relative_gate);
    gated.sort_by(|a, b| a.total_cmp(b));

    let percentile = |p: f64| {
        let idx = ((gated.len() - 1) as f64 * p).round() as usize;
        gated[idx]
    };
    percentile(0.95) - percentile(0.10)
}
