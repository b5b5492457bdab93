//! Oversampled true-peak detection (ITU-R BS.1770-4, Annex 2)
//!
//! A polyphase Kaiser-windowed sinc interpolator reconstructs `factor - 1`
//! points between every pair of samples. Phase 0 is the original sample, so
//! the detector never reports less than the sample peak. The same detector
//! drives the analyzer, the limiter's gain computer and output verification.

use rf_core::{AudioBuffer, gain_to_db};

/// Interpolator taps on each side of the reconstructed point
const HALF_TAPS: usize = 8;

/// Kaiser window shape
const KAISER_BETA: f64 = 4.5;

/// Streaming true-peak detector for one channel
#[derive(Debug, Clone)]
pub struct TruePeakDetector {
    factor: usize,
    // phases[p][t] weights x[n - t] for the point at n - HALF_TAPS + p / factor
    phases: Vec<Vec<f64>>,
    history: Vec<f64>,
    pos: usize,
    max_peak: f64,
}

impl TruePeakDetector {
    /// Create detector with the given oversampling factor (minimum 4)
    pub fn new(factor: usize) -> Self {
        let factor = factor.max(4);
        let taps = 2 * HALF_TAPS;

        let phases = (0..factor)
            .map(|phase| {
                let frac = phase as f64 / factor as f64;
                let mut coeffs: Vec<f64> = (0..taps)
                    .map(|tap| {
                        let u = tap as f64 - HALF_TAPS as f64 + frac;
                        sinc(u) * kaiser(u / HALF_TAPS as f64)
                    })
                    .collect();

                // Unity DC gain per phase
                let sum: f64 = coeffs.iter().sum();
                if sum.abs() > 1e-12 {
                    for c in &mut coeffs {
                        *c /= sum;
                    }
                }
                coeffs
            })
            .collect();

        Self {
            factor,
            phases,
            history: vec![0.0; taps],
            pos: 0,
            max_peak: 0.0,
        }
    }

    /// Samples of delay between input and the interval reported by [`process`](Self::process)
    pub const fn latency() -> usize {
        HALF_TAPS
    }

    /// Oversampling factor
    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Push one sample; returns the peak magnitude over the interval
    /// `[n - latency, n - latency + 1)` where `n` is this sample's index
    #[inline]
    pub fn process(&mut self, sample: f64) -> f64 {
        let taps = self.history.len();
        self.history[self.pos] = sample;

        let mut peak = 0.0_f64;
        for coeffs in &self.phases {
            let mut sum = 0.0;
            for (tap, &c) in coeffs.iter().enumerate() {
                let idx = (self.pos + taps - tap) % taps;
                sum += self.history[idx] * c;
            }
            peak = peak.max(sum.abs());
        }

        self.pos = (self.pos + 1) % taps;
        self.max_peak = self.max_peak.max(peak);
        peak
    }

    /// Largest peak seen so far (linear)
    pub fn max_peak(&self) -> f64 {
        self.max_peak
    }

    /// Reset detector
    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.pos = 0;
        self.max_peak = 0.0;
    }
}

/// Normalized sinc
#[inline]
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-10 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

/// Kaiser window at normalized position `x` in [-1, 1]
fn kaiser(x: f64) -> f64 {
    if x.abs() > 1.0 {
        return 0.0;
    }
    bessel_i0(KAISER_BETA * (1.0 - x * x).sqrt()) / bessel_i0(KAISER_BETA)
}

/// Modified Bessel function of the first kind, order 0
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let x_half = x / 2.0;

    for k in 1..25 {
        term *= (x_half / k as f64).powi(2);
        sum += term;
        if term < 1e-12 * sum {
            break;
        }
    }

    sum
}

/// Per-frame true peak across channels.
///
/// Entry `k` is the largest reconstructed magnitude in `[k, k + 1)`.
pub fn interval_peaks(buffer: &AudioBuffer, factor: usize) -> Vec<f64> {
    let frames = buffer.frames();
    let latency = TruePeakDetector::latency();
    let mut peaks = vec![0.0_f64; frames];

    for ch in 0..buffer.channels {
        let mut detector = TruePeakDetector::new(factor);
        let input = buffer
            .samples
            .iter()
            .skip(ch)
            .step_by(buffer.channels)
            .copied()
            .chain(std::iter::repeat_n(0.0, latency));

        for (n, sample) in input.enumerate() {
            let peak = detector.process(sample);
            if n >= latency {
                let k = n - latency;
                peaks[k] = peaks[k].max(peak);
            }
        }
    }

    peaks
}

/// Whole-buffer true peak (linear)
pub fn true_peak(buffer: &AudioBuffer, factor: usize) -> f64 {
    interval_peaks(buffer, factor)
        .into_iter()
        .fold(0.0_f64, f64::max)
}

/// Whole-buffer true peak (dBTP)
pub fn true_peak_db(buffer: &AudioBuffer, factor: usize) -> f64 {
    gain_to_db(true_peak(buffer, factor))
}
