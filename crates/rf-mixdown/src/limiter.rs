//! True-peak limiting for the mix bus
//!
//! Features:
//! - Gain computer driven by the oversampled true-peak detector
//! - Look-ahead delay with a sliding-minimum peak hold
//! - Linear attack ramp that completes before the peak arrives
//! - Exponential release
//! - Static trim fallback, verified with the same detector

use std::collections::VecDeque;

use rf_core::{AudioBuffer, db_to_gain, gain_to_db};

use crate::config::{LimiterSettings, MixConfig, validate_margin};
use crate::error::MixResult;
use crate::true_peak::{interval_peaks, true_peak};

/// Limiter result for one track
#[derive(Debug, Clone)]
pub struct LimiterOutcome {
    /// Limited (and possibly trimmed) audio
    pub buffer: AudioBuffer,
    /// Deepest gain reduction applied by the envelope (dB, positive)
    pub max_reduction_db: f64,
    /// Static trim applied after limiting (dB, negative)
    pub trim_db: Option<f64>,
    /// True peak of `buffer` (dBTP)
    pub true_peak_db: f64,
}

/// Per-track limiter state
#[derive(Debug)]
struct LimiterState {
    channels: usize,
    lookahead: usize,
    attack: usize,
    release_coeff: f64,
    /// Delay ring, `lookahead` frames
    delay: Vec<f64>,
    delay_pos: usize,
    /// Monotonic (index, gain) deque; front is the minimum over the window
    window: VecDeque<(usize, f64)>,
    ramp: VecDeque<f64>,
    ramp_sum: f64,
    envelope: f64,
    min_gain: f64,
    /// Frames pushed so far, padding included
    pushed: usize,
}

impl LimiterState {
    fn new(channels: usize, lookahead: usize, attack: usize, release_coeff: f64) -> Self {
        Self {
            channels,
            lookahead,
            attack,
            release_coeff,
            delay: vec![0.0; lookahead * channels],
            delay_pos: 0,
            window: VecDeque::with_capacity(lookahead + 1),
            ramp: VecDeque::with_capacity(attack + 1),
            ramp_sum: 0.0,
            envelope: 1.0,
            min_gain: 1.0,
            pushed: 0,
        }
    }

    /// Push one input frame and its required gain.
    ///
    /// Returns the gain for the frame `lookahead - 1` pushes back, written to
    /// `out` with that frame, once the delay line has filled.
    fn push(&mut self, frame: &[f64], required: f64, out: &mut [f64]) -> Option<f64> {
        let j = self.pushed;
        self.pushed += 1;

        // Peak hold: minimum required gain over the look-ahead window
        while self.window.back().is_some_and(|&(_, g)| g >= required) {
            self.window.pop_back();
        }
        self.window.push_back((j, required));
        while self.window.front().is_some_and(|&(i, _)| i + self.lookahead <= j) {
            self.window.pop_front();
        }

        // Delay line
        let ch = self.channels;
        let slot = self.delay_pos * ch;
        self.delay[slot..slot + ch].copy_from_slice(frame);
        self.delay_pos = (self.delay_pos + 1) % self.lookahead;
        let oldest = self.delay_pos * ch;

        if j + 1 < self.lookahead {
            return None;
        }

        // Attack ramp
        let held = self.window.front().map_or(1.0, |&(_, g)| g);
        self.ramp.push_back(held);
        self.ramp_sum += held;
        if self.ramp.len() > self.attack {
            if let Some(old) = self.ramp.pop_front() {
                self.ramp_sum -= old;
            }
        }
        let smoothed = self.ramp_sum / self.ramp.len() as f64;

        // Release
        self.envelope = if smoothed < self.envelope {
            smoothed
        } else {
            self.release_coeff * self.envelope + (1.0 - self.release_coeff) * smoothed
        };

        for (o, &x) in out.iter_mut().zip(&self.delay[oldest..oldest + ch]) {
            *o = x * self.envelope;
        }
        Some(self.envelope)
    }
}

/// Look-ahead true-peak limiter
#[derive(Debug, Clone)]
pub struct TruePeakLimiter {
    ceiling_db: f64,
    ceiling: f64,
    lookahead: usize,
    attack: usize,
    release_coeff: f64,
    oversample: usize,
}

impl TruePeakLimiter {
    /// Create limiter; fails with `MarginUnreachable` for an invalid ceiling
    pub fn new(
        settings: &LimiterSettings,
        ceiling_db: f64,
        bit_depth: u16,
        sample_rate: u32,
        oversample: usize,
    ) -> MixResult<Self> {
        validate_margin(ceiling_db, bit_depth)?;

        let sr = sample_rate as f64;
        let lookahead = ((settings.lookahead_ms * sr / 1000.0).round() as usize).max(2);
        let attack = ((settings.attack_ms * sr / 1000.0).round() as usize).clamp(1, lookahead - 1);
        let release_coeff = (-1.0 / (settings.release_ms * sr / 1000.0)).exp();

        Ok(Self {
            ceiling_db,
            ceiling: db_to_gain(ceiling_db),
            lookahead,
            attack,
            release_coeff,
            oversample,
        })
    }

    /// Limiter for a mix config
    pub fn from_config(config: &MixConfig) -> MixResult<Self> {
        Self::new(
            &config.limiter,
            config.truepeak_margin_db,
            config.bit_depth,
            config.sample_rate,
            config.oversample(),
        )
    }

    /// Ceiling (dBTP)
    pub fn ceiling_db(&self) -> f64 {
        self.ceiling_db
    }

    /// Look-ahead in frames
    pub fn lookahead(&self) -> usize {
        self.lookahead
    }

    /// Gain each frame must not exceed: both intervals touching the sample
    fn required_gains(&self, buffer: &AudioBuffer) -> Vec<f64> {
        let interval: Vec<f64> = interval_peaks(buffer, self.oversample)
            .into_iter()
            .map(|p| if p > self.ceiling { self.ceiling / p } else { 1.0 })
            .collect();

        interval
            .iter()
            .enumerate()
            .map(|(k, &r)| if k > 0 { r.min(interval[k - 1]) } else { r })
            .collect()
    }

    /// Limit a whole track. Output has the same length as the input.
    pub fn process(&self, input: &AudioBuffer) -> LimiterOutcome {
        let channels = input.channels;
        let frames = input.frames();
        let required = self.required_gains(input);

        let mut state = LimiterState::new(channels, self.lookahead, self.attack, self.release_coeff);
        let mut output = AudioBuffer::silence(channels, input.sample_rate, frames);
        let silence = vec![0.0; channels];
        let mut scratch = vec![0.0; channels];

        // Leading padding lets the ramp settle before frame 0
        let lead = self.attack;
        let total = lead + frames + self.lookahead - 1;
        let mut written = 0usize;

        for j in 0..total {
            let (frame, gain) = match j.checked_sub(lead).filter(|&k| k < frames) {
                Some(k) => (input.frame(k), required[k]),
                None => (silence.as_slice(), 1.0),
            };

            if let Some(g) = state.push(frame, gain, &mut scratch) {
                let emitted = j + 1 - self.lookahead;
                if emitted >= lead && written < frames {
                    state.min_gain = state.min_gain.min(g);
                    let base = written * channels;
                    output.samples[base..base + channels].copy_from_slice(&scratch);
                    written += 1;
                }
            }
        }

        let max_reduction_db = -gain_to_db(state.min_gain);
        if max_reduction_db > 0.0 {
            log::debug!("limiter: max reduction {max_reduction_db:.2} dB");
        }

        // Verify with the same detector; trim whatever the envelope missed
        let mut peak = true_peak(&output, self.oversample);
        let mut trim_db = None;
        if peak > self.ceiling {
            let trim = self.ceiling / peak;
            output.apply_gain(trim);
            peak *= trim;
            let db = gain_to_db(trim);
            log::warn!("limiter: residual overshoot, static trim {db:.3} dB");
            trim_db = Some(db);
        }

        LimiterOutcome {
            buffer: output,
            max_reduction_db,
            trim_db,
            true_peak_db: gain_to_db(peak),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    const SAMPLE_RATE: u32 = 48000;

    fn limiter(ceiling_db: f64) -> TruePeakLimiter {
        TruePeakLimiter::new(&LimiterSettings::default(), ceiling_db, 24, SAMPLE_RATE, 4).unwrap()
    }

    fn sine(freq: f64, amplitude: f64, frames: usize) -> AudioBuffer {
        let samples = (0..frames)
            .map(|i| amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 / SAMPLE_RATE as f64).sin())
            .collect();
        AudioBuffer::mono(samples, SAMPLE_RATE)
    }

    #[test]
    fn test_quiet_signal_passes_unchanged() {
        let input = sine(440.0, 0.25, 4800);
        let outcome = limiter(-1.0).process(&input);

        assert_eq!(outcome.buffer.frames(), input.frames());
        assert_eq!(outcome.max_reduction_db, 0.0);
        assert!(outcome.trim_db.is_none());
        for (a, b) in input.samples.iter().zip(&outcome.buffer.samples) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_loud_sine_held_under_ceiling() {
        let input = sine(997.0, 2.0, 48000);
        let outcome = limiter(-1.0).process(&input);

        assert!(outcome.true_peak_db <= -1.0 + 1e-9);
        assert!(outcome.max_reduction_db > 6.0);
        assert!(true_peak(&outcome.buffer, 4) <= db_to_gain(-1.0) + 1e-9);
    }

    #[test]
    fn test_clipping_level_noise_with_intersample_peaks() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let samples: Vec<f64> = (0..48000)
            .map(|_| if rng.random_bool(0.5) { 1.0 } else { -1.0 })
            .collect();
        let input = AudioBuffer::from_interleaved(samples, 2, SAMPLE_RATE).unwrap();

        let outcome = limiter(-1.0).process(&input);
        assert!(outcome.true_peak_db <= -1.0 + 0.2);
        assert_eq!(outcome.buffer.frames(), input.frames());
    }

    #[test]
    fn test_lookahead_reduces_before_transient() {
        let mut samples = vec![0.1; 2000];
        samples[1000] = 1.0;
        let input = AudioBuffer::mono(samples, SAMPLE_RATE);
        let lim = limiter(-6.0);
        let outcome = lim.process(&input);

        // The ramp has started well before the spike
        let ratio = outcome.buffer.samples[1000 - lim.attack / 2] / 0.1;
        assert!(ratio < 1.0, "gain before the transient {ratio}");
        assert!(outcome.buffer.samples[1000] <= db_to_gain(-6.0) + 1e-9);
    }

    #[test]
    fn test_invalid_ceiling() {
        assert!(TruePeakLimiter::new(&LimiterSettings::default(), 0.0, 24, SAMPLE_RATE, 4).is_err());
        assert!(TruePeakLimiter::new(&LimiterSettings::default(), -120.0, 16, SAMPLE_RATE, 4).is_err());
    }

    #[test]
    fn test_empty_input() {
        let input = AudioBuffer::silence(2, SAMPLE_RATE, 0);
        let outcome = limiter(-1.0).process(&input);
        assert!(outcome.buffer.is_empty());
    }
}
