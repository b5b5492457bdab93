//! Spectral masking assessment between stems
//!
//! Each stem's mono downmix is cut into Hann-windowed STFT frames (no
//! centering). Per frame and band, two stems compete in proportion to
//! `min(Ea, Eb) / max(Ea, Eb)`; frames where the louder stem sits below the
//! activity floor count as zero. The band score is the mean over frames.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::config::{MixConfig, StftParams};
use crate::error::{MixError, MixResult};
use crate::stem::{Stem, StemRole};

/// Overlap of two stems in one band (0 = none, 1 = full)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaskingScore {
    /// First stem of the pair
    pub a: StemRole,
    /// Second stem of the pair
    pub b: StemRole,
    /// Band index into the configured edges
    pub band: usize,
    /// Lower band edge (Hz)
    pub low_hz: f64,
    /// Upper band edge (Hz)
    pub high_hz: f64,
    /// Overlap in [0, 1]
    pub score: f64,
}

/// All pairwise scores for one song
#[derive(Debug, Clone, PartialEq)]
pub struct MaskingMatrix {
    bands: Vec<(f64, f64)>,
    scores: Vec<MaskingScore>,
    band_levels_db: BTreeMap<StemRole, Vec<f64>>,
}

impl MaskingMatrix {
    /// Band limits (Hz)
    pub fn bands(&self) -> &[(f64, f64)] {
        &self.bands
    }

    /// Every pair and band
    pub fn scores(&self) -> &[MaskingScore] {
        &self.scores
    }

    /// Score for a pair in a band (order-independent, 0 when unknown)
    pub fn score(&self, a: StemRole, b: StemRole, band: usize) -> f64 {
        self.scores
            .iter()
            .find(|s| s.band == band && ((s.a == a && s.b == b) || (s.a == b && s.b == a)))
            .map_or(0.0, |s| s.score)
    }

    /// Mean band level of a stem (dB re. full-scale sine)
    pub fn band_level_db(&self, role: StemRole, band: usize) -> Option<f64> {
        self.band_levels_db.get(&role).and_then(|l| l.get(band)).copied()
    }

    /// Highest scores first
    pub fn strongest(&self, count: usize) -> Vec<MaskingScore> {
        let mut sorted = self.scores.clone();
        sorted.sort_by(|x, y| y.score.total_cmp(&x.score));
        sorted.truncate(count);
        sorted
    }
}

/// Per-frame band energies of one stem
#[derive(Debug, Clone)]
struct BandEnergies {
    role: StemRole,
    // frames × bands, normalized so a full-scale sine is about 1.0
    frames: Vec<Vec<f64>>,
}

impl BandEnergies {
    fn get(&self, frame: usize, band: usize) -> f64 {
        self.frames.get(frame).map_or(0.0, |f| f[band])
    }

    fn mean_level_db(&self, band: usize) -> f64 {
        if self.frames.is_empty() {
            return f64::NEG_INFINITY;
        }
        let mean = self.frames.iter().map(|f| f[band]).sum::<f64>() / self.frames.len() as f64;
        if mean > 0.0 { 10.0 * mean.log10() } else { f64::NEG_INFINITY }
    }
}

/// Produces a masking matrix, or nothing in demo mode
pub trait MaskingStrategy: Send + Sync {
    /// Score every pair of stems
    fn assess(&self, stems: &[&Stem]) -> MixResult<Option<MaskingMatrix>>;
}

/// Demo mode: masking is never assessed
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMasking;

impl MaskingStrategy for NoMasking {
    fn assess(&self, _stems: &[&Stem]) -> MixResult<Option<MaskingMatrix>> {
        Ok(None)
    }
}

/// STFT band-energy masking assessor
pub struct MaskingAssessor {
    stft: StftParams,
    fft: Arc<dyn RealToComplex<f64>>,
    window: Vec<f64>,
    bands: Vec<(f64, f64)>,
    // [first, last) bin per band
    bin_ranges: Vec<(usize, usize)>,
    floor: f64,
    norm: f64,
}

impl MaskingAssessor {
    /// Build assessor from the effective STFT geometry and band partition
    pub fn new(config: &MixConfig) -> Self {
        let stft = config.stft();
        let n = stft.fft_size;
        let sr = config.sample_rate as f64;

        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(n);

        // Periodic Hann
        let window: Vec<f64> = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos()))
            .collect();
        let window_sum: f64 = window.iter().sum();

        let nyquist = sr / 2.0;
        let bins = n / 2 + 1;
        let edges = &config.masking.band_edges_hz;
        let bands: Vec<(f64, f64)> = edges
            .windows(2)
            .map(|w| (w[0].min(nyquist), w[1].min(nyquist)))
            .collect();
        let bin_ranges = bands
            .iter()
            .map(|&(lo, hi)| {
                let first = ((lo * n as f64 / sr).ceil() as usize).min(bins);
                let last = ((hi * n as f64 / sr).ceil() as usize).min(bins);
                (first, last.max(first))
            })
            .collect();

        Self {
            stft,
            fft,
            window,
            bands,
            bin_ranges,
            floor: 10.0_f64.powf(config.masking.activity_floor_db / 10.0),
            norm: 4.0 / (window_sum * window_sum),
        }
    }

    /// Band partition in use
    pub fn bands(&self) -> &[(f64, f64)] {
        &self.bands
    }

    fn band_energies(&self, stem: &Stem) -> MixResult<BandEnergies> {
        let mono = stem.buffer.to_mono();
        let signal = &mono.samples;
        let n = self.stft.fft_size;
        let hop = self.stft.hop_size.max(1);

        let starts: Vec<usize> = if signal.len() <= n {
            vec![0]
        } else {
            (0..=signal.len() - n).step_by(hop).collect()
        };

        let mut input = self.fft.make_input_vec();
        let mut spectrum = vec![Complex::new(0.0, 0.0); n / 2 + 1];
        let mut frames = Vec::with_capacity(starts.len());

        for start in starts {
            for (i, slot) in input.iter_mut().enumerate() {
                *slot = signal.get(start + i).copied().unwrap_or(0.0) * self.window[i];
            }
            self.fft
                .process(&mut input, &mut spectrum)
                .map_err(|e| MixError::Analysis(e.to_string()))?;

            let energies = self
                .bin_ranges
                .iter()
                .map(|&(first, last)| {
                    spectrum[first..last].iter().map(|c| c.norm_sqr()).sum::<f64>() * self.norm
                })
                .collect();
            frames.push(energies);
        }

        Ok(BandEnergies {
            role: stem.role,
            frames,
        })
    }

    fn pair_score(&self, a: &BandEnergies, b: &BandEnergies, band: usize) -> f64 {
        if self.bin_ranges[band].0 == self.bin_ranges[band].1 {
            return 0.0;
        }
        let frames = a.frames.len().max(b.frames.len());
        if frames == 0 {
            return 0.0;
        }

        let total: f64 = (0..frames)
            .map(|t| {
                let (ea, eb) = (a.get(t, band), b.get(t, band));
                let loud = ea.max(eb);
                if loud > self.floor { ea.min(eb) / loud } else { 0.0 }
            })
            .sum();
        total / frames as f64
    }
}

impl MaskingStrategy for MaskingAssessor {
    fn assess(&self, stems: &[&Stem]) -> MixResult<Option<MaskingMatrix>> {
        let energies: Vec<BandEnergies> = stems
            .par_iter()
            .map(|stem| self.band_energies(stem))
            .collect::<MixResult<_>>()?;

        let mut scores = Vec::new();
        for (i, a) in energies.iter().enumerate() {
            for b in &energies[i + 1..] {
                for (band, &(low_hz, high_hz)) in self.bands.iter().enumerate() {
                    scores.push(MaskingScore {
                        a: a.role,
                        b: b.role,
                        band,
                        low_hz,
                        high_hz,
                        score: self.pair_score(a, b, band),
                    });
                }
            }
        }

        let band_levels_db = energies
            .iter()
            .map(|e| (e.role, (0..self.bands.len()).map(|b| e.mean_level_db(b)).collect()))
            .collect();

        Ok(Some(MaskingMatrix {
            bands: self.bands.clone(),
            scores,
            band_levels_db,
        }))
    }
}

/// Band index containing `freq_hz`
pub fn band_of(bands: &[(f64, f64)], freq_hz: f64) -> Option<usize> {
    bands.iter().position(|&(lo, hi)| freq_hz >= lo && freq_hz < hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rf_core::AudioBuffer;

    const SAMPLE_RATE: u32 = 48000;

    fn tone(role: StemRole, freq: f64, amplitude: f64, seconds: f64) -> Stem {
        let frames = (seconds * SAMPLE_RATE as f64) as usize;
        let samples = (0..frames)
            .map(|i| amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 / SAMPLE_RATE as f64).sin())
            .collect();
        Stem::new(role, AudioBuffer::mono(samples, SAMPLE_RATE))
    }

    fn assess(stems: &[Stem]) -> MaskingMatrix {
        let refs: Vec<&Stem> = stems.iter().collect();
        MaskingAssessor::new(&MixConfig::default().with_seed(1))
            .assess(&refs)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_same_band_tones_overlap() {
        let stems = [
            tone(StemRole::Drums, 100.0, 0.3, 1.0),
            tone(StemRole::Bass, 120.0, 0.3, 1.0),
        ];
        let matrix = assess(&stems);
        let band = band_of(matrix.bands(), 110.0).unwrap();

        let score = matrix.score(StemRole::Bass, StemRole::Drums, band);
        assert!(score > 0.5, "score {score}");
        assert_eq!(score, matrix.score(StemRole::Drums, StemRole::Bass, band));
    }

    #[test]
    fn test_separate_bands_do_not_overlap() {
        let stems = [
            tone(StemRole::Vocal, 2000.0, 0.3, 1.0),
            tone(StemRole::Bass, 80.0, 0.3, 1.0),
        ];
        let matrix = assess(&stems);
        let worst = matrix.strongest(1);
        assert!(worst[0].score < 0.05, "unexpected overlap {:?}", worst[0]);
    }

    #[test]
    fn test_quiet_partner_scores_low() {
        let stems = [
            tone(StemRole::Drums, 100.0, 0.5, 1.0),
            tone(StemRole::Bass, 120.0, 0.005, 1.0),
        ];
        let matrix = assess(&stems);
        let band = band_of(matrix.bands(), 110.0).unwrap();
        assert!(matrix.score(StemRole::Drums, StemRole::Bass, band) < 0.01);
    }

    #[test]
    fn test_silence_below_floor_scores_zero() {
        let stems = [
            tone(StemRole::Drums, 100.0, 0.0, 1.0),
            tone(StemRole::Bass, 100.0, 0.0, 1.0),
        ];
        let matrix = assess(&stems);
        assert!(matrix.scores().iter().all(|s| s.score == 0.0));
    }

    #[test]
    fn test_band_levels_track_amplitude() {
        let stems = [
            tone(StemRole::Drums, 1000.0, 0.5, 1.0),
            tone(StemRole::Other, 1000.0, 0.05, 1.0),
        ];
        let matrix = assess(&stems);
        let band = band_of(matrix.bands(), 1000.0).unwrap();
        let diff = matrix.band_level_db(StemRole::Drums, band).unwrap()
            - matrix.band_level_db(StemRole::Other, band).unwrap();
        assert_abs_diff_eq!(diff, 20.0, epsilon = 0.01);
    }

    #[test]
    fn test_short_stem_single_frame() {
        let stems = [
            tone(StemRole::Vocal, 500.0, 0.3, 0.01),
            tone(StemRole::Other, 500.0, 0.3, 0.01),
        ];
        let matrix = assess(&stems);
        let band = band_of(matrix.bands(), 500.0).unwrap();
        assert!(matrix.score(StemRole::Vocal, StemRole::Other, band) > 0.9);
    }

    #[test]
    fn test_no_masking_strategy() {
        let stem = tone(StemRole::Vocal, 440.0, 0.3, 0.5);
        assert!(NoMasking.assess(&[&stem]).unwrap().is_none());
    }
}
