//! Interleaved audio buffer shared by analysis, mixing and I/O

use crate::error::{RfError, RfResult};
use crate::{Sample, gain_to_db};

/// Audio buffer for offline processing (f64 for maximum precision)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved samples
    pub samples: Vec<Sample>,
    /// Number of channels
    pub channels: usize,
    /// Sample rate
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create empty buffer
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            channels,
            sample_rate,
        }
    }

    /// Create a buffer of `frames` zeroed frames
    pub fn silence(channels: usize, sample_rate: u32, frames: usize) -> Self {
        Self {
            samples: vec![0.0; frames * channels],
            channels,
            sample_rate,
        }
    }

    /// Wrap interleaved samples, checking that they form whole frames
    pub fn from_interleaved(samples: Vec<Sample>, channels: usize, sample_rate: u32) -> RfResult<Self> {
        if channels == 0 {
            return Err(RfError::InvalidParam("buffer needs at least one channel".into()));
        }
        if sample_rate == 0 {
            return Err(RfError::InvalidSampleRate(sample_rate));
        }
        if samples.len() % channels != 0 {
            return Err(RfError::InvalidParam(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Mono buffer from a single channel
    pub fn mono(samples: Vec<Sample>, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: 1,
            sample_rate,
        }
    }

    /// Interleave planar channels of equal length
    pub fn from_channels(channels: &[Vec<Sample>], sample_rate: u32) -> RfResult<Self> {
        let Some(first) = channels.first() else {
            return Err(RfError::InvalidParam("no channels given".into()));
        };
        let frames = first.len();
        if let Some(bad) = channels.iter().find(|c| c.len() != frames) {
            return Err(RfError::InvalidParam(format!(
                "planar channel length {} differs from {}",
                bad.len(),
                frames
            )));
        }

        let mut samples = Vec::with_capacity(frames * channels.len());
        for frame in 0..frames {
            for channel in channels {
                samples.push(channel[frame]);
            }
        }

        Self::from_interleaved(samples, channels.len(), sample_rate)
    }

    /// Number of frames
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels
        }
    }

    /// True when the buffer holds no frames
    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 / self.sample_rate as f64
        }
    }

    /// Samples of one frame
    #[inline]
    pub fn frame(&self, index: usize) -> &[Sample] {
        let start = index * self.channels;
        &self.samples[start..start + self.channels]
    }

    /// Get channel (non-interleaved copy)
    pub fn channel(&self, channel: usize) -> Vec<Sample> {
        if channel >= self.channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .copied()
            .collect()
    }

    /// Split into planar channels
    pub fn to_planar(&self) -> Vec<Vec<Sample>> {
        (0..self.channels).map(|ch| self.channel(ch)).collect()
    }

    /// Mono downmix (channel average)
    pub fn to_mono(&self) -> AudioBuffer {
        if self.channels == 1 {
            return self.clone();
        }

        let scale = 1.0 / self.channels as f64;
        let samples = self
            .samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f64>() * scale)
            .collect();

        AudioBuffer {
            samples,
            channels: 1,
            sample_rate: self.sample_rate,
        }
    }

    /// Convert between mono and stereo layouts
    pub fn with_channels(&self, channels: usize) -> RfResult<AudioBuffer> {
        match (self.channels, channels) {
            (from, to) if from == to => Ok(self.clone()),
            (_, 1) => Ok(self.to_mono()),
            (1, to) => {
                let mut samples = Vec::with_capacity(self.samples.len() * to);
                for &sample in &self.samples {
                    samples.extend(std::iter::repeat_n(sample, to));
                }
                Ok(AudioBuffer {
                    samples,
                    channels: to,
                    sample_rate: self.sample_rate,
                })
            }
            (from, to) => Err(RfError::ChannelMismatch {
                expected: to,
                actual: from,
            }),
        }
    }

    /// Apply gain
    pub fn apply_gain(&mut self, gain: f64) {
        for sample in &mut self.samples {
            *sample *= gain;
        }
    }

    /// Get peak level (linear)
    pub fn peak(&self) -> f64 {
        self.samples.iter().fold(0.0_f64, |acc, s| acc.max(s.abs()))
    }

    /// Get peak level (dB)
    pub fn peak_db(&self) -> f64 {
        gain_to_db(self.peak())
    }
}
