//! Mix bus summation

use rf_core::{AudioBuffer, RfError, RfResult};

use crate::ducking::DuckingEnvelope;
use crate::stem::Stem;

/// Interleaved accumulator for one song.
///
/// Sized to the longest stem; shorter stems contribute silence after their end.
#[derive(Debug, Clone)]
pub struct MixBus {
    buffer: AudioBuffer,
}

impl MixBus {
    /// Silent bus
    pub fn new(channels: usize, sample_rate: u32, frames: usize) -> Self {
        Self {
            buffer: AudioBuffer::silence(channels.max(1), sample_rate, frames),
        }
    }

    /// Silent bus matching a stem layout, long enough for every stem
    pub fn for_stems(stems: &[&Stem]) -> Self {
        let channels = stems.first().map_or(1, |s| s.buffer.channels);
        let sample_rate = stems.first().map_or(rf_core::DEFAULT_SAMPLE_RATE, |s| s.buffer.sample_rate);
        let frames = stems.iter().map(|s| s.buffer.frames()).max().unwrap_or(0);
        Self::new(channels, sample_rate, frames)
    }

    /// Accumulate a stem at a static linear gain; drums and bass also follow `envelope`
    pub fn add(&mut self, stem: &Stem, gain: f64, envelope: &DuckingEnvelope) -> RfResult<()> {
        let channels = self.buffer.channels;
        if stem.buffer.channels != channels {
            return Err(RfError::ChannelMismatch {
                expected: channels,
                actual: stem.buffer.channels,
            });
        }
        if gain == 0.0 {
            return Ok(());
        }

        let ducked = stem.role.is_ducked() && !envelope.is_identity();
        let frames = stem.buffer.frames().min(self.buffer.frames());

        for i in 0..frames {
            let g = if ducked { gain * envelope.gain(i) } else { gain };
            let base = i * channels;
            for (out, &input) in self.buffer.samples[base..base + channels]
                .iter_mut()
                .zip(&stem.buffer.samples[base..base + channels])
            {
                *out += input * g;
            }
        }
        Ok(())
    }

    /// Sum every stem with a per-role gain
    pub fn sum(
        stems: &[&Stem],
        gain_of: impl Fn(&Stem) -> f64,
        envelope: &DuckingEnvelope,
    ) -> RfResult<Self> {
        let mut bus = Self::for_stems(stems);
        for stem in stems {
            bus.add(stem, gain_of(stem), envelope)?;
        }
        Ok(bus)
    }

    /// Length in frames
    pub fn frames(&self) -> usize {
        self.buffer.frames()
    }

    /// Current contents
    pub fn buffer(&self) -> &AudioBuffer {
        &self.buffer
    }

    /// Hand the bus to the limiter
    pub fn into_buffer(self) -> AudioBuffer {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stem::StemRole;

    fn stem(role: StemRole, samples: Vec<f64>) -> Stem {
        Stem::new(role, AudioBuffer::mono(samples, 48000))
    }

    #[test]
    fn test_sum_pads_shorter_stems() {
        let vocal = stem(StemRole::Vocal, vec![0.5; 4]);
        let other = stem(StemRole::Other, vec![0.25; 2]);
        let bus = MixBus::sum(&[&vocal, &other], |_| 1.0, &DuckingEnvelope::identity(4)).unwrap();

        assert_eq!(bus.frames(), 4);
        assert_eq!(bus.buffer().samples, vec![0.75, 0.75, 0.5, 0.5]);
    }

    #[test]
    fn test_envelope_only_reaches_ducked_roles() {
        let vocal = stem(StemRole::Vocal, vec![1.0; 3]);
        let drums = stem(StemRole::Drums, vec![1.0; 3]);
        let mut bus = MixBus::new(1, 48000, 3);
        let env = DuckingEnvelope::from_gains(vec![1.0, 0.5, 0.25]);

        bus.add(&vocal, 1.0, &env).unwrap();
        assert_eq!(bus.buffer().samples, vec![1.0, 1.0, 1.0]);

        bus.add(&drums, 2.0, &env).unwrap();
        assert_eq!(bus.buffer().samples, vec![3.0, 2.0, 1.5]);
    }

    #[test]
    fn test_channel_mismatch_rejected() {
        let stereo = Stem::new(
            StemRole::Bass,
            AudioBuffer::from_interleaved(vec![0.0; 8], 2, 48000).unwrap(),
        );
        let mut bus = MixBus::new(1, 48000, 4);
        assert!(bus.add(&stereo, 1.0, &DuckingEnvelope::identity(4)).is_err());
    }
}
