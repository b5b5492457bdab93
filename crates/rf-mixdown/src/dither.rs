//! TPDF dither and integer quantization

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rf_core::AudioBuffer;

use crate::error::{MixError, MixResult};

/// Final mix at the output word length
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMix {
    /// Quantized samples as float (`pcm / 2^(bits - 1)`)
    pub buffer: AudioBuffer,
    /// Interleaved integer samples
    pub pcm: Vec<i32>,
    /// Word length
    pub bit_depth: u16,
}

impl RenderedMix {
    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.buffer.duration()
    }
}

/// Triangular-PDF ditherer
#[derive(Debug, Clone)]
pub struct Ditherer {
    bit_depth: u16,
    rng: ChaCha8Rng,
}

impl Ditherer {
    /// Ditherer for 16 or 24 bit output. A seed makes the noise repeatable;
    /// without one the generator is seeded from the OS.
    pub fn new(bit_depth: u16, seed: Option<u64>) -> MixResult<Self> {
        if bit_depth != 16 && bit_depth != 24 {
            return Err(MixError::InvalidConfig(format!(
                "bit_depth {bit_depth} (supported: 16, 24)"
            )));
        }
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        Ok(Self { bit_depth, rng })
    }

    /// Full-scale integer magnitude, `2^(bits - 1)`
    pub fn scale(&self) -> f64 {
        (1_i64 << (self.bit_depth - 1)) as f64
    }

    /// Dither and quantize with saturation
    pub fn render(&mut self, input: &AudioBuffer) -> RenderedMix {
        let scale = self.scale();
        let lsb = 1.0 / scale;
        let min = -scale;
        let max = scale - 1.0;

        let pcm: Vec<i32> = input
            .samples
            .iter()
            .map(|&s| {
                let noise = (self.rng.random::<f64>() - self.rng.random::<f64>()) * lsb;
                ((s + noise) * scale).round().clamp(min, max) as i32
            })
            .collect();

        let samples = pcm.iter().map(|&q| q as f64 / scale).collect();
        RenderedMix {
            buffer: AudioBuffer {
                samples,
                channels: input.channels,
                sample_rate: input.sample_rate,
            },
            pcm,
            bit_depth: self.bit_depth,
        }
    }
}
