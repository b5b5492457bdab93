//! Sample rate conversion for decoded stems
//!
//! FFT-based resampling with rubato. The resampler's own delay is trimmed
//! so the output lines up with the input and has the expected length.

use rf_core::AudioBuffer;
use rf_mixdown::MixError;
use rubato::{FftFixedInOut, Resampler};

use crate::error::{BatchError, BatchOpResult};

/// Input chunk size handed to rubato
const CHUNK_SIZE: usize = 1024;

/// Resample to `to_rate`; a buffer already at that rate is returned as is
pub fn resample(buffer: &AudioBuffer, to_rate: u32) -> BatchOpResult<AudioBuffer> {
    let from_rate = buffer.sample_rate;
    if from_rate == to_rate {
        return Ok(buffer.clone());
    }

    let channels = buffer.channels;
    let frames = buffer.frames();
    let expected = (frames as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    if frames == 0 {
        return Ok(AudioBuffer::silence(channels, to_rate, 0));
    }

    let mut resampler =
        FftFixedInOut::<f64>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, channels)
            .map_err(|e| BatchError::Resample(e.to_string()))?;
    let delay = resampler.output_delay();

    let planar = buffer.to_planar();
    let mut output: Vec<Vec<f64>> = vec![Vec::with_capacity(expected + delay + CHUNK_SIZE); channels];
    let mut pos = 0;

    // Keep feeding (zero-padded past the end) until the delayed tail is out
    while output[0].len() < expected + delay {
        let needed = resampler.input_frames_next();
        let chunk: Vec<Vec<f64>> = planar
            .iter()
            .map(|ch| {
                let mut c: Vec<f64> = ch.iter().skip(pos).take(needed).copied().collect();
                c.resize(needed, 0.0);
                c
            })
            .collect();

        let produced = resampler
            .process(&chunk, None)
            .map_err(|e| BatchError::Resample(e.to_string()))?;
        for (out, block) in output.iter_mut().zip(produced) {
            out.extend_from_slice(&block);
        }
        pos += needed;
    }

    let aligned: Vec<Vec<f64>> = output
        .into_iter()
        .map(|ch| ch[delay..delay + expected].to_vec())
        .collect();

    log::debug!("resampled {frames} frames {from_rate} Hz -> {expected} frames {to_rate} Hz");
    AudioBuffer::from_channels(&aligned, to_rate)
        .map_err(|e| BatchError::Mix(MixError::from(e)))
}
