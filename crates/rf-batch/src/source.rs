//! WAV stem folders
//!
//! A song folder holds one `*.wav` per role (`vocals.wav`, `drums.wav`, ...).
//! Stems are decoded with hound, resampled to the engine rate and widened
//! to a common channel layout.

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader};
use rf_core::AudioBuffer;
use rf_mixdown::{MixConfig, MixError, Stem, StemRole, StemSet};

use crate::error::{BatchError, BatchOpResult};
use crate::job::BatchJob;
use crate::resample::resample;

/// Decode a WAV file to float. Integer formats are scaled to [-1, 1).
pub fn decode_wav(path: &Path) -> BatchOpResult<AudioBuffer> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f64> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    AudioBuffer::from_interleaved(samples, spec.channels as usize, spec.sample_rate)
        .map_err(|e| BatchError::Mix(MixError::from(e)))
}

/// `*.wav` files directly inside a folder, sorted by name
fn wav_files(folder: &Path) -> BatchOpResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Load a song folder as a stem set at the engine rate
pub fn load_stem_folder(folder: &Path, config: &MixConfig) -> BatchOpResult<StemSet> {
    if !folder.is_dir() {
        return Err(BatchError::InputNotFound(folder.to_path_buf()));
    }

    let mut decoded: Vec<(StemRole, AudioBuffer)> = Vec::new();
    for path in wav_files(folder)? {
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let Some(role) = StemRole::from_file_stem(name) else {
            log::warn!("{}: not a stem name, ignored", path.display());
            continue;
        };
        if decoded.iter().any(|(r, _)| *r == role) {
            log::warn!("{}: second {role} stem, ignored", path.display());
            continue;
        }

        let buffer = decode_wav(&path)?;
        let buffer = resample(&buffer, config.sample_rate)?;
        log::debug!("{role}: {} ({} ch, {:.2} s)", path.display(), buffer.channels, buffer.duration());
        decoded.push((role, buffer));
    }

    // Mono and stereo stems meet at the widest layout
    let channels = decoded.iter().map(|(_, b)| b.channels).max().unwrap_or(1);
    decoded
        .into_iter()
        .map(|(role, buffer)| {
            let buffer = buffer
                .with_channels(channels)
                .map_err(|e| BatchError::Mix(MixError::from(e)))?;
            Ok(Stem::new(role, buffer))
        })
        .collect()
}

/// One job per immediate sub-folder holding at least one WAV, sorted by name
pub fn discover_jobs(root: &Path) -> BatchOpResult<Vec<BatchJob>> {
    if !root.is_dir() {
        return Err(BatchError::InputNotFound(root.to_path_buf()));
    }

    let mut folders: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    folders.sort();

    let mut jobs = Vec::new();
    for folder in folders {
        if wav_files(&folder)?.is_empty() {
            continue;
        }
        jobs.push(BatchJob::from_folder(jobs.len() as u64, folder));
    }

    log::info!("discovered {} song folder(s) under {}", jobs.len(), root.display());
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_int(path: &Path, channels: u16, rate: u32, bits: u16, samples: &[i32]) {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: bits,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_decode_scales_integer_formats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.wav");
        write_int(&path, 1, 48000, 16, &[16384, -32768, 0]);

        let buffer = decode_wav(&path).unwrap();
        assert_eq!(buffer.samples, vec![0.5, -1.0, 0.0]);
    }

    #[test]
    fn test_decode_float() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for s in [0.25_f32, -0.75, 1.0, 0.0] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let buffer = decode_wav(&path).unwrap();
        assert_eq!(buffer.channels, 2);
        assert_eq!(buffer.sample_rate, 44100);
        assert_eq!(buffer.samples, vec![0.25, -0.75, 1.0, 0.0]);
    }

    #[test]
    fn test_folder_widens_mono_and_ignores_unknown() {
        let dir = tempfile::tempdir().unwrap();
        write_int(&dir.path().join("Vocals.wav"), 2, 48000, 24, &[1000; 200]);
        write_int(&dir.path().join("bass.WAV"), 1, 48000, 16, &[500; 100]);
        write_int(&dir.path().join("click.wav"), 1, 48000, 16, &[1; 100]);
        std::fs::write(dir.path().join("notes.txt"), "not audio").unwrap();

        let stems = load_stem_folder(dir.path(), &MixConfig::default()).unwrap();
        assert_eq!(stems.roles(), vec![StemRole::Vocal, StemRole::Bass]);
        assert_eq!(stems.channels(), 2);
        assert_eq!(stems.get(StemRole::Bass).unwrap().buffer.frames(), 100);
    }

    #[test]
    fn test_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            load_stem_folder(&missing, &MixConfig::default()),
            Err(BatchError::InputNotFound(_))
        ));
    }

    #[test]
    fn test_discover_skips_folders_without_wavs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_song", "a_song", "empty"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        write_int(&dir.path().join("a_song/vocals.wav"), 1, 48000, 16, &[0; 10]);
        write_int(&dir.path().join("b_song/drums.wav"), 1, 48000, 16, &[0; 10]);

        let jobs = discover_jobs(dir.path()).unwrap();
        let names: Vec<&str> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["a_song", "b_song"]);
        assert_eq!(jobs[1].id, 1);
    }
}
