//! Output sinks for rendered mixes
//!
//! Files are written under a temporary name and renamed into place, so a
//! crash never leaves a half-written `mix.wav` that `skip_existing` would
//! mistake for a finished job. A failed write removes its temp file, and a
//! failed report removes the `mix.wav` it belonged to.

use std::fs;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use rf_mixdown::{MixReport, RenderedMix};

use crate::error::{BatchError, BatchOpResult};
use crate::job::BatchJob;

/// Rendered audio file name inside a job folder
pub const MIX_FILE: &str = "mix.wav";
/// Report file name inside a job folder
pub const REPORT_FILE: &str = "report.json";

/// Destination for finished jobs
pub trait MixSink: Send + Sync {
    /// Persist a mix and its report, returning the files written
    fn write(&self, job: &BatchJob, mix: &RenderedMix, report: &MixReport) -> BatchOpResult<Vec<PathBuf>>;

    /// Previously written output for this job, if complete
    fn existing(&self, job: &BatchJob) -> BatchOpResult<Option<(MixReport, Vec<PathBuf>)>>;
}

/// Writes `<root>/<job name>/mix.wav` and `report.json`
#[derive(Debug, Clone)]
pub struct WavMixSink {
    root: PathBuf,
}

impl WavMixSink {
    /// Sink rooted at an output directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder for one job
    pub fn job_dir(&self, job: &BatchJob) -> PathBuf {
        self.root.join(&job.name)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write to `<path>.tmp` and rename into place; the temp file never outlives a failure
fn commit(path: &Path, write: impl FnOnce(&Path) -> BatchOpResult<()>) -> BatchOpResult<()> {
    let tmp = tmp_path(path);
    write(&tmp)
        .and_then(|()| fs::rename(&tmp, path).map_err(BatchError::from))
        .inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
}

/// Integer PCM at the mix word length
fn write_wav(path: &Path, mix: &RenderedMix) -> BatchOpResult<()> {
    let spec = WavSpec {
        channels: mix.buffer.channels as u16,
        sample_rate: mix.buffer.sample_rate,
        bits_per_sample: mix.bit_depth,
        sample_format: SampleFormat::Int,
    };

    commit(path, |tmp| {
        let mut writer = WavWriter::create(tmp, spec)?;
        for &sample in &mix.pcm {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    })
}

fn write_report(path: &Path, report: &MixReport) -> BatchOpResult<()> {
    let json = report.to_json()?;
    commit(path, |tmp| Ok(fs::write(tmp, json)?))
}

impl MixSink for WavMixSink {
    fn write(&self, job: &BatchJob, mix: &RenderedMix, report: &MixReport) -> BatchOpResult<Vec<PathBuf>> {
        let dir = self.job_dir(job);
        fs::create_dir_all(&dir)?;

        let wav = dir.join(MIX_FILE);
        let json = dir.join(REPORT_FILE);
        write_wav(&wav, mix)?;
        // Report last: its presence marks the job as done
        if let Err(e) = write_report(&json, report) {
            let _ = fs::remove_file(&wav);
            return Err(e);
        }

        log::debug!("[{}] wrote {}", job.name, dir.display());
        Ok(vec![wav, json])
    }

    fn existing(&self, job: &BatchJob) -> BatchOpResult<Option<(MixReport, Vec<PathBuf>)>> {
        let dir = self.job_dir(job);
        let wav = dir.join(MIX_FILE);
        let json = dir.join(REPORT_FILE);
        if !wav.is_file() || !json.is_file() {
            return Ok(None);
        }

        let report = MixReport::from_json(&fs::read_to_string(&json)?)?;
        Ok(Some((report, vec![wav, json])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tmp_path_appends_suffix() {
        assert_eq!(tmp_path(Path::new("/out/a/mix.wav")), PathBuf::from("/out/a/mix.wav.tmp"));
    }

    #[test]
    fn test_commit_removes_tmp_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("report.json");

        let result = commit(&target, |tmp| {
            fs::write(tmp, b"partial")?;
            Err(BatchError::Resample("interrupted".into()))
        });
        assert!(result.is_err());
        assert!(!tmp_path(&target).exists());
        assert!(!target.exists());

        commit(&target, |tmp| Ok(fs::write(tmp, b"{}")?)).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"{}");
        assert!(!tmp_path(&target).exists());
    }

    #[test]
    fn test_existing_needs_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = WavMixSink::new(dir.path());
        let job = BatchJob::from_folder(0, "/songs/one");

        assert!(sink.existing(&job).unwrap().is_none());

        fs::create_dir_all(sink.job_dir(&job)).unwrap();
        fs::write(sink.job_dir(&job).join(MIX_FILE), b"RIFF").unwrap();
        assert!(sink.existing(&job).unwrap().is_none());
    }
}
