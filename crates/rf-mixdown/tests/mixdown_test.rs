//! Mixdown integration tests
//!
//! Runs complete songs through `MixEngine` and checks:
//! - Loudness target and true-peak ceiling on the rendered mix
//! - Masking cuts and vocal ducking in full mode
//! - Determinism with a seed
//! - Dry run reporting the same decisions as a full run
//! - Recovery from unreachable targets and silent stems

use approx::assert_abs_diff_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rf_core::AudioBuffer;
use rf_mixdown::{
    MixConfig, MixEngine, MixError, MixMode, MixWarning, SidechainDucker, Stem, StemRole, StemSet,
    integrated_loudness, true_peak_db,
};

const SAMPLE_RATE: u32 = 48000;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Mono sine stem
fn sine(role: StemRole, freq: f64, amplitude: f64, seconds: f64) -> Stem {
    let frames = (seconds * SAMPLE_RATE as f64) as usize;
    let samples = (0..frames)
        .map(|i| amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 / SAMPLE_RATE as f64).sin())
        .collect();
    Stem::new(role, AudioBuffer::mono(samples, SAMPLE_RATE))
}

/// Stereo sine stem with a small phase offset between channels
fn stereo_sine(role: StemRole, freq: f64, amplitude: f64, seconds: f64) -> Stem {
    let frames = (seconds * SAMPLE_RATE as f64) as usize;
    let channel = |phase: f64| -> Vec<f64> {
        (0..frames)
            .map(|i| {
                amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 / SAMPLE_RATE as f64 + phase).sin()
            })
            .collect()
    };
    let buffer = AudioBuffer::from_channels(&[channel(0.0), channel(0.3)], SAMPLE_RATE).unwrap();
    Stem::new(role, buffer)
}

/// Full-scale random noise
fn noise(role: StemRole, seed: u64, seconds: f64) -> Stem {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let frames = (seconds * SAMPLE_RATE as f64) as usize;
    let samples = (0..frames).map(|_| rng.random_range(-1.0..=1.0)).collect();
    Stem::new(role, AudioBuffer::mono(samples, SAMPLE_RATE))
}

/// Four sines, vocal loudest
fn four_sines(seconds: f64) -> StemSet {
    StemSet::new()
        .with(sine(StemRole::Vocal, 440.0, 0.5, seconds))
        .with(sine(StemRole::Drums, 150.0, 0.3, seconds))
        .with(sine(StemRole::Bass, 55.0, 0.3, seconds))
        .with(sine(StemRole::Other, 2500.0, 0.2, seconds))
}

/// Vocal phrases over bass and drums sharing one octave band
fn overlapping_song(seconds: f64) -> StemSet {
    let frames = (seconds * SAMPLE_RATE as f64) as usize;
    let phrase = SAMPLE_RATE as usize / 2;
    let vocal: Vec<f64> = (0..frames)
        .map(|i| {
            let on = (i / phrase) % 2 == 0;
            let s = (2.0 * std::f64::consts::PI * 330.0 * i as f64 / SAMPLE_RATE as f64).sin();
            if on { 0.4 * s } else { 0.0 }
        })
        .collect();

    StemSet::new()
        .with(Stem::new(StemRole::Vocal, AudioBuffer::mono(vocal, SAMPLE_RATE)))
        .with(sine(StemRole::Drums, 100.0, 0.4, seconds))
        .with(sine(StemRole::Bass, 115.0, 0.4, seconds))
        .with(sine(StemRole::Other, 3000.0, 0.1, seconds))
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCENARIOS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_demo_four_sines_hits_target() {
    init_logger();
    let mut engine = MixEngine::new(MixConfig::demo().with_target(-14.0)).unwrap();
    let outcome = engine.mix(four_sines(5.0)).unwrap();
    let mix = outcome.mix.as_ref().unwrap();

    let lufs = integrated_loudness(&mix.buffer).unwrap();
    assert!((-14.5..=-13.5).contains(&lufs), "output {lufs} LUFS");
    assert!(true_peak_db(&mix.buffer, 4) <= -0.8);

    let report = &outcome.report;
    assert_eq!(report.mode, MixMode::Demo);
    assert!(report.target_reached());
    assert_eq!(report.frames, 5 * SAMPLE_RATE as usize);
    assert_abs_diff_eq!(report.output_lufs.unwrap(), lufs, epsilon = 1e-9);
    assert!(report.stems.iter().all(|s| s.masking_delta_db == 0.0));
}

#[test]
fn test_full_mode_cuts_masked_low_end() {
    init_logger();
    let mut engine = MixEngine::new(MixConfig::default().with_seed(11)).unwrap();
    let outcome = engine.mix(overlapping_song(4.0)).unwrap();

    let cut = [StemRole::Bass, StemRole::Drums]
        .iter()
        .map(|&r| outcome.plan.get(r).unwrap().masking_delta_db)
        .fold(0.0, f64::min);
    assert!(cut < 0.0, "expected a masking cut on bass or drums");
    assert!(cut >= -3.0);
    assert_eq!(outcome.plan.get(StemRole::Vocal).unwrap().masking_delta_db, 0.0);

    let strongest = &outcome.report.masking[0];
    assert!(strongest.score >= 0.35);
    assert!(outcome.report.ducking_max_attenuation_db > 0.0);
    assert!(outcome.report.ducking_max_attenuation_db <= 3.0 + 1e-9);
}

#[test]
fn test_stereo_stems_render_stereo() {
    let set = StemSet::new()
        .with(stereo_sine(StemRole::Vocal, 440.0, 0.4, 2.0))
        .with(stereo_sine(StemRole::Drums, 120.0, 0.3, 2.0))
        .with(stereo_sine(StemRole::Bass, 50.0, 0.3, 1.5))
        .with(stereo_sine(StemRole::Other, 900.0, 0.2, 2.0));
    let mut engine = MixEngine::new(MixConfig::default().with_seed(5)).unwrap();
    let outcome = engine.mix(set).unwrap();

    let mix = outcome.mix.unwrap();
    assert_eq!(mix.buffer.channels, 2);
    // Bus is as long as the longest stem
    assert_eq!(mix.buffer.frames(), 2 * SAMPLE_RATE as usize);
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLANNER PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_planned_gains_reproduce_target() {
    for target in [-23.0, -16.0, -14.0, -9.0] {
        let mut engine = MixEngine::new(MixConfig::demo().with_target(target)).unwrap();
        let outcome = engine.mix(four_sines(3.0)).unwrap();

        assert!(outcome.plan.check().is_ok());
        assert_abs_diff_eq!(outcome.plan.final_lufs().unwrap(), target, epsilon = 0.5);
    }
}

#[test]
fn test_unreachable_target_is_a_warning() {
    let quiet = StemSet::new()
        .with(sine(StemRole::Vocal, 440.0, 0.001, 2.0))
        .with(sine(StemRole::Drums, 150.0, 0.001, 2.0))
        .with(sine(StemRole::Bass, 55.0, 0.001, 2.0))
        .with(sine(StemRole::Other, 2500.0, 0.001, 2.0));
    let mut config = MixConfig::demo().with_seed(1);
    config.planner.max_boost_db = 12.0;

    let outcome = MixEngine::new(config).unwrap().mix(quiet).unwrap();

    assert!(matches!(outcome.plan.check(), Err(MixError::UnreachableTarget { .. })));
    assert!(!outcome.report.target_reached());
    assert!(outcome
        .report
        .warnings
        .iter()
        .any(|w| matches!(w, MixWarning::UnreachableTarget { achieved_lufs: Some(l), .. } if *l < -20.0)));
    assert!(outcome.plan.gains().all(|g| g.total_db <= 12.0 + 1e-12));
}

#[test]
fn test_all_silent_song_completes() {
    let silent = StemSet::new()
        .with(sine(StemRole::Vocal, 440.0, 0.0, 1.0))
        .with(sine(StemRole::Drums, 150.0, 0.0, 1.0))
        .with(sine(StemRole::Bass, 55.0, 0.0, 1.0))
        .with(sine(StemRole::Other, 2500.0, 0.0, 1.0));
    let outcome = MixEngine::new(MixConfig::default().with_seed(1))
        .unwrap()
        .mix(silent)
        .unwrap();

    assert!(outcome.report.stems.iter().all(|s| s.muted));
    assert_eq!(outcome.report.output_lufs, None);
    assert!(outcome.ducking.is_identity());
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIMITER & DUCKING PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_true_peak_ceiling_on_clipping_input() {
    init_logger();
    let set = StemSet::new()
        .with(noise(StemRole::Vocal, 1, 3.0))
        .with(noise(StemRole::Drums, 2, 3.0))
        .with(noise(StemRole::Bass, 3, 3.0))
        .with(noise(StemRole::Other, 4, 3.0));

    for margin in [-0.3, -1.0, -3.0] {
        let config = MixConfig {
            target_lufs: -5.0,
            truepeak_margin_db: margin,
            ..MixConfig::default().with_seed(8)
        };
        let outcome = MixEngine::new(config).unwrap().mix(set.clone()).unwrap();
        let mix = outcome.mix.unwrap();

        assert!(true_peak_db(&mix.buffer, 4) <= margin + 0.2, "margin {margin}");
        assert!(outcome.report.limiter_reduction_db > 0.0);
        assert!(mix.pcm.iter().all(|&q| (-8_388_608..=8_388_607).contains(&q)));
    }
}

#[test]
fn test_ducking_envelope_is_continuous() {
    let config = MixConfig::default().with_seed(2);
    let bound = SidechainDucker::new(config.ducking, SAMPLE_RATE).step_bound();
    let outcome = MixEngine::new(config).unwrap().mix(overlapping_song(3.0)).unwrap();

    assert!(!outcome.ducking.is_identity());
    assert!(outcome.ducking.max_step() <= bound + 1e-12);
    assert_eq!(outcome.ducking.len(), 3 * SAMPLE_RATE as usize);
}

// ═══════════════════════════════════════════════════════════════════════════════
// DETERMINISM & DRY RUN
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_seeded_runs_are_identical() {
    let config = MixConfig::default().with_seed(42);
    let a = MixEngine::new(config.clone()).unwrap().mix(overlapping_song(2.0)).unwrap();
    let b = MixEngine::new(config).unwrap().mix(overlapping_song(2.0)).unwrap();

    for (ga, gb) in a.plan.gains().zip(b.plan.gains()) {
        assert_abs_diff_eq!(ga.total_db, gb.total_db, epsilon = 1e-6);
    }
    assert_eq!(a.ducking, b.ducking);
    assert_eq!(a.mix.as_ref().unwrap().pcm, b.mix.as_ref().unwrap().pcm);
    assert_eq!(a.report, b.report);
}

#[test]
fn test_unseeded_runs_agree_within_tolerance() {
    let a = MixEngine::new(MixConfig::default()).unwrap().mix(four_sines(2.0)).unwrap();
    let b = MixEngine::new(MixConfig::default()).unwrap().mix(four_sines(2.0)).unwrap();

    for (ga, gb) in a.plan.gains().zip(b.plan.gains()) {
        assert_abs_diff_eq!(ga.total_db, gb.total_db, epsilon = 1e-6);
    }
    assert_abs_diff_eq!(a.report.output_lufs.unwrap(), b.report.output_lufs.unwrap(), epsilon = 0.1);
    assert_abs_diff_eq!(
        a.report.output_true_peak_db.unwrap(),
        b.report.output_true_peak_db.unwrap(),
        epsilon = 0.2
    );
}

#[test]
fn test_dry_run_reports_same_decisions() {
    let config = MixConfig::default().with_seed(9);
    let full = MixEngine::new(config.clone()).unwrap().mix(overlapping_song(2.0)).unwrap();
    let dry = MixEngine::new(config.with_dry_run(true))
        .unwrap()
        .mix(overlapping_song(2.0))
        .unwrap();

    assert!(dry.mix.is_none());
    assert!(dry.report.dry_run);
    assert_eq!(dry.report.stems, full.report.stems);
    assert_eq!(dry.report.planned_lufs, full.report.planned_lufs);
    assert_eq!(dry.report.output_lufs, full.report.output_lufs);
    assert_eq!(dry.report.output_true_peak_db, full.report.output_true_peak_db);
    assert_eq!(dry.report.limiter_reduction_db, full.report.limiter_reduction_db);
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mix.json");
    std::fs::write(
        &path,
        r#"{ "target_lufs": -16.0, "bit_depth": 16, "required_stems": ["vocal", "bass"] }"#,
    )
    .unwrap();

    let config = MixConfig::from_json_file(&path).unwrap();
    assert_eq!(config.target_lufs, -16.0);
    assert_eq!(config.required_stems, vec![StemRole::Vocal, StemRole::Bass]);

    let set = StemSet::new()
        .with(sine(StemRole::Vocal, 440.0, 0.3, 1.0))
        .with(sine(StemRole::Bass, 60.0, 0.3, 1.0));
    let mix = MixEngine::new(config).unwrap().mix(set).unwrap().mix.unwrap();
    assert_eq!(mix.bit_depth, 16);
    assert!(mix.pcm.iter().all(|&q| (-32768..=32767).contains(&q)));
}

#[test]
fn test_format_mismatch_is_fatal() {
    let set = StemSet::new()
        .with(sine(StemRole::Vocal, 440.0, 0.3, 1.0))
        .with(sine(StemRole::Drums, 150.0, 0.3, 1.0))
        .with(sine(StemRole::Bass, 55.0, 0.3, 1.0))
        .with(Stem::new(StemRole::Other, AudioBuffer::mono(vec![0.1; 44100], 44100)));

    let err = MixEngine::new(MixConfig::default()).unwrap().mix(set).unwrap_err();
    assert!(matches!(err, MixError::FormatMismatch { role: StemRole::Other, .. }));
    assert!(err.is_fatal());
}
