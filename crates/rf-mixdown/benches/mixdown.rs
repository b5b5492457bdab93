//! Mixdown benchmarks

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rf_core::AudioBuffer;
use rf_mixdown::{LimiterSettings, LoudnessAnalyzer, StemRole, TruePeakLimiter};

fn stereo_tone(seconds: f64, amplitude: f64) -> AudioBuffer {
    let frames = (seconds * 48000.0) as usize;
    let samples = (0..frames * 2)
        .map(|i| {
            let t = (i / 2) as f64 / 48000.0;
            amplitude * (2.0 * std::f64::consts::PI * 440.0 * t).sin()
                + 0.3 * amplitude * (2.0 * std::f64::consts::PI * 3100.0 * t).sin()
        })
        .collect();
    AudioBuffer {
        samples,
        channels: 2,
        sample_rate: 48000,
    }
}

fn bench_loudness(c: &mut Criterion) {
    let mut group = c.benchmark_group("loudness_analyze");

    for oversample in [4, 8] {
        let analyzer = LoudnessAnalyzer::new(oversample);
        let buffer = stereo_tone(10.0, 0.5);

        group.bench_with_input(BenchmarkId::from_parameter(oversample), &oversample, |b, _| {
            b.iter(|| analyzer.analyze(StemRole::Vocal, black_box(&buffer)))
        });
    }

    group.finish();
}

fn bench_limiter(c: &mut Criterion) {
    let limiter = TruePeakLimiter::new(&LimiterSettings::default(), -1.0, 24, 48000, 4)
        .expect("valid ceiling");
    let buffer = stereo_tone(10.0, 1.5);

    c.bench_function("limiter_10s_stereo", |b| {
        b.iter(|| limiter.process(black_box(&buffer)))
    });
}

criterion_group!(benches, bench_loudness, bench_limiter);
criterion_main!(benches);
