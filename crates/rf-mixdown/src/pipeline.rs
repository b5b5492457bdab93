//! Per-song mixdown pipeline
//!
//! Orchestrates one song end to end:
//! 1. Validate stems
//! 2. Analyze loudness (stems in parallel)
//! 3. Assess masking
//! 4. Derive the ducking envelope
//! 5. Plan gains
//! 6. Sum the bus
//! 7. Limit, dither and quantize
//! 8. Report

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::bus::MixBus;
use crate::config::{MixConfig, MixMode};
use crate::dither::{Ditherer, RenderedMix};
use crate::ducking::{DuckingEnvelope, DuckingStrategy, NoDucking, Sidechain, SidechainDucker};
use crate::error::{MixError, MixResult};
use crate::gain::{GainPlan, GainPlanner};
use crate::limiter::TruePeakLimiter;
use crate::loudness::{LoudnessAnalyzer, LoudnessProfile, integrated_loudness};
use crate::masking::{MaskingAssessor, MaskingStrategy, NoMasking};
use crate::report::{MASKING_SUMMARY_LEN, MixReport, MixWarning, StemReport, finite};
use crate::stem::{Stem, StemRole, StemSet};
use crate::true_peak::true_peak_db;

// ═══════════════════════════════════════════════════════════════════════════════
// PIPELINE STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Pipeline execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PipelineState {
    /// Not started
    #[default]
    Idle,
    /// Checking roles and formats
    Validating,
    /// Per-stem loudness and true peak
    Analyzing,
    /// Band energies and pair scores
    Masking,
    /// Vocal sidechain envelope
    Ducking,
    /// Static gain plan
    Planning,
    /// Bus summation
    Summing,
    /// True-peak limiting
    Limiting,
    /// Dither and quantization
    Dithering,
    /// Finished
    Complete,
    /// Stopped on an error
    Failed,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRATEGIES
// ═══════════════════════════════════════════════════════════════════════════════

/// Masking and ducking implementations for one mode
pub struct Strategies {
    /// Spectral masking or none
    pub masking: Box<dyn MaskingStrategy>,
    /// Sidechain ducking or none
    pub ducking: Box<dyn DuckingStrategy>,
}

impl Strategies {
    /// Demo mode gets no-op strategies; both modes share the rest of the path
    pub fn for_mode(config: &MixConfig) -> Self {
        match config.mix_mode {
            MixMode::Demo => Self {
                masking: Box::new(NoMasking),
                ducking: Box::new(NoDucking),
            },
            MixMode::Full => Self {
                masking: Box::new(MaskingAssessor::new(config)),
                ducking: Box::new(SidechainDucker::new(config.ducking, config.sample_rate)),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of one song
#[derive(Debug, Clone)]
pub struct MixOutcome {
    /// Measurements and decisions
    pub report: MixReport,
    /// Static gains applied on the bus
    pub plan: GainPlan,
    /// Envelope applied to drums and bass
    pub ducking: DuckingEnvelope,
    /// Rendered mix, `None` in dry run
    pub mix: Option<RenderedMix>,
}

/// Mixdown engine for one job
pub struct MixEngine {
    config: Arc<MixConfig>,
    strategies: Strategies,
    analyzer: LoudnessAnalyzer,
    planner: GainPlanner,
    limiter: TruePeakLimiter,
    state: PipelineState,
}

impl MixEngine {
    /// Validate the config and build an engine
    pub fn new(config: MixConfig) -> MixResult<Self> {
        Self::with_shared(Arc::new(config))
    }

    /// Engine over a config shared with other jobs
    pub fn with_shared(config: Arc<MixConfig>) -> MixResult<Self> {
        config.validate()?;
        Ok(Self {
            strategies: Strategies::for_mode(&config),
            analyzer: LoudnessAnalyzer::new(config.oversample()),
            planner: GainPlanner::new(&config),
            limiter: TruePeakLimiter::from_config(&config)?,
            config,
            state: PipelineState::Idle,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &MixConfig {
        &self.config
    }

    /// Current stage
    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn set_state(&mut self, state: PipelineState) {
        log::debug!("pipeline: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Mix one song
    pub fn mix(&mut self, stems: StemSet) -> MixResult<MixOutcome> {
        let result = self.run(&stems);
        self.set_state(if result.is_ok() {
            PipelineState::Complete
        } else {
            PipelineState::Failed
        });
        result
    }

    fn run(&mut self, stems: &StemSet) -> MixResult<MixOutcome> {
        let config = Arc::clone(&self.config);

        // Step 1: Validate
        self.set_state(PipelineState::Validating);
        stems.validate(&config)?;
        let all: Vec<&Stem> = stems.iter().collect();
        let frames = stems.max_frames();
        let mut warnings = Vec::new();

        // Step 2: Loudness
        self.set_state(PipelineState::Analyzing);
        let analyzer = self.analyzer;
        let measured: Vec<(StemRole, MixResult<LoudnessProfile>)> = all
            .par_iter()
            .map(|stem| (stem.role, analyzer.analyze(stem.role, &stem.buffer)))
            .collect();

        let mut profiles = BTreeMap::new();
        for (role, result) in measured {
            match result {
                Ok(profile) => {
                    profiles.insert(role, profile);
                }
                Err(MixError::InsufficientSignal { role }) => {
                    log::warn!("{role} stem below the loudness gate, muting it");
                    warnings.push(MixWarning::InsufficientSignal { role });
                }
                Err(e) => return Err(e),
            }
        }
        let active: Vec<&Stem> = all
            .iter()
            .copied()
            .filter(|s| profiles.contains_key(&s.role))
            .collect();

        // Step 3: Masking
        self.set_state(PipelineState::Masking);
        let masking = self.strategies.masking.assess(&active)?;

        // Step 4: Ducking, ahead of planning so the bus measurement hears it
        self.set_state(PipelineState::Ducking);
        let sidechain = stems.get(StemRole::Vocal).and_then(|vocal| {
            profiles.get(&StemRole::Vocal).map(|p| Sidechain {
                vocal,
                integrated_lufs: p.integrated_lufs,
            })
        });
        let ducking = self.strategies.ducking.envelope(sidechain, frames);

        // Step 5: Gains
        self.set_state(PipelineState::Planning);
        let plan = self.planner.plan(&all, &profiles, masking.as_ref(), &ducking)?;
        if let Some(d) = plan.deviation() {
            warnings.push(MixWarning::UnreachableTarget {
                target_lufs: d.target_lufs,
                achieved_lufs: d.achieved_lufs,
            });
        }

        // Step 6: Bus
        self.set_state(PipelineState::Summing);
        let bus = MixBus::sum(&all, |s| plan.linear(s.role), &ducking)?;

        // Step 7: Limit and dither
        self.set_state(PipelineState::Limiting);
        let limited = self.limiter.process(bus.buffer());
        if let Some(trim_db) = limited.trim_db {
            warnings.push(MixWarning::LimiterTrim { trim_db });
        }

        self.set_state(PipelineState::Dithering);
        let rendered = Ditherer::new(config.bit_depth, config.seed)?.render(&limited.buffer);

        // Step 8: Report
        let output_lufs = integrated_loudness(&rendered.buffer);
        let output_true_peak_db = finite(true_peak_db(&rendered.buffer, config.oversample()));

        let report = MixReport {
            mode: config.mix_mode,
            seed: config.seed,
            dry_run: config.dry_run,
            quality_profile: config.quality_profile,
            target_lufs: config.target_lufs,
            truepeak_margin_db: config.truepeak_margin_db,
            stems: all
                .iter()
                .map(|s| StemReport::new(s.role, profiles.get(&s.role), plan.get(s.role)))
                .collect(),
            planned_lufs: plan.final_lufs(),
            correction_db: plan.correction_db(),
            output_lufs,
            output_true_peak_db,
            limiter_reduction_db: limited.max_reduction_db,
            limiter_trim_db: limited.trim_db,
            ducking_max_attenuation_db: ducking.max_attenuation_db(),
            masking: masking
                .as_ref()
                .map(|m| {
                    m.strongest(MASKING_SUMMARY_LEN)
                        .into_iter()
                        .filter(|s| s.score > 0.0)
                        .collect()
                })
                .unwrap_or_default(),
            warnings,
            sample_rate: rendered.buffer.sample_rate,
            channels: rendered.buffer.channels,
            bit_depth: rendered.bit_depth,
            frames,
            duration_s: rendered.duration(),
        };

        log::info!(
            "mix: {} stems, {:.2} LUFS, {:.2} dBTP, {} warning(s)",
            all.len(),
            output_lufs.unwrap_or(f64::NEG_INFINITY),
            output_true_peak_db.unwrap_or(f64::NEG_INFINITY),
            report.warnings.len()
        );

        Ok(MixOutcome {
            report,
            plan,
            ducking,
            mix: (!config.dry_run).then_some(rendered),
        })
    }
}
