//! Static per-stem gain planning
//!
//! The vocal anchors the mix: every active stem is first matched to a
//! loudness relative to the vocal, stems that lose a masking contest in a
//! shared band are cut, and one shared correction moves the summed bus onto
//! the target. The planner is a pure function of its inputs.

use std::collections::BTreeMap;

use rf_core::db_to_gain;
use serde::{Deserialize, Serialize};

use crate::bus::MixBus;
use crate::config::{MixConfig, PlannerConfig, StemBalance};
use crate::ducking::DuckingEnvelope;
use crate::error::{MixError, MixResult};
use crate::loudness::{LoudnessProfile, integrated_loudness};
use crate::masking::MaskingMatrix;
use crate::stem::{Stem, StemRole};

// ═══════════════════════════════════════════════════════════════════════════════
// PLAN
// ═══════════════════════════════════════════════════════════════════════════════

/// Gain decision for one stem
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StemGain {
    /// Stem the decision applies to
    pub role: StemRole,
    /// Loudness-matched gain (dB)
    pub baseline_db: f64,
    /// Masking attenuation (dB, never positive)
    pub masking_delta_db: f64,
    /// Share of the bus correction this stem received (dB)
    pub correction_db: f64,
    /// Sum of the above (dB, meaningless when muted)
    pub total_db: f64,
    /// Stem is excluded from the mix
    pub muted: bool,
}

impl StemGain {
    fn muted(role: StemRole) -> Self {
        Self {
            role,
            baseline_db: 0.0,
            masking_delta_db: 0.0,
            correction_db: 0.0,
            total_db: 0.0,
            muted: true,
        }
    }

    /// Linear gain (0 when muted)
    pub fn linear(&self) -> f64 {
        if self.muted { 0.0 } else { db_to_gain(self.total_db) }
    }
}

/// Bus loudness missed the target tolerance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetDeviation {
    /// Requested integrated loudness (LUFS)
    pub target_lufs: f64,
    /// `None` when nothing could be measured
    pub achieved_lufs: Option<f64>,
    /// Per-stem gain ceiling in force (dB)
    pub boost_ceiling_db: f64,
}

impl From<TargetDeviation> for MixError {
    fn from(d: TargetDeviation) -> Self {
        MixError::UnreachableTarget {
            target_lufs: d.target_lufs,
            achieved_lufs: d.achieved_lufs,
            boost_ceiling_db: d.boost_ceiling_db,
        }
    }
}

/// One static gain per stem plus the bus measurements that justified it
#[derive(Debug, Clone, PartialEq)]
pub struct GainPlan {
    gains: BTreeMap<StemRole, StemGain>,
    anchor_lufs: Option<f64>,
    predicted_lufs: Option<f64>,
    measured_lufs: Option<f64>,
    final_lufs: Option<f64>,
    correction_db: f64,
    deviation: Option<TargetDeviation>,
}

impl GainPlan {
    /// Gain for a role
    pub fn get(&self, role: StemRole) -> Option<&StemGain> {
        self.gains.get(&role)
    }

    /// Linear gain for a role (0 for muted or unknown stems)
    pub fn linear(&self, role: StemRole) -> f64 {
        self.gains.get(&role).map_or(0.0, StemGain::linear)
    }

    /// All decisions in role order
    pub fn gains(&self) -> impl Iterator<Item = &StemGain> {
        self.gains.values()
    }

    /// Loudness the vocal was matched to (LUFS)
    pub fn anchor_lufs(&self) -> Option<f64> {
        self.anchor_lufs
    }

    /// Bus loudness predicted from per-stem loudness before correction
    pub fn predicted_lufs(&self) -> Option<f64> {
        self.predicted_lufs
    }

    /// Bus loudness measured before correction
    pub fn measured_lufs(&self) -> Option<f64> {
        self.measured_lufs
    }

    /// Bus loudness measured with the final gains
    pub fn final_lufs(&self) -> Option<f64> {
        self.final_lufs
    }

    /// Shared correction (dB)
    pub fn correction_db(&self) -> f64 {
        self.correction_db
    }

    /// Recorded target miss, if any
    pub fn deviation(&self) -> Option<&TargetDeviation> {
        self.deviation.as_ref()
    }

    /// Fail with [`MixError::UnreachableTarget`] when the target was missed
    pub fn check(&self) -> MixResult<()> {
        match self.deviation {
            Some(d) => Err(d.into()),
            None => Ok(()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLANNER
// ═══════════════════════════════════════════════════════════════════════════════

/// Computes a [`GainPlan`] from loudness profiles and masking scores
#[derive(Debug, Clone)]
pub struct GainPlanner {
    target_lufs: f64,
    balance: StemBalance,
    limits: PlannerConfig,
}

impl GainPlanner {
    /// Planner for a config
    pub fn new(config: &MixConfig) -> Self {
        Self {
            target_lufs: config.target_lufs,
            balance: config.balance,
            limits: config.planner,
        }
    }

    /// Plan gains.
    ///
    /// `profiles` holds the stems with measurable signal; any stem without a
    /// profile is muted. `ducking` is applied to drums and bass while
    /// measuring, exactly as summation will apply it.
    pub fn plan(
        &self,
        stems: &[&Stem],
        profiles: &BTreeMap<StemRole, LoudnessProfile>,
        masking: Option<&MaskingMatrix>,
        ducking: &DuckingEnvelope,
    ) -> MixResult<GainPlan> {
        let active: Vec<StemRole> = stems
            .iter()
            .map(|s| s.role)
            .filter(|r| profiles.get(r).is_some_and(|p| p.integrated_lufs.is_finite()))
            .collect();

        let mut gains: BTreeMap<StemRole, StemGain> =
            stems.iter().map(|s| (s.role, StemGain::muted(s.role))).collect();

        if active.is_empty() {
            log::warn!("no stem above the loudness gate, mix is silent");
            return Ok(GainPlan {
                gains,
                anchor_lufs: None,
                predicted_lufs: None,
                measured_lufs: None,
                final_lufs: None,
                correction_db: 0.0,
                deviation: Some(self.deviation(None)),
            });
        }

        // 1. Loudness-matched baseline
        let offset_power: f64 = active
            .iter()
            .map(|&r| 10.0_f64.powf(self.balance.offset(r) / 10.0))
            .sum();
        let anchor = self.target_lufs - 10.0 * offset_power.log10();

        for &role in &active {
            let input = profiles[&role].integrated_lufs;
            let baseline = anchor + self.balance.offset(role) - input;
            gains.insert(
                role,
                StemGain {
                    role,
                    baseline_db: baseline,
                    masking_delta_db: 0.0,
                    correction_db: 0.0,
                    total_db: baseline,
                    muted: false,
                },
            );
        }

        // 2. Masking deltas
        if let Some(matrix) = masking {
            self.apply_masking(matrix, &active, &mut gains);
        }

        let predicted = {
            let power: f64 = active
                .iter()
                .map(|r| 10.0_f64.powf((profiles[r].integrated_lufs + gains[r].total_db) / 10.0))
                .sum();
            10.0 * power.log10()
        };

        // 3. Measure the bus as it will be summed
        let measured = self.measure(stems, &gains, ducking)?;
        let Some(measured_lufs) = measured else {
            log::warn!("planned bus fell below the absolute gate");
            return Ok(GainPlan {
                gains,
                anchor_lufs: Some(anchor),
                predicted_lufs: Some(predicted),
                measured_lufs: None,
                final_lufs: None,
                correction_db: 0.0,
                deviation: Some(self.deviation(None)),
            });
        };

        // 4. Shared correction, clamped at the boost ceiling
        let correction = self.target_lufs - measured_lufs;
        let mut clamped = Vec::new();
        for &role in &active {
            if let Some(g) = gains.get_mut(&role) {
                let pre = g.baseline_db + g.masking_delta_db;
                let total = (pre + correction).min(self.limits.max_boost_db);
                if total < pre + correction {
                    clamped.push(role);
                }
                g.correction_db = total - pre;
                g.total_db = total;
            }
        }

        let final_lufs = if clamped.is_empty() && correction == 0.0 {
            Some(measured_lufs)
        } else {
            self.measure(stems, &gains, ducking)?
        };

        log::info!(
            "gain plan: anchor {anchor:.2} LUFS, bus {measured_lufs:.2} -> {} LUFS, correction {correction:+.2} dB",
            final_lufs.map_or("-inf".to_string(), |l| format!("{l:.2}"))
        );
        if !clamped.is_empty() {
            log::warn!(
                "boost ceiling {:.1} dB reached on {:?}",
                self.limits.max_boost_db,
                clamped
            );
        }

        // 5. Tolerance
        let deviation = match final_lufs {
            Some(l) if (l - self.target_lufs).abs() <= self.limits.tolerance_lu => None,
            other => {
                let d = self.deviation(other);
                log::warn!(
                    "target {:.1} LUFS unreachable, best effort {:?}",
                    d.target_lufs,
                    d.achieved_lufs
                );
                Some(d)
            }
        };

        Ok(GainPlan {
            gains,
            anchor_lufs: Some(anchor),
            predicted_lufs: Some(predicted),
            measured_lufs: Some(measured_lufs),
            final_lufs,
            correction_db: correction,
            deviation,
        })
    }

    fn deviation(&self, achieved_lufs: Option<f64>) -> TargetDeviation {
        TargetDeviation {
            target_lufs: self.target_lufs,
            achieved_lufs,
            boost_ceiling_db: self.limits.max_boost_db,
        }
    }

    /// Cut the quieter stem of every strongly masked pair; the vocal is never cut
    fn apply_masking(
        &self,
        matrix: &MaskingMatrix,
        active: &[StemRole],
        gains: &mut BTreeMap<StemRole, StemGain>,
    ) {
        let threshold = self.limits.masking_threshold;
        let span = (1.0 - threshold).max(f64::EPSILON);

        for score in matrix.scores() {
            if score.score < threshold || !active.contains(&score.a) || !active.contains(&score.b) {
                continue;
            }

            let level = |role: StemRole| {
                matrix.band_level_db(role, score.band).unwrap_or(f64::NEG_INFINITY)
                    + gains.get(&role).map_or(0.0, |g| g.baseline_db)
            };
            let quieter = if level(score.a) <= level(score.b) { score.a } else { score.b };
            let target = if quieter == StemRole::Vocal {
                if score.a == StemRole::Vocal { score.b } else { score.a }
            } else {
                quieter
            };
            if target == StemRole::Vocal {
                continue;
            }

            let delta = -self.limits.max_masking_cut_db * ((score.score - threshold) / span).clamp(0.0, 1.0);
            if let Some(g) = gains.get_mut(&target) {
                if delta < g.masking_delta_db {
                    log::debug!(
                        "masking {}/{} band {} score {:.2}: {target} {delta:.2} dB",
                        score.a,
                        score.b,
                        score.band,
                        score.score
                    );
                    g.masking_delta_db = delta;
                    g.total_db = g.baseline_db + delta;
                }
            }
        }
    }

    fn measure(
        &self,
        stems: &[&Stem],
        gains: &BTreeMap<StemRole, StemGain>,
        ducking: &DuckingEnvelope,
    ) -> MixResult<Option<f64>> {
        let bus = MixBus::sum(
            stems,
            |stem| gains.get(&stem.role).map_or(0.0, StemGain::linear),
            ducking,
        )?;
        Ok(integrated_loudness(bus.buffer()))
    }
}
