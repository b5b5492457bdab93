//! Error types for the mixdown engine

use rf_core::RfError;
use thiserror::Error;

use crate::stem::StemRole;

/// Mixdown error type
#[derive(Error, Debug)]
pub enum MixError {
    /// A required stem is absent from the stem set
    #[error("Missing stem: {role}")]
    MissingStem {
        /// Role that was required
        role: StemRole,
    },

    /// Sample rate or channel layout disagrees with the engine format
    #[error("Format mismatch on {role} stem: {detail}")]
    FormatMismatch {
        /// Offending stem
        role: StemRole,
        /// What disagreed
        detail: String,
    },

    /// Stem never rises above the absolute loudness gate
    #[error("Insufficient signal in {role} stem (nothing above the -70 LUFS gate)")]
    InsufficientSignal {
        /// Silent stem
        role: StemRole,
    },

    /// Bus loudness could not be brought within tolerance of the target
    #[error(
        "Unreachable loudness target {target_lufs:.1} LUFS (achieved {achieved_lufs:?}, boost ceiling {boost_ceiling_db:.1} dB)"
    )]
    UnreachableTarget {
        /// Requested integrated loudness
        target_lufs: f64,
        /// Best-effort loudness, `None` when every stem is silent
        achieved_lufs: Option<f64>,
        /// Hard per-stem gain ceiling that was hit
        boost_ceiling_db: f64,
    },

    /// Configured true-peak margin cannot be honoured
    #[error("Unreachable true-peak margin {margin_db} dB: {reason}")]
    MarginUnreachable {
        /// Configured margin
        margin_db: f64,
        /// Why it is invalid
        reason: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Spectral analysis failure
    #[error("Analysis error: {0}")]
    Analysis(String),

    /// Buffer construction failure
    #[error(transparent)]
    Core(#[from] RfError),
}

impl MixError {
    /// True for errors that abort the job rather than degrade the mix
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MixError::InsufficientSignal { .. } | MixError::UnreachableTarget { .. }
        )
    }
}

/// Result type for mixdown operations
pub type MixResult<T> = Result<T, MixError>;
