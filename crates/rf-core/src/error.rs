//! Error types for shared buffer handling

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum RfError {
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Channel mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
}

/// Result type alias
pub type RfResult<T> = Result<T, RfError>;
