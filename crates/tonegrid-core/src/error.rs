//! Error types for tonegrid

use thiserror::Error;

/// Invalid tonic, scale, dimensions or timing. Fatal at construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Tonic out of range: {0} (expected 0-11)")]
    TonicOutOfRange(u8),
    #[error("Scale has no intervals")]
    EmptyIntervals,
    #[error("Interval out of range: {0} (expected 0-11)")]
    IntervalOutOfRange(u8),
    #[error("Scale intervals must be strictly ascending: {0:?}")]
    IntervalsNotAscending(Vec<u8>),
    #[error("Grid dimensions must be non-zero: {width}x{height}")]
    ZeroDimension { width: usize, height: usize },
    #[error("Loop length must be positive: {0}")]
    InvalidLoopLength(f64),
    #[error("Tempo must be positive: {0}")]
    InvalidTempo(f64),
    #[error("Latency must be finite: {0}")]
    InvalidLatency(f64),
    #[error("Low volume ({low} dB) is above high volume ({high} dB)")]
    VolumeRangeInverted { low: f32, high: f32 },
    #[error("At least one voice per pitch is required")]
    NoVoices,
    #[error("Slot must span at least one step")]
    NoSlotSteps,
}

/// Malformed shared-state token.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("Token is not valid percent-encoded UTF-8: {0}")]
    Percent(#[from] std::str::Utf8Error),
    #[error("Token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Decoded {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum TonegridError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

pub type Result<T> = std::result::Result<T, TonegridError>;
