//! Instrument description handed verbatim to the offline renderer

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OscillatorShape {
    #[default]
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

impl OscillatorShape {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sine => "Sine",
            Self::Triangle => "Triangle",
            Self::Square => "Square",
            Self::Sawtooth => "Sawtooth",
        }
    }
}

/// ADSR envelope. Times in seconds, sustain as a 0-1 level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.1,
            sustain: 0.3,
            release: 1.0,
        }
    }
}

/// Low-pass filter applied after the oscillator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    pub cutoff_hz: f32,
    /// Slope in dB per octave (-12, -24, -48, -96)
    pub rolloff_db: i32,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            cutoff_hz: 1100.0,
            rolloff_db: -12,
        }
    }
}

/// A soft sine pluck through a gentle low-pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    pub oscillator: OscillatorShape,
    pub envelope: Envelope,
    pub filter: FilterOptions,
    pub volume_db: f32,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            oscillator: OscillatorShape::default(),
            envelope: Envelope::default(),
            filter: FilterOptions::default(),
            volume_db: -10.0,
        }
    }
}
