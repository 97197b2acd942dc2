//! Sequencer configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::instrument::InstrumentConfig;
use crate::scale::{validate_scale, Scale, ScaleSpec};
use crate::timing::{measure_secs, LoopTiming, VolumeRange};

/// Playback handles kept per pitch. Three lets a note's release ring under
/// the next two retriggers; raise it for long release tails.
pub const DEFAULT_NUM_VOICES: usize = 3;

/// How rendered slices are laid out in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankLayout {
    /// One render per pitch, one buffer per pitch
    #[default]
    PerPitch,
    /// One render for every pitch back-to-back, slices addressed by offset
    Packed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub width: usize,
    pub height: usize,
    /// Semitone 0-11, 0 = C
    pub tonic: u8,
    pub scale: ScaleSpec,
    pub base_octave: i8,
    pub bpm: f64,
    pub num_voices: usize,
    pub high_volume_db: f32,
    pub low_volume_db: f32,
    pub layout: BankLayout,
    /// Steps per rendered slot. Values above 1 leave room for the release tail.
    pub slot_steps: usize,
    /// Output latency subtracted from the playhead
    pub latency_secs: f64,
    pub instrument: InstrumentConfig,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        let volume = VolumeRange::default();
        Self {
            width: 16,
            height: 16,
            tonic: 0,
            scale: ScaleSpec::default(),
            base_octave: 3,
            bpm: 120.0,
            num_voices: DEFAULT_NUM_VOICES,
            high_volume_db: volume.high_db,
            low_volume_db: volume.low_db,
            layout: BankLayout::default(),
            slot_steps: 1,
            latency_secs: 0.0,
            instrument: InstrumentConfig::default(),
        }
    }
}

impl SequencerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::ZeroDimension {
                width: self.width,
                height: self.height,
            });
        }
        validate_scale(self.tonic, self.scale.intervals())?;
        measure_secs(self.bpm)?;
        self.volume_range()?;
        if self.num_voices == 0 {
            return Err(ConfigError::NoVoices);
        }
        if self.slot_steps == 0 {
            return Err(ConfigError::NoSlotSteps);
        }
        if !self.latency_secs.is_finite() {
            return Err(ConfigError::InvalidLatency(self.latency_secs));
        }
        Ok(())
    }

    pub fn volume_range(&self) -> Result<VolumeRange, ConfigError> {
        VolumeRange::new(self.low_volume_db, self.high_volume_db)
    }

    /// One 4/4 measure at `bpm`, split into `width` steps
    pub fn loop_timing(&self) -> Result<LoopTiming, ConfigError> {
        LoopTiming::new(self.width, measure_secs(self.bpm)?)
    }

    pub fn resolve_scale(&self) -> Result<Scale, ConfigError> {
        Scale::from_spec(self.tonic, &self.scale, self.height, self.base_octave)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::ScaleMode;

    #[test]
    fn test_defaults_are_valid() {
        let config = SequencerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scale, ScaleSpec::Preset(ScaleMode::SuspendedPentatonic));
        assert_eq!(config.loop_timing().unwrap().step_secs(), 0.125);
        assert_eq!(config.resolve_scale().unwrap().len(), 16);
    }

    #[test]
    fn test_validation_errors() {
        let config = SequencerConfig {
            num_voices: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoVoices));

        let config = SequencerConfig {
            tonic: 13,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::TonicOutOfRange(13)));

        let config = SequencerConfig {
            scale: ScaleSpec::Custom(vec![]),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::EmptyIntervals));

        let config = SequencerConfig {
            low_volume_db: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::VolumeRangeInverted { .. })
        ));

        let config = SequencerConfig {
            bpm: -1.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidTempo(-1.0)));
    }
}
