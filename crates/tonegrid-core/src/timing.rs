//! Loop timing: one measure split into `width` equal steps

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Beats in the looping measure (4/4)
pub const BEATS_PER_MEASURE: f64 = 4.0;

/// Length of one 4/4 measure in seconds
pub fn measure_secs(bpm: f64) -> Result<f64, ConfigError> {
    if !(bpm > 0.0) || !bpm.is_finite() {
        return Err(ConfigError::InvalidTempo(bpm));
    }
    Ok(BEATS_PER_MEASURE * 60.0 / bpm)
}

/// Step timing for a loop of fixed length divided into `width` columns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopTiming {
    width: usize,
    loop_secs: f64,
}

impl LoopTiming {
    pub fn new(width: usize, loop_secs: f64) -> Result<Self, ConfigError> {
        if width == 0 {
            return Err(ConfigError::ZeroDimension { width, height: 0 });
        }
        if !(loop_secs > 0.0) || !loop_secs.is_finite() {
            return Err(ConfigError::InvalidLoopLength(loop_secs));
        }
        Ok(Self { width, loop_secs })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Loop length in seconds (one measure)
    pub fn loop_secs(&self) -> f64 {
        self.loop_secs
    }

    /// Playable duration of one step: `loop / width`
    pub fn step_secs(&self) -> f64 {
        self.loop_secs / self.width as f64
    }

    /// Offset of a column from the loop start
    pub fn column_start(&self, column: usize) -> f64 {
        column as f64 * self.step_secs()
    }

    /// Column under the playhead for an elapsed transport time.
    ///
    /// `latency` is subtracted first so the playhead tracks what is audible
    /// rather than what has been queued.
    pub fn playhead_column(&self, elapsed_secs: f64, latency_secs: f64) -> usize {
        let adjusted = (elapsed_secs - latency_secs).rem_euclid(self.loop_secs);
        let progress = adjusted / self.loop_secs;
        ((progress * self.width as f64).floor() as usize).min(self.width - 1)
    }
}

/// Per-note gain range in decibels.
///
/// A lone note in its column plays at `high_db`; a column where every row is
/// lit plays each note at `low_db`, keeping the summed output from peaking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeRange {
    pub low_db: f32,
    pub high_db: f32,
}

impl Default for VolumeRange {
    fn default() -> Self {
        Self {
            low_db: -20.0,
            high_db: -10.0,
        }
    }
}

impl VolumeRange {
    pub fn new(low_db: f32, high_db: f32) -> Result<Self, ConfigError> {
        if low_db > high_db {
            return Err(ConfigError::VolumeRangeInverted {
                low: low_db,
                high: high_db,
            });
        }
        Ok(Self { low_db, high_db })
    }

    /// Linear interpolation from `high_db` (polyphony 1) down to `low_db`
    /// (polyphony == height). Polyphony is clamped into `1..=height`.
    pub fn gain_db(&self, polyphony: usize, height: usize) -> f32 {
        if height <= 1 {
            return self.high_db;
        }
        let polyphony = polyphony.clamp(1, height);
        let headroom = (height - polyphony) as f32 / (height - 1) as f32;
        self.low_db + headroom * (self.high_db - self.low_db)
    }
}

/// Decibels to linear amplitude
pub fn db_to_amplitude(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}
