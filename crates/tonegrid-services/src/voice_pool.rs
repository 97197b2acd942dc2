//! Rotating playback handles per pitch
//!
//! Retriggering a pitch on a handle that is still sounding would cut off its
//! release. Each pitch instead owns a small ring of handles and every trigger
//! moves on to the next one, so up to `num_voices` instances of the same
//! pitch can ring out together.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::{Playback, PlaybackError, VoiceId};
use crate::sample_bank::{SampleBank, SampleSlice};

pub use tonegrid_core::DEFAULT_NUM_VOICES as NUM_VOICES;

/// When and how loud to start a note
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    /// Transport time to start at
    pub time: f64,
    pub gain_db: f32,
    /// Seconds into the slice to start reading from
    pub offset: f64,
    /// Seconds to play. None plays to the end of the slice.
    pub duration: Option<f64>,
}

impl Trigger {
    pub fn at(time: f64, gain_db: f32) -> Self {
        Self {
            time,
            gain_db,
            offset: 0.0,
            duration: None,
        }
    }
}

struct PitchVoices {
    slice: SampleSlice,
    voices: Vec<VoiceId>,
    cursor: usize,
}

impl PitchVoices {
    /// Voice at the cursor, then advance the cursor
    fn next_voice(&mut self) -> VoiceId {
        let voice = self.voices[self.cursor];
        self.cursor = (self.cursor + 1) % self.voices.len();
        voice
    }
}

pub struct VoicePool {
    playback: Arc<dyn Playback>,
    pitches: Vec<Option<PitchVoices>>,
}

impl VoicePool {
    /// Bind `num_voices` handles to every playable slice of `bank`. A pitch
    /// whose render failed, or whose handles cannot be bound, stays silent.
    pub fn new(bank: SampleBank, playback: Arc<dyn Playback>, num_voices: usize) -> Self {
        let num_voices = num_voices.max(1);
        let pitches = bank
            .into_slices()
            .into_iter()
            .enumerate()
            .map(|(row, slice)| {
                let slice = slice.ok()?;
                let voices = (0..num_voices)
                    .map(|_| playback.bind(slice.buffer().clone()))
                    .collect::<Result<Vec<_>, _>>();
                match voices {
                    Ok(voices) => Some(PitchVoices {
                        slice,
                        voices,
                        cursor: 0,
                    }),
                    Err(e) => {
                        warn!(row, error = %e, "Failed to bind voices, row will stay silent");
                        None
                    }
                }
            })
            .collect();

        Self { playback, pitches }
    }

    /// Number of pitches, playable or not
    pub fn len(&self) -> usize {
        self.pitches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pitches.is_empty()
    }

    pub fn is_playable(&self, row: usize) -> bool {
        matches!(self.pitches.get(row), Some(Some(_)))
    }

    /// Rotation cursor for a pitch, None when it has no voices
    pub fn cursor(&self, row: usize) -> Option<usize> {
        self.pitches.get(row)?.as_ref().map(|p| p.cursor)
    }

    pub fn voices(&self, row: usize) -> Option<&[VoiceId]> {
        self.pitches.get(row)?.as_ref().map(|p| p.voices.as_slice())
    }

    /// Start the next voice for `row`. Gain is applied at the trigger time,
    /// before the voice starts.
    pub fn trigger(&mut self, row: usize, trigger: Trigger) -> Result<VoiceId, PlaybackError> {
        let pitch = self
            .pitches
            .get_mut(row)
            .and_then(Option::as_mut)
            .ok_or(PlaybackError::NoSlice(row))?;

        let voice = pitch.next_voice();
        let offset = trigger.offset.clamp(0.0, pitch.slice.duration());
        let remaining = pitch.slice.duration() - offset;
        let duration = trigger.duration.map_or(remaining, |d| d.clamp(0.0, remaining));

        self.playback.set_gain(voice, trigger.gain_db, trigger.time)?;
        self.playback
            .play(voice, trigger.time, pitch.slice.offset() + offset, duration)?;

        debug!(row, %voice, time = trigger.time, gain_db = trigger.gain_db, "Voice triggered");
        Ok(voice)
    }
}

impl Drop for VoicePool {
    fn drop(&mut self) {
        let mut released = 0;
        for pitch in self.pitches.iter().flatten() {
            for &voice in &pitch.voices {
                match self.playback.unbind(voice) {
                    Ok(()) => released += 1,
                    Err(e) => warn!(%voice, error = %e, "Failed to release voice"),
                }
            }
        }
        debug!(released, "Voice pool released");
    }
}
