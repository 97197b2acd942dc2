//! In-process playback: mixes bound voices into a mono output

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tonegrid_core::db_to_amplitude;
use tracing::{debug, error};

use crate::context::{Playback, PlaybackError, RenderedBuffer, VoiceId};

/// One scheduled read of a voice's buffer, in frames
#[derive(Debug, Clone, Copy)]
struct Run {
    start: u64,
    offset: usize,
    length: usize,
}

struct MixerVoice {
    buffer: Arc<RenderedBuffer>,
    run: Option<Run>,
    /// (frame, amplitude) automation points in time order
    gain: VecDeque<(u64, f32)>,
}

impl MixerVoice {
    fn new(buffer: Arc<RenderedBuffer>) -> Self {
        Self {
            buffer,
            run: None,
            gain: VecDeque::new(),
        }
    }

    fn amplitude_at(&self, frame: u64) -> f32 {
        self.gain
            .iter()
            .rev()
            .find(|(at, _)| *at <= frame)
            .map(|(_, amp)| *amp)
            .unwrap_or(1.0)
    }

    /// Add this voice into `out`, which starts at frame `start`
    fn mix_into(&mut self, start: u64, out: &mut [f32]) {
        let Some(run) = self.run else {
            return;
        };
        let end = start + out.len() as u64;
        if run.start >= end {
            return;
        }

        for (i, sample) in out.iter_mut().enumerate() {
            let frame = start + i as u64;
            if frame < run.start {
                continue;
            }
            let idx = (frame - run.start) as usize;
            if idx >= run.length {
                break;
            }
            let value = self.buffer.samples.get(run.offset + idx).copied().unwrap_or(0.0);
            *sample += value * self.amplitude_at(frame);
        }

        if run.start + run.length as u64 <= end {
            self.run = None;
        }
        // Keep the newest point at or before the block end, and anything later
        while self.gain.len() > 1 && self.gain[1].0 <= end {
            self.gain.pop_front();
        }
    }
}

/// A [`Playback`] that renders voices itself. Voice ids are never reused.
pub struct Mixer {
    voices: Mutex<BTreeMap<VoiceId, MixerVoice>>,
    next_voice: AtomicU64,
    sample_rate: u32,
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let voices = self.voices();
        f.debug_struct("Mixer")
            .field("sample_rate", &self.sample_rate)
            .field("voices", &voices.len())
            .field("active", &voices.values().filter(|v| v.run.is_some()).count())
            .finish()
    }
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            voices: Mutex::new(BTreeMap::new()),
            next_voice: AtomicU64::new(0),
            sample_rate: sample_rate.max(1),
        }
    }

    fn voices(&self) -> MutexGuard<'_, BTreeMap<VoiceId, MixerVoice>> {
        self.voices.lock().unwrap_or_else(|poisoned| {
            error!("Mixer lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Voices currently bound
    pub fn voice_count(&self) -> usize {
        self.voices().len()
    }

    /// Voices with a run still pending or sounding
    pub fn active_count(&self) -> usize {
        self.voices().values().filter(|v| v.run.is_some()).count()
    }

    fn secs_to_frames(&self, secs: f64) -> u64 {
        (secs.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Mix every voice into `out`, starting at transport frame `start`.
    /// `out` is overwritten.
    pub fn render(&self, start: u64, out: &mut [f32]) {
        out.fill(0.0);
        for voice in self.voices().values_mut() {
            voice.mix_into(start, out);
        }
    }
}

impl Playback for Mixer {
    fn bind(&self, buffer: Arc<RenderedBuffer>) -> Result<VoiceId, PlaybackError> {
        if buffer.sample_rate != self.sample_rate {
            return Err(PlaybackError::SampleRateMismatch {
                expected: self.sample_rate,
                actual: buffer.sample_rate,
            });
        }
        let voice = VoiceId(self.next_voice.fetch_add(1, Ordering::Relaxed));
        self.voices().insert(voice, MixerVoice::new(buffer));
        Ok(voice)
    }

    fn play(&self, voice: VoiceId, time: f64, offset: f64, duration: f64) -> Result<(), PlaybackError> {
        let start = self.secs_to_frames(time);
        let offset = self.secs_to_frames(offset) as usize;
        let length = self.secs_to_frames(duration) as usize;

        let mut voices = self.voices();
        let v = voices
            .get_mut(&voice)
            .ok_or(PlaybackError::UnknownVoice(voice))?;
        let length = length.min(v.buffer.frames().saturating_sub(offset));
        if v.run.is_some() {
            debug!(%voice, "Restarting voice, previous run cut");
        }
        v.run = Some(Run {
            start,
            offset,
            length,
        });
        Ok(())
    }

    fn set_gain(&self, voice: VoiceId, gain_db: f32, time: f64) -> Result<(), PlaybackError> {
        let at = self.secs_to_frames(time);
        let mut voices = self.voices();
        let v = voices
            .get_mut(&voice)
            .ok_or(PlaybackError::UnknownVoice(voice))?;
        // A new point replaces any later ones
        while v.gain.back().is_some_and(|(t, _)| *t >= at) {
            v.gain.pop_back();
        }
        v.gain.push_back((at, db_to_amplitude(gain_db)));
        Ok(())
    }

    fn unbind(&self, voice: VoiceId) -> Result<(), PlaybackError> {
        self.voices()
            .remove(&voice)
            .map(|_| ())
            .ok_or(PlaybackError::UnknownVoice(voice))
    }
}
