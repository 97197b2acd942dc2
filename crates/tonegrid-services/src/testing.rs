//! Test doubles for the collaborator contracts

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};
use tonegrid_core::{InstrumentConfig, Pitch};

use crate::context::{
    NoteTrigger, Playback, PlaybackError, RenderError, RenderedBuffer, Renderer, VoiceId,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic renderer: each note is a constant level derived from its
/// MIDI number, held for the note's duration, silence elsewhere.
pub struct FakeRenderer {
    sample_rate: u32,
    failing: HashSet<Pitch>,
    truncate: usize,
    gate: Option<Receiver<()>>,
    renders: AtomicUsize,
}

impl FakeRenderer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            failing: HashSet::new(),
            truncate: 0,
            gate: None,
            renders: AtomicUsize::new(0),
        }
    }

    /// Renders block until the returned sender is dropped
    pub fn gated(sample_rate: u32) -> (Self, Sender<()>) {
        let (tx, rx) = bounded(0);
        let renderer = Self {
            gate: Some(rx),
            ..Self::new(sample_rate)
        };
        (renderer, tx)
    }

    /// Any render containing `pitch` fails
    pub fn failing(mut self, pitch: Pitch) -> Self {
        self.failing.insert(pitch);
        self
    }

    /// Return `frames` fewer frames than asked for
    pub fn truncating(mut self, frames: usize) -> Self {
        self.truncate = frames;
        self
    }

    pub fn level(pitch: &Pitch) -> f32 {
        pitch.midi_note() as f32 / 1000.0
    }

    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl Renderer for FakeRenderer {
    fn render_offline(
        &self,
        _instrument: &InstrumentConfig,
        triggers: &[NoteTrigger],
        total_secs: f64,
    ) -> Result<RenderedBuffer, RenderError> {
        if let Some(gate) = &self.gate {
            let _ = gate.recv();
        }
        self.renders.fetch_add(1, Ordering::SeqCst);

        if let Some(t) = triggers.iter().find(|t| self.failing.contains(&t.pitch)) {
            return Err(RenderError::Collaborator(format!("cannot render {}", t.pitch)));
        }

        let rate = self.sample_rate as f64;
        let frames = (total_secs * rate).round() as usize;
        let mut samples = vec![0.0; frames.saturating_sub(self.truncate)];
        for trigger in triggers {
            let start = (trigger.time * rate).round() as usize;
            let end = ((trigger.time + trigger.duration) * rate).round() as usize;
            let end = end.min(samples.len());
            if start < end {
                samples[start..end].fill(Self::level(&trigger.pitch));
            }
        }
        Ok(RenderedBuffer::new(samples, self.sample_rate))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCall {
    Bind { voice: VoiceId, frames: usize },
    Play { voice: VoiceId, time: f64, offset: f64, duration: f64 },
    SetGain { voice: VoiceId, gain_db: f32, time: f64 },
    Unbind { voice: VoiceId },
}

/// Playback that records every call
#[derive(Default)]
pub struct RecordingPlayback {
    calls: Mutex<Vec<PlaybackCall>>,
    next_voice: AtomicU64,
    fail_play: AtomicBool,
}

impl RecordingPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_play(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PlaybackCall> {
        self.calls.lock().unwrap().clone()
    }

    /// (voice, time, offset, duration) for every `play`
    pub fn plays(&self) -> Vec<(VoiceId, f64, f64, f64)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlaybackCall::Play {
                    voice,
                    time,
                    offset,
                    duration,
                } => Some((voice, time, offset, duration)),
                _ => None,
            })
            .collect()
    }

    /// (voice, gain_db) for every `set_gain`
    pub fn gains(&self) -> Vec<(VoiceId, f32)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlaybackCall::SetGain { voice, gain_db, .. } => Some((voice, gain_db)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Playback for RecordingPlayback {
    fn bind(&self, buffer: Arc<RenderedBuffer>) -> Result<VoiceId, PlaybackError> {
        let voice = VoiceId(self.next_voice.fetch_add(1, Ordering::SeqCst));
        self.calls.lock().unwrap().push(PlaybackCall::Bind {
            voice,
            frames: buffer.frames(),
        });
        Ok(voice)
    }

    fn play(&self, voice: VoiceId, time: f64, offset: f64, duration: f64) -> Result<(), PlaybackError> {
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(PlaybackError::Collaborator("device gone".into()));
        }
        self.calls.lock().unwrap().push(PlaybackCall::Play {
            voice,
            time,
            offset,
            duration,
        });
        Ok(())
    }

    fn set_gain(&self, voice: VoiceId, gain_db: f32, time: f64) -> Result<(), PlaybackError> {
        self.calls.lock().unwrap().push(PlaybackCall::SetGain {
            voice,
            gain_db,
            time,
        });
        Ok(())
    }

    fn unbind(&self, voice: VoiceId) -> Result<(), PlaybackError> {
        self.calls.lock().unwrap().push(PlaybackCall::Unbind { voice });
        Ok(())
    }
}
