//! Collaborator contracts: offline rendering, the looping transport and voice
//! playback, bundled into an explicitly owned [`AudioContext`]

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tonegrid_core::{InstrumentConfig, Pitch};

/// Opaque id issued by a [`Transport`] for one scheduled callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleHandle(pub u64);

impl fmt::Display for ScheduleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque id issued by a [`Playback`] for one bound voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

impl fmt::Display for VoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mono audio produced by an offline render
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl RenderedBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Seconds to a frame count at this buffer's rate
    pub fn secs_to_frames(&self, secs: f64) -> usize {
        (secs.max(0.0) * self.sample_rate as f64).round() as usize
    }
}

/// One note in an offline render schedule. Times are seconds from the
/// start of the rendered buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteTrigger {
    pub pitch: Pitch,
    pub time: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("Renderer failed: {0}")]
    Collaborator(String),
    #[error("Rendered buffer too short: {actual} frames, expected {expected}")]
    TooShort { expected: usize, actual: usize },
    #[error("Render worker exited before reporting")]
    WorkerLost,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    #[error("Unknown voice: {0}")]
    UnknownVoice(VoiceId),
    #[error("Sample rate mismatch: buffer is {actual} Hz, output is {expected} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },
    #[error("No playable sample for row {0}")]
    NoSlice(usize),
    #[error("Playback failed: {0}")]
    Collaborator(String),
}

/// Offline synthesis. Called from worker threads while a sample bank builds.
pub trait Renderer: Send + Sync {
    /// Render `triggers` with `instrument` into a buffer `total_secs` long
    fn render_offline(
        &self,
        instrument: &InstrumentConfig,
        triggers: &[NoteTrigger],
        total_secs: f64,
    ) -> Result<RenderedBuffer, RenderError>;
}

/// Invoked with the callback's own handle and the exact time it is due,
/// in transport seconds. May run ahead of that time when the transport
/// schedules with lookahead.
pub type TransportCallback = Arc<dyn Fn(ScheduleHandle, f64) + Send + Sync>;

/// A looping clock. Callbacks repeat once per loop pass.
///
/// Implementations must not invoke callbacks from inside `schedule`,
/// `clear` or `cancel_all`, and must not hold internal locks while a
/// callback runs.
pub trait Transport: Send + Sync {
    /// Schedule `callback` at `time` seconds into the loop
    fn schedule(&self, callback: TransportCallback, time: f64) -> ScheduleHandle;
    /// Cancel one callback. Takes effect before returning.
    fn clear(&self, handle: ScheduleHandle);
    fn cancel_all(&self);
    fn elapsed_seconds(&self) -> f64;
    fn loop_length(&self) -> f64;
}

/// Voice playback
pub trait Playback: Send + Sync {
    /// Create a playback handle bound to `buffer`
    fn bind(&self, buffer: Arc<RenderedBuffer>) -> Result<VoiceId, PlaybackError>;
    /// Start `voice` at `time`, reading `duration` seconds from `offset`.
    /// Restarting a voice cuts its previous instance.
    fn play(&self, voice: VoiceId, time: f64, offset: f64, duration: f64)
    -> Result<(), PlaybackError>;
    /// Set the voice gain in dB from `time` onwards
    fn set_gain(&self, voice: VoiceId, gain_db: f32, time: f64) -> Result<(), PlaybackError>;
    /// Release a handle from `bind`, silencing it. The id is dead afterwards.
    fn unbind(&self, voice: VoiceId) -> Result<(), PlaybackError>;
}

/// The three collaborators a sequencer runs against. Cheap to clone; each
/// sequencer owns its own copy.
#[derive(Clone)]
pub struct AudioContext {
    pub renderer: Arc<dyn Renderer>,
    pub transport: Arc<dyn Transport>,
    pub playback: Arc<dyn Playback>,
}

impl AudioContext {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        transport: Arc<dyn Transport>,
        playback: Arc<dyn Playback>,
    ) -> Self {
        Self {
            renderer,
            transport,
            playback,
        }
    }
}

impl fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioContext")
            .field("loop_length", &self.transport.loop_length())
            .finish_non_exhaustive()
    }
}
