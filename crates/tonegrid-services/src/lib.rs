//! tonegrid-services: Sample rendering, voice playback and scheduling

#[cfg(feature = "realtime")]
pub mod audio_io;
pub mod config;
pub mod context;
pub mod engine;
pub mod mixer;
pub mod sample_bank;
pub mod sequencer;
pub mod transport;
pub mod voice_pool;

#[cfg(test)]
mod testing;

#[cfg(feature = "realtime")]
pub use audio_io::{AudioOutputError, RealtimeOutputStream};
pub use config::{AppConfig, ConfigFileError, OutputConfig};
pub use context::{
    AudioContext, NoteTrigger, Playback, PlaybackError, RenderError, RenderedBuffer, Renderer,
    ScheduleHandle, Transport, TransportCallback, VoiceId,
};
pub use engine::{Engine, EngineError};
pub use mixer::Mixer;
pub use sample_bank::{PendingBank, SampleBank, SampleBankBuilder, SampleSlice};
pub use sequencer::{BankStatus, Sequencer, SequencerError};
pub use transport::LoopTransport;
pub use voice_pool::{Trigger, VoicePool, NUM_VOICES};
