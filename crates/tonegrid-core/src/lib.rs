//! tonegrid-core: Domain types for the tonegrid step sequencer

pub mod codec;
mod config;
mod error;
mod grid;
pub mod instrument;
mod scale;
pub mod timing;

pub use codec::{decode, encode, share_url, token_from_query};
pub use config::{BankLayout, SequencerConfig, DEFAULT_NUM_VOICES};
pub use error::{ConfigError, DecodeError, Result, TonegridError};
pub use grid::{Cell, Grid};
pub use instrument::{Envelope, FilterOptions, InstrumentConfig, OscillatorShape};
pub use scale::{validate_scale, NoteName, Pitch, Scale, ScaleMode, ScaleSpec};
pub use timing::{db_to_amplitude, measure_secs, LoopTiming, VolumeRange};
