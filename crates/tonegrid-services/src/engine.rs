//! Headless engine: a looping transport and mixer rendered block by block

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tonegrid_core::{ConfigError, SequencerConfig};
use tracing::info;

use crate::config::OutputConfig;
use crate::context::{AudioContext, Renderer};
use crate::mixer::Mixer;
use crate::transport::LoopTransport;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Sample rate must be positive")]
    ZeroSampleRate,
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Drives a [`LoopTransport`] and renders a [`Mixer`] in lockstep
pub struct Engine {
    transport: Arc<LoopTransport>,
    mixer: Arc<Mixer>,
    sample_rate: u32,
    block_size: usize,
}

impl Engine {
    /// Loop length comes from the sequencer config, one measure at its tempo
    pub fn new(config: &SequencerConfig, output: &OutputConfig) -> Result<Self, EngineError> {
        if output.sample_rate == 0 {
            return Err(EngineError::ZeroSampleRate);
        }
        let timing = config.loop_timing()?;
        let transport = LoopTransport::new(&timing, output.sample_rate, output.lookahead_secs);

        info!(
            sample_rate = output.sample_rate,
            block_size = output.block_size,
            loop_secs = timing.loop_secs(),
            "Engine created"
        );

        Ok(Self {
            transport: Arc::new(transport),
            mixer: Arc::new(Mixer::new(output.sample_rate)),
            sample_rate: output.sample_rate,
            block_size: output.block_size.max(1),
        })
    }

    /// Collaborators for a sequencer running on this engine
    pub fn context(&self, renderer: Arc<dyn Renderer>) -> AudioContext {
        AudioContext::new(renderer, self.transport.clone(), self.mixer.clone())
    }

    pub fn transport(&self) -> &Arc<LoopTransport> {
        &self.transport
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn start(&self) {
        self.transport.start();
    }

    pub fn stop(&self) {
        self.transport.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    /// Render the next mono block. Due callbacks fire first so notes that
    /// start inside the block are heard. Silent while stopped.
    pub fn render_block(&self, out: &mut [f32]) {
        if !self.transport.is_playing() {
            out.fill(0.0);
            return;
        }
        let start = self.transport.position();
        self.transport.advance(out.len() as u64);
        self.mixer.render(start, out);
    }

    /// Render into an interleaved buffer, the mono mix copied to every
    /// channel. `scratch` holds the mono block and only grows.
    pub fn render_interleaved(&self, buffer: &mut [f32], channels: u16, scratch: &mut Vec<f32>) {
        let channels = channels.max(1) as usize;
        scratch.resize(buffer.len() / channels, 0.0);
        self.render_block(scratch);
        for (frame, &sample) in buffer.chunks_mut(channels).zip(scratch.iter()) {
            frame.fill(sample);
        }
    }

    /// Play `loops` passes from the current position and return the audio.
    /// Starts the transport if it is stopped.
    pub fn bounce(&self, loops: usize) -> Vec<f32> {
        if !self.transport.is_playing() {
            self.transport.start();
        }
        let total = self.transport.loop_frames() as usize * loops;
        let mut samples = vec![0.0; total];
        for block in samples.chunks_mut(self.block_size) {
            self.render_block(block);
        }
        info!(loops, frames = total, "Bounced");
        samples
    }

    /// Bounce `loops` passes straight to a WAV file
    pub fn bounce_to_wav(&self, path: &Path, loops: usize) -> Result<usize, EngineError> {
        let samples = self.bounce(loops);
        write_wav(path, &samples, self.sample_rate)?;
        Ok(samples.len())
    }
}

/// Write mono 32-bit float WAV
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), EngineError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    info!(path = %path.display(), frames = samples.len(), "Wrote WAV");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{BankStatus, Sequencer};
    use crate::voice_pool::NUM_VOICES;
    use crate::testing::{init_tracing, FakeRenderer};
    use tonegrid_core::db_to_amplitude;

    const RATE: u32 = 8000;

    fn engine() -> Engine {
        init_tracing();
        let output = OutputConfig {
            sample_rate: RATE,
            block_size: 256,
            lookahead_secs: 0.0,
        };
        Engine::new(&SequencerConfig::default(), &output).unwrap()
    }

    fn sequencer(engine: &Engine) -> Sequencer {
        let context = engine.context(Arc::new(FakeRenderer::new(RATE)));
        let seq = Sequencer::new(&SequencerConfig::default(), context).unwrap();
        seq.wait_until_ready();
        seq
    }

    #[test]
    fn test_zero_sample_rate_rejected() {
        let output = OutputConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(matches!(
            Engine::new(&SequencerConfig::default(), &output),
            Err(EngineError::ZeroSampleRate)
        ));
    }

    #[test]
    fn test_bounce_places_notes_on_their_step() {
        let engine = engine();
        let seq = sequencer(&engine);
        seq.set_cell(2, 15, true);

        let audio = engine.bounce(1);
        assert_eq!(audio.len(), 16000);

        let pitch = seq.pitch(15).unwrap();
        let expected = FakeRenderer::level(&pitch) * db_to_amplitude(-10.0);
        assert!(audio[..2000].iter().all(|&s| s == 0.0));
        assert!(audio[2000..3000].iter().all(|&s| (s - expected).abs() < 1e-6));
        assert!(audio[3000..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_polyphony_lowers_each_note() {
        let engine = engine();
        let seq = sequencer(&engine);
        for row in 0..16 {
            seq.set_cell(0, row, true);
        }
        let audio = engine.bounce(1);

        let expected: f32 = seq
            .scale()
            .pitches()
            .iter()
            .map(|p| FakeRenderer::level(p) * db_to_amplitude(-20.0))
            .sum();
        assert!((audio[10] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_stopped_engine_is_silent() {
        let engine = engine();
        let seq = sequencer(&engine);
        seq.set_cell(0, 0, true);
        let mut out = vec![1.0; 64];
        engine.render_block(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(engine.transport().position(), 0);
    }

    #[test]
    fn test_interleaved_copies_mono() {
        let engine = engine();
        let seq = sequencer(&engine);
        seq.set_cell(0, 0, true);
        engine.start();

        let mut buffer = vec![0.0; 32];
        let mut scratch = Vec::new();
        engine.render_interleaved(&mut buffer, 2, &mut scratch);
        assert!(buffer[0] > 0.0);
        assert!(buffer.chunks(2).all(|f| f[0] == f[1]));
        assert_eq!(scratch.len(), 16);

        // Same-sized blocks reuse the scratch allocation
        let ptr = scratch.as_ptr();
        let capacity = scratch.capacity();
        engine.render_interleaved(&mut buffer, 2, &mut scratch);
        assert_eq!(scratch.as_ptr(), ptr);
        assert_eq!(scratch.capacity(), capacity);
    }

    #[test]
    fn test_rescaled_sequencer_is_heard_without_polling() {
        let engine = engine();
        let seq = sequencer(&engine);
        seq.set_cell(0, 0, true);
        seq.set_tonic(2).unwrap();
        while seq.bank_status() == BankStatus::Building {
            std::thread::yield_now();
        }

        let audio = engine.bounce(1);
        let pitch = seq.pitch(0).unwrap();
        let expected = FakeRenderer::level(&pitch) * db_to_amplitude(-10.0);
        assert!((audio[10] - expected).abs() < 1e-6);
        assert!(audio.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_mixer_voices_stay_flat_across_rescales() {
        let engine = engine();
        let seq = sequencer(&engine);
        let bound = engine.mixer().voice_count();
        assert_eq!(bound, 16 * NUM_VOICES);

        for tonic in 1..11 {
            seq.set_tonic(tonic).unwrap();
            seq.wait_until_ready();
            assert_eq!(engine.mixer().voice_count(), bound);
        }
        drop(seq);
        assert_eq!(engine.mixer().voice_count(), 0);
    }

    #[test]
    fn test_bounce_to_wav() {
        let engine = engine();
        let seq = sequencer(&engine);
        seq.set_cell(4, 4, true);

        let path = std::env::temp_dir().join(format!("tonegrid-bounce-{}.wav", std::process::id()));
        let frames = engine.bounce_to_wav(&path, 2).unwrap();
        assert_eq!(frames, 32000);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, RATE);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 32000);
        let _ = std::fs::remove_file(&path);
    }
}
