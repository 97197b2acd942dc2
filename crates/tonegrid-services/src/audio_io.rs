//! Realtime output through the default audio device

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use thiserror::Error;
use tracing::{error, info};

use crate::engine::Engine;

#[derive(Debug, Error)]
pub enum AudioOutputError {
    #[error("No audio output devices found")]
    NoDevices,
    #[error("Failed to get default output config: {0}")]
    ConfigError(String),
    #[error("Failed to build output stream: {0}")]
    StreamError(String),
}

/// Name, sample rate and channel count of the default output device
pub fn default_device_info() -> Result<(String, u32, u16), AudioOutputError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioOutputError::NoDevices)?;

    let config = device
        .default_output_config()
        .map_err(|e| AudioOutputError::ConfigError(e.to_string()))?;

    let name = device.name().unwrap_or_default();
    Ok((name, config.sample_rate().0, config.channels()))
}

/// Output stream pulling blocks from an [`Engine`]. Stops when dropped.
pub struct RealtimeOutputStream {
    stop_flag: Arc<AtomicBool>,
    _stream: cpal::Stream,
}

impl RealtimeOutputStream {
    /// Open the default device at the engine's sample rate and start the
    /// engine's transport
    pub fn start(engine: Arc<Engine>) -> Result<Self, AudioOutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioOutputError::NoDevices)?;

        let supported_config = device
            .default_output_config()
            .map_err(|e| AudioOutputError::ConfigError(e.to_string()))?;

        let channels = supported_config.channels();
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(engine.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();
        let render_engine = engine.clone();
        let mut scratch = Vec::new();

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if stop_clone.load(Ordering::SeqCst) {
                        data.fill(0.0);
                        return;
                    }
                    render_engine.render_interleaved(data, channels, &mut scratch);
                },
                move |err| error!("Output stream error: {}", err),
                None,
            )
            .map_err(|e| AudioOutputError::StreamError(e.to_string()))?;

        stream.play().map_err(|e| AudioOutputError::StreamError(e.to_string()))?;
        engine.start();

        info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = engine.sample_rate(),
            channels,
            "Started realtime output stream"
        );

        Ok(Self { stop_flag, _stream: stream })
    }

    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

impl Drop for RealtimeOutputStream {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}
