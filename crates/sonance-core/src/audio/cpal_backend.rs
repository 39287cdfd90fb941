//! CPAL output backend
//!
//! Opens one output stream and drives a [`SampleSource`] from its callback:
//!
//! ```text
//! ┌──────────────────┐  pull_samples   ┌─────────────────────┐
//! │ CPAL Audio Thread│────────────────►│  processing chain   │
//! │ (OutputCallback) │◄──── samples ───│  ─► PlaybackOutput  │
//! └──────────────────┘                 └─────────────────────┘
//! ```
//!
//! The callback owns the chain exclusively; nothing on this path locks.

use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use super::callback::OutputCallback;
use super::config::{AudioConfig, BufferSize, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE};
use super::device::{find_device_by_id, get_cpal_default_device};
use super::error::{AudioError, AudioResult};
use crate::chain::SampleSource;
use crate::types::MAX_BUFFER_SIZE;

/// Running output stream
///
/// Keeps the stream alive. Drop this to stop audio.
pub struct AudioHandle {
    _stream: Stream,
    device_name: String,
    sample_rate: u32,
    channels: u16,
    buffer_size: u32,
}

impl AudioHandle {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channels
    }

    /// Negotiated buffer size in frames
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// One-way output latency of one buffer in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }
}

/// Open the configured device and start pulling from `source`
pub fn start_output(config: &AudioConfig, source: Box<dyn SampleSource>) -> AudioResult<AudioHandle> {
    let device = match &config.device {
        Some(id) => find_device_by_id(id)?,
        None => get_cpal_default_device()?,
    };
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let (supported_config, buffer_size) = get_output_config(&device, config)?;
    let sample_rate = supported_config.sample_rate().0;
    let channels = supported_config.channels();

    let stream_config = StreamConfig {
        channels,
        sample_rate: supported_config.sample_rate(),
        buffer_size: CpalBufferSize::Fixed(buffer_size),
    };

    log::info!(
        "Audio config: {} channels, {}Hz, {} frames (~{:.1}ms latency)",
        channels,
        sample_rate,
        buffer_size,
        (buffer_size as f32 / sample_rate as f32) * 1000.0
    );

    let callback = OutputCallback::new(source, channels as usize, sample_rate, buffer_size as usize);
    let stream = build_output_stream(&device, &stream_config, callback)?;
    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    log::info!("Audio stream started");

    Ok(AudioHandle {
        _stream: stream,
        device_name,
        sample_rate,
        channels,
        buffer_size,
    })
}

/// Best output configuration for a device
///
/// Returns (SupportedStreamConfig, buffer_size_in_frames)
fn get_output_config(
    device: &cpal::Device,
    config: &AudioConfig,
) -> AudioResult<(cpal::SupportedStreamConfig, u32)> {
    let supported_configs: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    if supported_configs.is_empty() {
        return Err(AudioError::UnsupportedFormat(
            "device offers no f32 output configuration".to_string(),
        ));
    }

    let target_sample_rate = config.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
    let min_channels = config.min_channels();
    let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
        target_sample_rate >= c.min_sample_rate().0 && target_sample_rate <= c.max_sample_rate().0
    };

    // Fewest channels that still cover the request, preferring the target rate
    let best_config = supported_configs
        .iter()
        .filter(|c| c.channels() >= min_channels && supports_rate(c))
        .min_by_key(|c| c.channels())
        .or_else(|| {
            supported_configs
                .iter()
                .filter(|c| c.channels() >= min_channels)
                .min_by_key(|c| c.channels())
        })
        .or_else(|| supported_configs.iter().max_by_key(|c| c.channels()))
        .ok_or_else(|| {
            AudioError::ConfigError("No suitable output configuration found".to_string())
        })?;

    if best_config.channels() < min_channels {
        log::warn!(
            "Audio device offers at most {} channels, {} requested",
            best_config.channels(),
            min_channels
        );
    }

    let sample_rate = if supports_rate(best_config) {
        cpal::SampleRate(target_sample_rate)
    } else {
        let fallback = best_config.max_sample_rate();
        log::warn!(
            "Audio device doesn't support {}Hz, falling back to {}Hz",
            target_sample_rate,
            fallback.0
        );
        fallback
    };

    let stream_config = best_config.clone().with_sample_rate(sample_rate);

    let buffer_size = match config.buffer_size {
        BufferSize::Default => DEFAULT_BUFFER_SIZE,
        BufferSize::Fixed(frames) => frames.clamp(64, MAX_BUFFER_SIZE as u32),
        BufferSize::LowLatency => config.buffer_size.as_frames().unwrap_or(DEFAULT_BUFFER_SIZE),
    };

    log::debug!(
        "Selected buffer size: {} frames for {:?} mode",
        buffer_size,
        config.buffer_size
    );

    Ok((stream_config, buffer_size))
}

fn build_output_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    mut callback: OutputCallback,
) -> AudioResult<Stream> {
    let sample_rate = config.sample_rate.0 as f64;
    let mut last_latency = 0usize;

    device
        .build_output_stream(
            config,
            move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                let frames = data.len() / callback.channel_count();
                let timestamp = info.timestamp();
                let hardware = timestamp
                    .playback
                    .duration_since(&timestamp.callback)
                    .unwrap_or(Duration::ZERO);
                let latency = frames + (hardware.as_secs_f64() * sample_rate) as usize;
                if latency != last_latency {
                    last_latency = latency;
                    callback.set_latency(latency);
                }

                callback.render(data);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}
