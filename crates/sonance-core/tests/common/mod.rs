//! Shared fixtures for the integration tests
//!
//! Models carry a ramp `frame / 65536`, exact in f32, so the frame a sample
//! came from can be read back from its value.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use sonance_core::chain::SampleSource;
use sonance_core::config::EngineConfig;
use sonance_core::engine::{PlaybackContext, PlaybackOutput, PlaybackSource};
use sonance_core::model::{MemoryDenseModel, ModelRegistry};
use sonance_core::params::ParameterRegistry;
use sonance_core::selection::SelectionState;
use sonance_core::{ChannelBuffers, ModelId, Sample};

pub const RATE: u32 = 48000;
pub const BLOCK: usize = 256;
const RAMP_SCALE: f32 = 65536.0;

pub fn ramp_value(frame: u64) -> Sample {
    frame as f32 / RAMP_SCALE
}

pub fn frame_of(value: Sample) -> u64 {
    (value * RAMP_SCALE).round() as u64
}

pub fn ramp(frames: usize) -> Vec<Sample> {
    (0..frames as u64).map(ramp_value).collect()
}

pub struct Rig {
    pub models: Arc<ModelRegistry>,
    pub selection: Arc<SelectionState>,
    pub params: Arc<ParameterRegistry>,
    pub source: PlaybackSource,
    pub output: PlaybackOutput,
}

/// Describe a stereo 48 kHz device with 256-frame blocks to `stage`
pub fn configure_device(stage: &mut dyn SampleSource) {
    stage.set_channel_count(2);
    stage.set_sample_rate(RATE);
    stage.set_block_size(BLOCK);
    stage.set_latency(BLOCK);
}

/// Pull blocks from `stage` until one carries content (or time out)
pub fn pull_first_content(stage: &mut dyn SampleSource, buffers: &mut ChannelBuffers, frames: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        buffers.set_len_from_capacity(frames);
        stage.pull_samples(buffers, frames);
        if buffers[0][..frames].iter().any(|s| *s != 0.0) {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("no content within 5 s");
}

impl Rig {
    pub fn new() -> Self {
        let models = Arc::new(ModelRegistry::new());
        let selection = Arc::new(SelectionState::new());
        let params = Arc::new(ParameterRegistry::new());
        let context =
            PlaybackContext::new(models.clone(), selection.clone()).with_params(params.clone());
        let config = EngineConfig {
            ring_buffer_size: 16384,
            ..EngineConfig::default()
        };
        let (source, mut output) = PlaybackSource::new(context, &config).unwrap();
        configure_device(&mut output);
        Self {
            models,
            selection,
            params,
            source,
            output,
        }
    }

    /// Register a mono ramp model
    pub fn add_ramp(&self, frames: usize) -> ModelId {
        let (id, _) = self
            .models
            .insert_dense(MemoryDenseModel::mono(RATE, ramp(frames)));
        self.source.add_model(id).unwrap();
        id
    }

    pub fn pull_first_content(&mut self, buffers: &mut ChannelBuffers, frames: usize) {
        pull_first_content(&mut self.output, buffers, frames);
    }
}

pub fn block_buffers(channels: usize) -> ChannelBuffers {
    ChannelBuffers::with_capacity(channels, 4096)
}
