//! Time-stretching via signalsmith-stretch
//!
//! Wraps the signalsmith-stretch library for pitch-preserving speed changes
//! of any channel count. The stretch ratio is implied by the buffer sizes
//! handed to [`TimeStretcher::process`]: more input than output speeds up,
//! less slows down.

use serde::{Deserialize, Serialize};
use signalsmith_stretch::Stretch;

use crate::types::{ChannelBuffers, Sample};

/// Stretcher quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StretchQuality {
    /// `preset_cheaper`: roughly half the CPU, slightly smeared transients
    Faster,
    /// `preset_default`
    #[default]
    Finer,
}

/// Multichannel time stretcher
///
/// Converts between the engine's de-interleaved buffers and the interleaved
/// layout signalsmith expects using scratch buffers sized at construction;
/// `process` only allocates if called with more frames than reserved.
pub struct TimeStretcher {
    stretcher: Stretch,
    channels: usize,
    sample_rate: u32,
    quality: StretchQuality,
    input_scratch: Vec<Sample>,
    output_scratch: Vec<Sample>,
}

impl TimeStretcher {
    /// Create a stretcher, reserving scratch space for `max_frames` frames per call
    pub fn new(channels: usize, sample_rate: u32, quality: StretchQuality, max_frames: usize) -> Self {
        let stretcher = match quality {
            StretchQuality::Faster => Stretch::preset_cheaper(channels as u32, sample_rate),
            StretchQuality::Finer => Stretch::preset_default(channels as u32, sample_rate),
        };

        log::debug!(
            "[STRETCH] Created {:?} stretcher: {} ch @ {} Hz, latency {}+{}",
            quality,
            channels,
            sample_rate,
            stretcher.input_latency(),
            stretcher.output_latency()
        );

        Self {
            stretcher,
            channels,
            sample_rate,
            quality,
            input_scratch: Vec::with_capacity(max_frames * 4 * channels),
            output_scratch: Vec::with_capacity(max_frames * channels),
        }
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn quality(&self) -> StretchQuality {
        self.quality
    }

    pub fn input_latency(&self) -> usize {
        self.stretcher.input_latency()
    }

    pub fn output_latency(&self) -> usize {
        self.stretcher.output_latency()
    }

    /// Total latency in frames
    pub fn total_latency(&self) -> usize {
        self.input_latency() + self.output_latency()
    }

    pub fn reset(&mut self) {
        self.stretcher.reset();
    }

    /// Stretch `input_frames` frames of `input` into `output_frames` frames of `output`
    pub fn process(
        &mut self,
        input: &ChannelBuffers,
        input_frames: usize,
        output: &mut ChannelBuffers,
        output_frames: usize,
    ) {
        let channels = self.channels;
        if input_frames == 0 {
            output.silence_from(0);
            return;
        }

        self.input_scratch.resize(input_frames * channels, 0.0);
        self.output_scratch.clear();
        self.output_scratch.resize(output_frames * channels, 0.0);

        interleave(input, input_frames, channels, &mut self.input_scratch);
        self.stretcher
            .process(&self.input_scratch[..], &mut self.output_scratch[..]);
        deinterleave(&self.output_scratch, output_frames, channels, output);
    }
}

fn interleave(buffers: &ChannelBuffers, frames: usize, channels: usize, out: &mut [Sample]) {
    for c in 0..channels.min(buffers.channel_count()) {
        let channel = buffers.channel(c);
        for i in 0..frames.min(channel.len()) {
            out[i * channels + c] = channel[i];
        }
    }
}

fn deinterleave(input: &[Sample], frames: usize, channels: usize, buffers: &mut ChannelBuffers) {
    for c in 0..channels.min(buffers.channel_count()) {
        let channel = buffers.channel_mut(c);
        for i in 0..frames.min(channel.len()) {
            channel[i] = input[i * channels + c];
        }
    }
}
