//! Common types for Sonance
//!
//! This module contains the fundamental audio types used throughout the
//! playback engine, including multi-channel buffer handling and the model
//! identifier.

use std::ops::{Index, IndexMut};

/// Audio sample type (32-bit float everywhere in the engine)
pub type Sample = f32;

/// Fixed internal processing block size (frames) used by the model mixer
///
/// Clip-triggered and continuous-curve models are rendered in blocks of this
/// size; the fill task always asks for a multiple of it.
pub const PROCESSING_BLOCK_SIZE: usize = 1024;

/// Default ring buffer capacity per channel (frames)
///
/// The effective capacity is `max(device_block_size * 4, this)`.
pub const DEFAULT_RING_BUFFER_SIZE: usize = 131071;

/// The engine always delivers at least stereo so clip and synth models can pan
pub const MIN_TARGET_CHANNELS: usize = 2;

/// Maximum device callback size to pre-allocate (frames)
/// Covers all common configurations (64 … 4096)
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Opaque model identifier handed out by the model store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub u32);

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

/// Playback state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
}

/// Convert a frame count to seconds at the given rate (0 when the rate is unknown)
#[inline]
pub fn frames_to_seconds(frames: f64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        0.0
    } else {
        frames / sample_rate as f64
    }
}

/// Convert seconds to a (fractional) frame count at the given rate
#[inline]
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> f64 {
    seconds * sample_rate as f64
}

/// A buffer of de-interleaved samples, one `Vec` per channel
///
/// This is the primary buffer type passed through the processing chain. It
/// keeps a working length (in frames) separate from its allocated capacity so
/// that the real-time path can change the length without allocating.
#[derive(Debug, Clone, Default)]
pub struct ChannelBuffers {
    channels: Vec<Vec<Sample>>,
}

impl ChannelBuffers {
    /// Create a buffer with `channel_count` channels of `frames` silent frames
    pub fn silence(channel_count: usize, frames: usize) -> Self {
        Self {
            channels: (0..channel_count).map(|_| vec![0.0; frames]).collect(),
        }
    }

    /// Create a buffer with capacity for `frames` frames but zero working length
    pub fn with_capacity(channel_count: usize, frames: usize) -> Self {
        Self {
            channels: (0..channel_count)
                .map(|_| Vec::with_capacity(frames))
                .collect(),
        }
    }

    /// Create a buffer from separate channel vectors
    pub fn from_channels(channels: Vec<Vec<Sample>>) -> Self {
        if let Some(first) = channels.first() {
            assert!(
                channels.iter().all(|c| c.len() == first.len()),
                "Channel lengths must match"
            );
        }
        Self { channels }
    }

    /// Number of channels
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Working length in frames
    #[inline]
    pub fn len(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Check if the buffer has no frames (or no channels)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated capacity in frames (smallest over all channels)
    pub fn capacity(&self) -> usize {
        self.channels.iter().map(Vec::capacity).min().unwrap_or(0)
    }

    /// Change the channel count (allocates, not for the real-time path)
    pub fn set_channel_count(&mut self, channel_count: usize) {
        let frames = self.len();
        let capacity = self.capacity().max(frames);
        self.channels.resize_with(channel_count, || {
            let mut channel = Vec::with_capacity(capacity);
            channel.resize(frames, 0.0);
            channel
        });
    }

    /// Resize every channel, filling with silence if growing (may allocate)
    pub fn resize(&mut self, frames: usize) {
        for channel in &mut self.channels {
            channel.resize(frames, 0.0);
        }
    }

    /// Set the working length of a pre-allocated buffer (real-time safe)
    ///
    /// Newly exposed frames are silent. Growing past the capacity allocates,
    /// which only happens when the buffer was under-provisioned.
    #[inline]
    pub fn set_len_from_capacity(&mut self, frames: usize) {
        for channel in &mut self.channels {
            debug_assert!(
                frames <= channel.capacity(),
                "set_len_from_capacity called with len > capacity"
            );
            if frames > channel.len() {
                channel.resize(frames, 0.0);
            } else {
                channel.truncate(frames);
            }
        }
    }

    /// Fill all channels with silence
    pub fn fill_silence(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }

    /// Zero frames `from..` of every channel
    pub fn silence_from(&mut self, from: usize) {
        for channel in &mut self.channels {
            let from = from.min(channel.len());
            channel[from..].fill(0.0);
        }
    }

    /// Get a channel slice
    #[inline]
    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index]
    }

    /// Get a mutable channel slice
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [Sample] {
        &mut self.channels[index]
    }

    /// Get all channels as vectors
    #[inline]
    pub fn channels(&self) -> &[Vec<Sample>] {
        &self.channels
    }

    /// Get all channels as mutable vectors
    #[inline]
    pub fn channels_mut(&mut self) -> &mut [Vec<Sample>] {
        &mut self.channels
    }

    /// Copy the first `frames` frames into an interleaved buffer
    pub fn to_interleaved(&self, frames: usize, output: &mut [Sample]) {
        let channel_count = self.channel_count();
        assert!(output.len() >= frames * channel_count);
        for (c, channel) in self.channels.iter().enumerate() {
            for (i, sample) in channel[..frames].iter().enumerate() {
                output[i * channel_count + c] = *sample;
            }
        }
    }

    /// Overwrite the first `frames` frames from an interleaved buffer
    pub fn copy_from_interleaved(&mut self, frames: usize, input: &[Sample]) {
        let channel_count = self.channel_count();
        assert!(input.len() >= frames * channel_count);
        for (c, channel) in self.channels.iter_mut().enumerate() {
            for (i, sample) in channel[..frames].iter_mut().enumerate() {
                *sample = input[i * channel_count + c];
            }
        }
    }

    /// Peak amplitude of one channel over the first `frames` frames
    pub fn peak(&self, index: usize, frames: usize) -> Sample {
        self.channels
            .get(index)
            .map(|c| {
                c[..frames.min(c.len())]
                    .iter()
                    .fold(0.0, |peak: Sample, s| peak.max(s.abs()))
            })
            .unwrap_or(0.0)
    }
}

impl Index<usize> for ChannelBuffers {
    type Output = Vec<Sample>;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.channels[index]
    }
}

impl IndexMut<usize> for ChannelBuffers {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.channels[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave_roundtrip() {
        let buffers = ChannelBuffers::from_channels(vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
        let mut interleaved = [0.0; 4];
        buffers.to_interleaved(2, &mut interleaved);
        assert_eq!(interleaved, [1.0, 2.0, 3.0, 4.0]);

        let mut back = ChannelBuffers::silence(2, 2);
        back.copy_from_interleaved(2, &interleaved);
        assert_eq!(back.channel(0), &[1.0, 3.0]);
        assert_eq!(back.channel(1), &[2.0, 4.0]);
    }

    #[test]
    fn test_set_len_keeps_capacity() {
        let mut buffers = ChannelBuffers::with_capacity(2, 512);
        buffers.set_len_from_capacity(256);
        assert_eq!(buffers.len(), 256);
        buffers.set_len_from_capacity(16);
        assert_eq!(buffers.len(), 16);
        assert!(buffers.capacity() >= 512);
    }

    #[test]
    fn test_set_channel_count_preserves_length() {
        let mut buffers = ChannelBuffers::silence(1, 8);
        buffers.set_channel_count(3);
        assert_eq!(buffers.channel_count(), 3);
        assert_eq!(buffers.channel(2).len(), 8);
    }

    #[test]
    fn test_peak() {
        let buffers = ChannelBuffers::from_channels(vec![vec![0.1, -0.7, 0.3]]);
        assert!((buffers.peak(0, 3) - 0.7).abs() < 1e-6);
        assert_eq!(buffers.peak(5, 3), 0.0);
    }
}
