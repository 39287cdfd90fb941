//! Device-side driver of a sample source
//!
//! Backend independent: the backend hands each interleaved device buffer to
//! [`OutputCallback::render`], which pulls de-interleaved blocks from the
//! source into pre-allocated buffers, interleaves them back and reports the
//! block's peak levels.

use crate::chain::SampleSource;
use crate::types::{ChannelBuffers, Sample, MAX_BUFFER_SIZE};

/// Drives one [`SampleSource`] from an interleaved output callback
pub struct OutputCallback {
    source: Box<dyn SampleSource>,
    buffers: ChannelBuffers,
    peaks: Vec<Sample>,
    channels: usize,
    block_size: usize,
}

impl OutputCallback {
    /// Describe the stream to `source` and pre-allocate block buffers
    pub fn new(
        mut source: Box<dyn SampleSource>,
        channels: usize,
        sample_rate: u32,
        block_size: usize,
    ) -> Self {
        let channels = channels.max(1);
        let block_size = block_size.clamp(1, MAX_BUFFER_SIZE);
        source.set_channel_count(channels);
        source.set_sample_rate(sample_rate);
        source.set_block_size(block_size);
        source.set_latency(block_size);

        Self {
            source,
            buffers: ChannelBuffers::with_capacity(channels, MAX_BUFFER_SIZE),
            peaks: vec![0.0; channels],
            channels,
            block_size,
        }
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Report the output latency measured by the backend
    pub fn set_latency(&mut self, frames: usize) {
        self.source.set_latency(frames);
    }

    /// Fill an interleaved device buffer
    ///
    /// Blocks larger than [`MAX_BUFFER_SIZE`] are pulled in several pieces.
    pub fn render(&mut self, data: &mut [f32]) {
        let channels = self.channels;
        let total_frames = data.len() / channels;
        if total_frames > self.block_size {
            self.block_size = total_frames.min(MAX_BUFFER_SIZE);
            self.source.set_block_size(self.block_size);
        }

        self.peaks.fill(0.0);
        for chunk in data.chunks_mut(MAX_BUFFER_SIZE * channels) {
            let frames = chunk.len() / channels;
            self.buffers.set_len_from_capacity(frames);
            let filled = self.source.pull_samples(&mut self.buffers, frames);
            if filled < frames {
                self.buffers.silence_from(filled);
            }

            for (c, peak) in self.peaks.iter_mut().enumerate() {
                *peak = peak.max(self.buffers.peak(c, frames));
            }
            self.buffers.to_interleaved(frames, &mut chunk[..frames * channels]);
        }
        // Samples past the last whole frame
        let tail = total_frames * channels;
        data[tail..].fill(0.0);

        self.source.set_output_levels(&self.peaks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Seen {
        channels: AtomicUsize,
        block: AtomicUsize,
        latency: AtomicUsize,
        levels: Mutex<Vec<Sample>>,
    }

    /// Channel `c` carries the constant `c + 1`, fills half of every pull
    struct Constant {
        seen: Arc<Seen>,
    }

    impl SampleSource for Constant {
        fn pull_samples(&mut self, buffers: &mut ChannelBuffers, frame_count: usize) -> usize {
            let filled = frame_count / 2;
            for (c, channel) in buffers.channels_mut().iter_mut().enumerate() {
                channel[..filled].fill(c as f32 + 1.0);
            }
            filled
        }
        fn set_channel_count(&mut self, channels: usize) {
            self.seen.channels.store(channels, Ordering::Relaxed);
        }
        fn set_sample_rate(&mut self, _sample_rate: u32) {}
        fn set_block_size(&mut self, frames: usize) {
            self.seen.block.store(frames, Ordering::Relaxed);
        }
        fn set_latency(&mut self, frames: usize) {
            self.seen.latency.store(frames, Ordering::Relaxed);
        }
        fn set_output_levels(&mut self, peaks: &[Sample]) {
            *self.seen.levels.lock().unwrap() = peaks.to_vec();
        }
        fn name(&self) -> &'static str {
            "constant"
        }
    }

    fn callback(channels: usize, block: usize) -> (OutputCallback, Arc<Seen>) {
        let seen = Arc::new(Seen::default());
        let source = Constant { seen: seen.clone() };
        (OutputCallback::new(Box::new(source), channels, 48000, block), seen)
    }

    #[test]
    fn test_new_describes_stream() {
        let (cb, seen) = callback(2, 256);
        assert_eq!(cb.channel_count(), 2);
        assert_eq!(seen.channels.load(Ordering::Relaxed), 2);
        assert_eq!(seen.block.load(Ordering::Relaxed), 256);
        assert_eq!(seen.latency.load(Ordering::Relaxed), 256);
    }

    #[test]
    fn test_render_interleaves_and_zero_fills() {
        let (mut cb, seen) = callback(2, 4);
        let mut data = vec![9.0; 8];
        cb.render(&mut data);

        assert_eq!(data, vec![1.0, 2.0, 1.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(*seen.levels.lock().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_larger_block_is_reported() {
        let (mut cb, seen) = callback(1, 64);
        let mut data = vec![0.0; 512];
        cb.render(&mut data);
        assert_eq!(seen.block.load(Ordering::Relaxed), 512);
    }

    #[test]
    fn test_oversized_buffer_is_chunked() {
        let (mut cb, _) = callback(1, 64);
        let mut data = vec![0.0; MAX_BUFFER_SIZE + 10];
        cb.render(&mut data);
        // First piece: half filled; second piece of 10 frames: 5 filled
        assert_eq!(data[MAX_BUFFER_SIZE / 2 - 1], 1.0);
        assert_eq!(data[MAX_BUFFER_SIZE / 2], 0.0);
        assert_eq!(data[MAX_BUFFER_SIZE + 4], 1.0);
        assert_eq!(data[MAX_BUFFER_SIZE + 5], 0.0);
    }
}
