//! Buffer generations
//!
//! A generation is one set of per-channel rings. The consumer only ever sees
//! the published read generation; the fill task may be writing a fresher one
//! (after a seek or a channel-count change) until it holds enough lookahead to
//! be published.

use std::sync::atomic::{AtomicU64, Ordering};

use super::SampleRing;
use crate::types::Sample;

static NEXT_GENERATION_ID: AtomicU64 = AtomicU64::new(1);

/// One set of rings, one per output channel
pub struct BufferGeneration {
    id: u64,
    rings: Vec<SampleRing>,
}

impl BufferGeneration {
    /// Allocate `channel_count` rings of `capacity` samples each
    pub fn new(channel_count: usize, capacity: usize) -> Self {
        Self {
            id: NEXT_GENERATION_ID.fetch_add(1, Ordering::Relaxed),
            rings: (0..channel_count).map(|_| SampleRing::new(capacity)).collect(),
        }
    }

    /// Process-unique identifier, used to tell generations apart in logs and tests
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.rings.len()
    }

    /// Per-channel capacity
    #[inline]
    pub fn capacity(&self) -> usize {
        self.rings.first().map(SampleRing::capacity).unwrap_or(0)
    }

    #[inline]
    pub fn ring(&self, channel: usize) -> &SampleRing {
        &self.rings[channel]
    }

    /// Smallest write space over all channels
    pub fn write_space(&self) -> usize {
        self.rings
            .iter()
            .map(SampleRing::write_space)
            .min()
            .unwrap_or(0)
    }

    /// Smallest read space over all channels
    pub fn read_space(&self) -> usize {
        self.rings
            .iter()
            .map(SampleRing::read_space)
            .min()
            .unwrap_or(0)
    }

    /// Write the first `frames` frames of each channel slice to its ring
    ///
    /// Returns the smallest count written over all channels. Channels without
    /// a ring are ignored.
    pub fn write_frames(&self, channels: &[Vec<Sample>], frames: usize) -> usize {
        self.rings
            .iter()
            .zip(channels)
            .map(|(ring, samples)| ring.write(&samples[..frames.min(samples.len())]))
            .min()
            .unwrap_or(0)
    }

    /// Empty every ring (owner side)
    pub fn reset(&self) {
        for ring in &self.rings {
            ring.reset();
        }
    }
}

impl std::fmt::Debug for BufferGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferGeneration")
            .field("id", &self.id)
            .field("channels", &self.rings.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_ids_are_unique() {
        let a = BufferGeneration::new(2, 16);
        let b = BufferGeneration::new(2, 16);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_write_frames_reports_minimum() {
        let generation = BufferGeneration::new(2, 8);
        generation.ring(1).write(&[0.0; 5]);

        let channels = vec![vec![1.0; 6], vec![2.0; 6]];
        // Channel 1 only has room for 3 more
        assert_eq!(generation.write_frames(&channels, 6), 3);
        assert_eq!(generation.write_space(), 0);
        assert_eq!(generation.read_space(), 6);
    }
}
