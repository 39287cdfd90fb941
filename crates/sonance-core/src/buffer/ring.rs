//! Bounded single-producer/single-consumer sample ring
//!
//! One ring per audio channel. The fill task is the only writer and the
//! hardware callback the only reader; neither side ever blocks. Samples are
//! stored as `f32` bit patterns in atomics so the ring can be shared by
//! reference between the two threads without any locking.
//!
//! The cursors are published with release/acquire ordering: a reader that
//! observes an advanced write cursor also observes the samples written before
//! it, and vice versa for freed space.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::types::Sample;

/// Fixed-capacity circular sample buffer
///
/// `read_space() + write_space() == capacity()` holds whenever both cursors
/// are quiescent. `write` truncates when the ring is full and `read` returns
/// fewer samples when it runs dry; callers see the shortfall in the return
/// value and decide how to pad.
pub struct SampleRing {
    /// One slot more than the capacity so that full and empty are distinct
    slots: Box<[AtomicU32]>,
    reader: AtomicUsize,
    writer: AtomicUsize,
}

impl SampleRing {
    /// Create an empty ring holding up to `capacity` samples
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity + 1).map(|_| AtomicU32::new(0)).collect();
        Self {
            slots,
            reader: AtomicUsize::new(0),
            writer: AtomicUsize::new(0),
        }
    }

    /// Maximum number of samples the ring can hold
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    #[inline]
    fn size(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn space_between(&self, reader: usize, writer: usize) -> usize {
        (writer + self.size() - reader) % self.size()
    }

    /// Number of samples available to the reader
    #[inline]
    pub fn read_space(&self) -> usize {
        let writer = self.writer.load(Ordering::Acquire);
        let reader = self.reader.load(Ordering::Relaxed);
        self.space_between(reader, writer)
    }

    /// Number of samples the writer can add before the ring is full
    #[inline]
    pub fn write_space(&self) -> usize {
        let reader = self.reader.load(Ordering::Acquire);
        let writer = self.writer.load(Ordering::Relaxed);
        self.capacity() - self.space_between(reader, writer)
    }

    /// Write as many of `samples` as fit; returns the number written
    ///
    /// Writer side only.
    pub fn write(&self, samples: &[Sample]) -> usize {
        let count = samples.len().min(self.write_space());
        let writer = self.writer.load(Ordering::Relaxed);
        let size = self.size();
        for (i, sample) in samples[..count].iter().enumerate() {
            self.slots[(writer + i) % size].store(sample.to_bits(), Ordering::Relaxed);
        }
        self.writer.store((writer + count) % size, Ordering::Release);
        count
    }

    /// Write `count` zero samples (or as many as fit); returns the number written
    ///
    /// Writer side only.
    pub fn write_silence(&self, count: usize) -> usize {
        let count = count.min(self.write_space());
        let writer = self.writer.load(Ordering::Relaxed);
        let size = self.size();
        for i in 0..count {
            self.slots[(writer + i) % size].store(0.0f32.to_bits(), Ordering::Relaxed);
        }
        self.writer.store((writer + count) % size, Ordering::Release);
        count
    }

    /// Read up to `out.len()` samples into `out`; returns the number read
    ///
    /// Samples past the returned count are left untouched. Reader side only.
    pub fn read(&self, out: &mut [Sample]) -> usize {
        let count = out.len().min(self.read_space());
        let reader = self.reader.load(Ordering::Relaxed);
        let size = self.size();
        for (i, sample) in out[..count].iter_mut().enumerate() {
            *sample = Sample::from_bits(self.slots[(reader + i) % size].load(Ordering::Relaxed));
        }
        self.reader.store((reader + count) % size, Ordering::Release);
        count
    }

    /// Discard up to `count` readable samples; returns the number skipped
    ///
    /// Reader side only.
    pub fn skip(&self, count: usize) -> usize {
        let count = count.min(self.read_space());
        let reader = self.reader.load(Ordering::Relaxed);
        self.reader
            .store((reader + count) % self.size(), Ordering::Release);
        count
    }

    /// Empty the ring
    ///
    /// Owner side: only valid while no reader or writer is active on this ring.
    pub fn reset(&self) {
        self.reader.store(0, Ordering::Release);
        self.writer.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for SampleRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRing")
            .field("capacity", &self.capacity())
            .field("read_space", &self.read_space())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn assert_spaces(ring: &SampleRing) {
        assert_eq!(ring.read_space() + ring.write_space(), ring.capacity());
    }

    #[test]
    fn test_write_then_read_preserves_order() {
        let ring = SampleRing::new(16);
        let input: Vec<Sample> = (0..16).map(|i| i as Sample * 0.5).collect();

        assert_eq!(ring.write(&input), 16);
        assert_spaces(&ring);
        assert_eq!(ring.write_space(), 0);

        let mut out = vec![0.0; 16];
        assert_eq!(ring.read(&mut out), 16);
        assert_spaces(&ring);
        assert_eq!(out, input);
    }

    #[test]
    fn test_write_truncates_when_full() {
        let ring = SampleRing::new(8);
        assert_eq!(ring.write(&[1.0; 5]), 5);
        assert_eq!(ring.write(&[2.0; 5]), 3);
        assert_spaces(&ring);

        let mut out = [0.0; 10];
        assert_eq!(ring.read(&mut out), 8);
        assert_eq!(&out[..8], &[1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
        // Shortfall is left for the caller to pad
        assert_eq!(&out[8..], &[0.0, 0.0]);
    }

    #[test]
    fn test_wraparound_and_skip() {
        let ring = SampleRing::new(4);
        let mut out = [0.0; 4];

        for round in 0..10 {
            let base = round as Sample;
            assert_eq!(ring.write(&[base, base + 0.25, base + 0.5]), 3);
            assert_eq!(ring.skip(1), 1);
            assert_spaces(&ring);
            assert_eq!(ring.read(&mut out[..2]), 2);
            assert_eq!(&out[..2], &[base + 0.25, base + 0.5]);
        }
        assert_eq!(ring.read_space(), 0);
        assert_eq!(ring.skip(3), 0);
    }

    #[test]
    fn test_reset_empties() {
        let ring = SampleRing::new(32);
        ring.write(&[1.0; 20]);
        ring.reset();
        assert_eq!(ring.read_space(), 0);
        assert_eq!(ring.write_space(), 32);
        assert_spaces(&ring);
    }

    #[test]
    fn test_write_silence() {
        let ring = SampleRing::new(4);
        ring.write(&[9.0]);
        assert_eq!(ring.write_silence(10), 3);
        let mut out = [1.0; 4];
        ring.read(&mut out);
        assert_eq!(out, [9.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_concurrent_reader_never_sees_unwritten_samples() {
        let ring = Arc::new(SampleRing::new(257));
        let total = 50_000usize;

        let writer_ring = ring.clone();
        let writer = std::thread::spawn(move || {
            let mut next = 0usize;
            while next < total {
                let chunk: Vec<Sample> = (next..(next + 64).min(total))
                    .map(|i| i as Sample)
                    .collect();
                let written = writer_ring.write(&chunk);
                next += written;
                if written == 0 {
                    std::thread::yield_now();
                }
            }
        });

        // Reader consumes in larger chunks than the writer produces
        let mut expected = 0usize;
        let mut out = vec![0.0; 300];
        while expected < total {
            let space = ring.read_space();
            assert!(space <= ring.capacity());
            let got = ring.read(&mut out);
            // Space can only grow between the two calls
            assert!(got >= space.min(out.len()));
            for sample in &out[..got] {
                assert_eq!(*sample, expected as Sample);
                expected += 1;
            }
            if got == 0 {
                std::thread::yield_now();
            }
        }

        writer.join().unwrap();
        assert_eq!(ring.read_space(), 0);
    }
}
