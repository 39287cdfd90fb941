//! Latency-compensated playback position
//!
//! The frame currently audible is not stored anywhere. It is reconstructed
//! from how far the read generation has been filled, minus everything still
//! between the fill cursor and the speaker:
//!
//! ```text
//! playing = buffered_to − device_latency − last_pulled_block
//!           − still_buffered + elapsed_since_last_pull
//! ```
//!
//! Each term is converted to seconds at the rate it was measured at (device
//! latency at the device rate, ring contents at the source rate, wall-clock
//! time scaled by the active stretch ratio). The result is an offset on the
//! virtual timeline of the playback ranges, which is then mapped to a frame.

use std::time::Duration;

use super::ranges::PlaybackRanges;
use crate::types::frames_to_seconds;

/// Extra real time allowed after `play` before a looping estimate that is
/// still behind the start frame is trusted as a wrap-around
///
/// Start-up transients (the device draining its own buffer, the first
/// unfilled pulls) make the raw estimate lag the start frame for roughly
/// one latency plus one block. Beyond that plus this tolerance, a looping
/// estimate behind the start frame is taken to have wrapped.
pub const START_GUARD_TOLERANCE: Duration = Duration::from_millis(100);

/// Snapshot of the counters the estimate is derived from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorInput {
    /// Playback frame the read generation has been filled up to
    pub buffered_to: u64,
    /// Frames currently waiting in the read generation
    pub buffered_frames: usize,
    /// Source frames handed out by the last pull
    pub last_block_frames: usize,
    /// Output latency reported by the device (device frames)
    pub device_latency_frames: usize,
    pub device_rate: u32,
    pub source_rate: u32,
    pub since_last_pull: Duration,
    pub since_play: Duration,
    /// Active time ratio of the chain (> 1.0 plays slower)
    pub stretch_ratio: f64,
}

/// Result of one estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    /// Playback frame
    pub frame: u64,
    /// Non-looping playback has reached the end of the last range
    pub reached_end: bool,
}

#[derive(Debug, Clone, Copy)]
struct StartGuard {
    frame: u64,
    offset: i64,
}

/// Stateful position estimator (start guard and monotonic clamp)
#[derive(Debug, Clone)]
pub struct PositionEstimator {
    guard: Option<StartGuard>,
    last_reported: Option<u64>,
    tolerance: Duration,
}

impl PositionEstimator {
    pub fn new(tolerance: Duration) -> Self {
        Self {
            guard: None,
            last_reported: None,
            tolerance,
        }
    }

    /// Arm the start guard for playback starting at `frame`
    pub fn start(&mut self, frame: u64, ranges: &PlaybackRanges) {
        self.guard = Some(StartGuard {
            frame,
            offset: ranges.virtual_offset(frame) as i64,
        });
        self.last_reported = None;
    }

    /// Last frame handed out (the start frame before the first estimate)
    pub fn last_reported(&self) -> Option<u64> {
        self.last_reported.or(self.guard.map(|g| g.frame))
    }

    /// Estimate the audible frame
    pub fn estimate(&mut self, input: &EstimatorInput, ranges: &PlaybackRanges) -> Estimate {
        let source_rate = input.source_rate;
        if source_rate == 0 {
            return Estimate {
                frame: self.last_reported().unwrap_or(0),
                reached_end: false,
            };
        }
        let device_rate = if input.device_rate > 0 {
            input.device_rate
        } else {
            source_rate
        };
        let ratio = if input.stretch_ratio > 0.0 {
            input.stretch_ratio
        } else {
            1.0
        };

        let fill_t = frames_to_seconds(ranges.virtual_offset(input.buffered_to) as f64, source_rate);
        let latency_t = frames_to_seconds(input.device_latency_frames as f64, device_rate);
        let block_t = frames_to_seconds(input.last_block_frames as f64, source_rate);
        let buffered_t = frames_to_seconds(input.buffered_frames as f64, source_rate);
        // Between two pulls at most one block's worth of source time passes
        let elapsed_t = (input.since_last_pull.as_secs_f64() / ratio).min(block_t);

        let playing_t = fill_t - latency_t - block_t - buffered_t + elapsed_t;
        let raw_offset = (playing_t * source_rate as f64).round() as i64;

        if let Some(guard) = self.guard {
            let settle = Duration::from_secs_f64((latency_t + block_t).max(0.0)) + self.tolerance;
            if raw_offset >= guard.offset || (ranges.is_looping() && input.since_play > settle) {
                self.guard = None;
            } else {
                self.last_reported = Some(guard.frame);
                return Estimate {
                    frame: guard.frame,
                    reached_end: false,
                };
            }
        }

        let total = ranges.total_duration() as i64;
        let reached_end = !ranges.is_looping() && !ranges.is_empty() && raw_offset >= total;
        let mut frame = ranges.frame_at_offset(raw_offset);

        if !ranges.is_looping() {
            if let Some(last) = self.last_reported {
                frame = frame.max(last);
            }
        }
        self.last_reported = Some(frame);

        Estimate { frame, reached_end }
    }
}

impl Default for PositionEstimator {
    fn default() -> Self {
        Self::new(START_GUARD_TOLERANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ranges::PlaybackRange;

    fn input(buffered_to: u64, buffered_frames: usize) -> EstimatorInput {
        EstimatorInput {
            buffered_to,
            buffered_frames,
            last_block_frames: 512,
            device_latency_frames: 256,
            device_rate: 48000,
            source_rate: 48000,
            since_last_pull: Duration::ZERO,
            since_play: Duration::ZERO,
            stretch_ratio: 1.0,
        }
    }

    #[test]
    fn test_start_guard_reports_start_frame() {
        let ranges = PlaybackRanges::unconstrained(1_000_000, false);
        let mut estimator = PositionEstimator::default();
        estimator.start(10_000, &ranges);

        // Nothing consumed yet: raw estimate is behind the start
        let estimate = estimator.estimate(&input(10_000, 0), &ranges);
        assert_eq!(estimate.frame, 10_000);
        assert!(!estimate.reached_end);
    }

    #[test]
    fn test_subtracts_everything_in_flight() {
        let ranges = PlaybackRanges::unconstrained(1_000_000, false);
        let mut estimator = PositionEstimator::default();
        estimator.start(0, &ranges);

        // 20000 filled, 4000 still in the ring, 512 in the last block, 256 latency
        let estimate = estimator.estimate(&input(20_000, 4000), &ranges);
        assert_eq!(estimate.frame, 20_000 - 4000 - 512 - 256);

        // Elapsed time is capped at one block
        let mut later = input(20_000, 4000);
        later.since_last_pull = Duration::from_secs(1);
        let estimate = estimator.estimate(&later, &ranges);
        assert_eq!(estimate.frame, 20_000 - 4000 - 256);
    }

    #[test]
    fn test_non_looping_is_monotonic_and_stops_at_end() {
        let ranges = PlaybackRanges::unconstrained(10_000, false);
        let mut estimator = PositionEstimator::default();
        estimator.start(0, &ranges);

        let first = estimator.estimate(&input(8000, 1000), &ranges);
        let second = estimator.estimate(&input(8000, 3000), &ranges);
        assert_eq!(second.frame, first.frame);

        let end = estimator.estimate(&input(12_000, 0), &ranges);
        assert!(end.reached_end);
        assert_eq!(end.frame, 10_000);
    }

    #[test]
    fn test_looping_wraps_negative_offsets() {
        let ranges = PlaybackRanges::new(vec![PlaybackRange::new(1000, 4000)], true);
        let mut estimator = PositionEstimator::default();
        estimator.start(1000, &ranges);

        // Fill wrapped and is 100 frames into the next lap; 1000 more are buffered
        let mut sample = input(1100, 1000);
        sample.last_block_frames = 0;
        sample.device_latency_frames = 0;
        sample.since_play = Duration::from_secs(1);
        let estimate = estimator.estimate(&sample, &ranges);
        assert_eq!(estimate.frame, 1000 + 4000 - 900);
        assert!(!estimate.reached_end);
    }

    #[test]
    fn test_looping_guard_releases_after_settle_time() {
        let ranges = PlaybackRanges::new(vec![PlaybackRange::new(1000, 4000)], true);
        let mut estimator = PositionEstimator::default();
        estimator.start(4900, &ranges);

        // Already wrapped: raw estimate lies before the start frame
        let mut sample = input(1200, 0);
        sample.last_block_frames = 0;
        sample.device_latency_frames = 0;
        assert_eq!(estimator.estimate(&sample, &ranges).frame, 4900);

        sample.since_play = Duration::from_millis(500);
        assert_eq!(estimator.estimate(&sample, &ranges).frame, 1200);
    }

    #[test]
    fn test_stretch_scales_elapsed_time() {
        let ranges = PlaybackRanges::unconstrained(1_000_000, false);
        let mut estimator = PositionEstimator::default();
        estimator.start(0, &ranges);

        let mut sample = input(48_000, 0);
        sample.device_latency_frames = 0;
        sample.last_block_frames = 4800;
        sample.since_last_pull = Duration::from_millis(50);
        sample.stretch_ratio = 2.0;
        // 50 ms of wall clock at half speed is 25 ms (1200 frames) of source
        let estimate = estimator.estimate(&sample, &ranges);
        assert_eq!(estimate.frame, 48_000 - 4800 + 1200);
    }
}
