//! Playback ranges
//!
//! The list of frame ranges the engine is allowed to play, on the playback
//! timeline. Either the (aligned) selection set when playback is constrained,
//! or one range covering all content. The ranges are treated as a single
//! concatenated "virtual" timeline: the fill task walks it forward in chunks,
//! jumping gaps and wrapping when looping, and the position estimator maps
//! offsets on it back to frames.

use crate::selection::{Alignment, Selection};

/// Fade length at a jump for ranges of at least [`SHORT_RANGE_FRAMES`]
pub const FADE_FRAMES: usize = 50;

/// Fade length at a jump for ranges shorter than [`SHORT_RANGE_FRAMES`]
pub const SHORT_FADE_FRAMES: usize = 10;

/// Ranges shorter than this get the short fade
pub const SHORT_RANGE_FRAMES: u64 = 300;

/// Ranges shorter than this get no fade at all
pub const TINY_RANGE_FRAMES: u64 = 100;

/// One contiguous playable range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackRange {
    pub start: u64,
    pub duration: u64,
}

impl PlaybackRange {
    pub fn new(start: u64, duration: u64) -> Self {
        Self { start, duration }
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.start + self.duration
    }

    #[inline]
    pub fn contains(&self, frame: u64) -> bool {
        frame >= self.start && frame < self.end()
    }

    /// Fade length used when entering or leaving this range by a jump
    pub fn fade_frames(&self) -> usize {
        if self.duration < TINY_RANGE_FRAMES {
            0
        } else if self.duration < SHORT_RANGE_FRAMES {
            SHORT_FADE_FRAMES
        } else {
            FADE_FRAMES
        }
    }
}

/// One piece of a fill, lying inside a single range (or past the end of content)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillChunk {
    /// First playback frame
    pub start: u64,
    pub frames: usize,
    /// Fade-in length; the fade starts `fade_in / 2` frames before the chunk
    pub fade_in: usize,
    /// Fade-out length; the fade ends `fade_out / 2` frames after the chunk
    pub fade_out: usize,
    /// Past the end of non-looping content: write silence
    pub silent: bool,
}

/// Ordered, non-overlapping list of playable ranges
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackRanges {
    ranges: Vec<PlaybackRange>,
    looping: bool,
}

enum Location {
    Inside(usize),
    /// In a gap (or before the first range); the index is the next range
    Before(usize),
    Past,
}

impl PlaybackRanges {
    /// Build from explicit ranges; empty ones are dropped, the rest sorted
    pub fn new(mut ranges: Vec<PlaybackRange>, looping: bool) -> Self {
        ranges.retain(|r| r.duration > 0);
        ranges.sort_by_key(|r| r.start);
        Self { ranges, looping }
    }

    /// One range over `[0, content_end)`
    pub fn unconstrained(content_end: u64, looping: bool) -> Self {
        Self::new(vec![PlaybackRange::new(0, content_end)], looping)
    }

    /// Build from the current selection and play modes
    ///
    /// Selections are on the reference timeline and are mapped through
    /// `alignment`. Without selection constraint (or with an empty
    /// selection) the whole content is playable.
    pub fn build(
        selections: &[Selection],
        constrained: bool,
        looping: bool,
        content_end: u64,
        alignment: &dyn Alignment,
    ) -> Self {
        if !constrained || selections.is_empty() {
            return Self::unconstrained(content_end, looping);
        }
        let ranges = selections
            .iter()
            .map(|s| {
                let start = alignment.from_reference(s.start);
                let end = alignment.from_reference(s.end).max(start);
                PlaybackRange::new(start, end - start)
            })
            .collect();
        Self::new(ranges, looping)
    }

    #[inline]
    pub fn ranges(&self) -> &[PlaybackRange] {
        &self.ranges
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    #[inline]
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Length of the concatenated virtual timeline
    pub fn total_duration(&self) -> u64 {
        self.ranges.iter().map(|r| r.duration).sum()
    }

    pub fn first_start(&self) -> Option<u64> {
        self.ranges.first().map(|r| r.start)
    }

    pub fn last_end(&self) -> Option<u64> {
        self.ranges.last().map(PlaybackRange::end)
    }

    fn locate(&self, frame: u64) -> Location {
        let index = self.ranges.partition_point(|r| r.end() <= frame);
        match self.ranges.get(index) {
            Some(r) if r.contains(frame) => Location::Inside(index),
            Some(_) => Location::Before(index),
            None => Location::Past,
        }
    }

    fn contiguous_before(&self, index: usize) -> bool {
        index > 0 && self.ranges[index - 1].end() == self.ranges[index].start
    }

    fn contiguous_after(&self, index: usize) -> bool {
        index + 1 < self.ranges.len() && self.ranges[index].end() == self.ranges[index + 1].start
    }

    /// Where playback continues after reaching the end of range `index`
    fn continuation(&self, index: usize) -> u64 {
        match self.ranges.get(index + 1) {
            Some(next) => next.start,
            None if self.looping => self.ranges[0].start,
            None => self.ranges[index].end(),
        }
    }

    /// Offset of `frame` on the virtual timeline
    ///
    /// Frames in a gap map to the start of the following range; frames past
    /// the last range continue linearly beyond the total duration.
    pub fn virtual_offset(&self, frame: u64) -> u64 {
        let mut offset = 0;
        for range in &self.ranges {
            if frame < range.start {
                return offset;
            }
            if frame < range.end() {
                return offset + (frame - range.start);
            }
            offset += range.duration;
        }
        match self.last_end() {
            Some(end) => offset + (frame - end),
            None => frame,
        }
    }

    /// Playback frame at `offset` on the virtual timeline
    ///
    /// Wraps when looping; otherwise clamps to `[first_start, last_end]`.
    pub fn frame_at_offset(&self, offset: i64) -> u64 {
        let total = self.total_duration() as i64;
        if total == 0 {
            return offset.max(0) as u64;
        }
        let mut remaining = if self.looping {
            offset.rem_euclid(total)
        } else {
            offset.clamp(0, total)
        } as u64;

        for range in &self.ranges {
            if remaining < range.duration {
                return range.start + remaining;
            }
            remaining -= range.duration;
        }
        self.last_end().unwrap_or(0)
    }

    /// Clamp a requested start frame (playback timeline) into the ranges
    ///
    /// Before the first range or at/after the end of the last one, playback
    /// starts at the first range. Frames in a gap are left for the fill to
    /// jump.
    pub fn clamp_start(&self, frame: u64) -> u64 {
        match (self.first_start(), self.last_end()) {
            (Some(first), Some(last)) if frame < first || frame >= last => first,
            (Some(_), Some(_)) => frame,
            _ => 0,
        }
    }

    /// Split a fill of `frames` frames starting at `from` into chunks
    ///
    /// Chunks are appended to `chunks` (cleared first). Returns the playback
    /// frame the next fill continues from.
    pub fn plan(&self, from: u64, frames: usize, chunks: &mut Vec<FillChunk>) -> u64 {
        chunks.clear();
        let mut position = from;
        let mut processed = 0usize;

        while processed < frames {
            let wanted = frames - processed;
            match self.locate(position) {
                Location::Inside(index) => {
                    let range = self.ranges[index];
                    let count = wanted.min((range.end() - position) as usize);
                    let remaining = wanted - count;
                    let fade = range.fade_frames();

                    let fade_in = if position == range.start && !self.contiguous_before(index) {
                        fade.min(processed * 2)
                    } else {
                        0
                    };
                    let reaches_end = position + count as u64 == range.end();
                    let fade_out = if reaches_end && !self.contiguous_after(index) {
                        fade.min(remaining * 2)
                    } else {
                        0
                    };

                    chunks.push(FillChunk {
                        start: position,
                        frames: count,
                        fade_in,
                        fade_out,
                        silent: false,
                    });
                    processed += count;
                    position += count as u64;
                    if reaches_end {
                        position = self.continuation(index);
                    }
                }
                Location::Before(index) => {
                    position = self.ranges[index].start;
                }
                Location::Past if self.looping && !self.ranges.is_empty() => {
                    position = self.ranges[0].start;
                }
                Location::Past => {
                    chunks.push(FillChunk {
                        start: position,
                        frames: wanted,
                        fade_in: 0,
                        fade_out: 0,
                        silent: true,
                    });
                    processed += wanted;
                    position += wanted as u64;
                }
            }
        }
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{IdentityAlignment, OffsetAlignment};

    fn spans(chunks: &[FillChunk]) -> Vec<(u64, usize)> {
        chunks.iter().map(|c| (c.start, c.frames)).collect()
    }

    #[test]
    fn test_loop_wraps_to_range_start() {
        let ranges = PlaybackRanges::new(vec![PlaybackRange::new(1000, 4000)], true);
        let mut chunks = Vec::new();
        let next = ranges.plan(4990, 50, &mut chunks);

        assert_eq!(spans(&chunks), vec![(4990, 10), (1000, 40)]);
        assert_eq!(next, 1040);
        // Leaving the range fades out, re-entering fades in (limited by room)
        assert_eq!(chunks[0].fade_out, 50);
        assert_eq!(chunks[1].fade_in, 20);
        assert!(chunks.iter().all(|c| !c.silent));
    }

    #[test]
    fn test_gaps_are_jumped() {
        let ranges = PlaybackRanges::new(
            vec![PlaybackRange::new(0, 80), PlaybackRange::new(500, 1000)],
            false,
        );
        let mut chunks = Vec::new();
        let next = ranges.plan(50, 200, &mut chunks);
        assert_eq!(spans(&chunks), vec![(50, 30), (500, 170)]);
        assert_eq!(next, 670);
        // Range [0,80) is too short for a fade
        assert_eq!(chunks[0].fade_out, 0);
        assert_eq!(chunks[1].fade_in, 50);
    }

    #[test]
    fn test_short_range_uses_short_fade() {
        let ranges = PlaybackRanges::new(
            vec![PlaybackRange::new(0, 200), PlaybackRange::new(1000, 200)],
            true,
        );
        let mut chunks = Vec::new();
        ranges.plan(100, 400, &mut chunks);
        assert_eq!(spans(&chunks), vec![(100, 100), (1000, 200), (0, 100)]);
        assert_eq!(chunks[0].fade_out, SHORT_FADE_FRAMES);
        assert_eq!(chunks[1].fade_in, SHORT_FADE_FRAMES);
        assert_eq!(chunks[1].fade_out, SHORT_FADE_FRAMES);
    }

    #[test]
    fn test_adjacent_ranges_do_not_fade() {
        let ranges = PlaybackRanges::new(
            vec![PlaybackRange::new(0, 400), PlaybackRange::new(400, 400)],
            false,
        );
        let mut chunks = Vec::new();
        ranges.plan(300, 200, &mut chunks);
        assert_eq!(spans(&chunks), vec![(300, 100), (400, 100)]);
        assert!(chunks.iter().all(|c| c.fade_in == 0 && c.fade_out == 0));
    }

    #[test]
    fn test_past_end_without_loop_is_silent_tail() {
        let ranges = PlaybackRanges::unconstrained(1000, false);
        let mut chunks = Vec::new();
        let next = ranges.plan(900, 300, &mut chunks);
        assert_eq!(spans(&chunks), vec![(900, 100), (1000, 200)]);
        assert!(chunks[1].silent);
        assert_eq!(next, 1200);
    }

    #[test]
    fn test_empty_ranges_fill_silence() {
        let ranges = PlaybackRanges::new(Vec::new(), true);
        let mut chunks = Vec::new();
        ranges.plan(0, 64, &mut chunks);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].silent);
    }

    #[test]
    fn test_virtual_offsets() {
        let ranges = PlaybackRanges::new(
            vec![PlaybackRange::new(100, 100), PlaybackRange::new(500, 100)],
            false,
        );
        assert_eq!(ranges.virtual_offset(0), 0);
        assert_eq!(ranges.virtual_offset(150), 50);
        assert_eq!(ranges.virtual_offset(300), 100);
        assert_eq!(ranges.virtual_offset(550), 150);
        assert_eq!(ranges.virtual_offset(650), 250);

        assert_eq!(ranges.frame_at_offset(150), 550);
        assert_eq!(ranges.frame_at_offset(-5), 100);
        assert_eq!(ranges.frame_at_offset(1000), 600);

        let looping = PlaybackRanges::new(ranges.ranges().to_vec(), true);
        assert_eq!(looping.frame_at_offset(-10), 590);
        assert_eq!(looping.frame_at_offset(210), 110);
    }

    #[test]
    fn test_build_from_selection() {
        let selections = [Selection::new(100, 200), Selection::new(300, 300)];
        let ranges = PlaybackRanges::build(
            &selections,
            true,
            false,
            10_000,
            &OffsetAlignment { offset: 50 },
        );
        assert_eq!(ranges.ranges(), &[PlaybackRange::new(150, 100)]);

        let ranges = PlaybackRanges::build(&selections, false, false, 10_000, &IdentityAlignment);
        assert_eq!(ranges.ranges(), &[PlaybackRange::new(0, 10_000)]);
    }

    #[test]
    fn test_clamp_start() {
        let ranges = PlaybackRanges::new(
            vec![PlaybackRange::new(100, 100), PlaybackRange::new(500, 100)],
            false,
        );
        assert_eq!(ranges.clamp_start(50), 100);
        assert_eq!(ranges.clamp_start(150), 150);
        assert_eq!(ranges.clamp_start(300), 300);
        assert_eq!(ranges.clamp_start(600), 100);

        let whole = PlaybackRanges::unconstrained(1000, false);
        assert_eq!(whole.clamp_start(999), 999);
        assert_eq!(whole.clamp_start(1000), 0);
        assert_eq!(PlaybackRanges::default().clamp_start(42), 0);
    }
}
