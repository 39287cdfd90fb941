//! Selection, loop mode and reference alignment
//!
//! Selections and the frames passed to `play` live on the reference timeline.
//! The engine plays on its own timeline; an [`Alignment`] maps between the two
//! (identity unless the host aligns several recordings against each other).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Half-open frame range `[start, end)` on the reference timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Selection {
    pub start: u64,
    pub end: u64,
}

impl Selection {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn duration(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub fn contains(&self, frame: u64) -> bool {
        frame >= self.start && frame < self.end
    }
}

/// Provider of the selection set and the play modes
pub trait SelectionProvider: Send + Sync {
    /// Selected ranges, ascending and non-overlapping
    fn selections(&self) -> Vec<Selection>;

    /// Whether playback is constrained to the selection
    fn play_selection_mode(&self) -> bool;

    /// Whether playback loops
    fn play_loop_mode(&self) -> bool;
}

/// Mapping between the reference timeline and the playback timeline
pub trait Alignment: Send + Sync {
    /// Reference frame → playback frame
    fn from_reference(&self, frame: u64) -> u64;

    /// Playback frame → reference frame
    fn to_reference(&self, frame: u64) -> u64;
}

/// Playback and reference timelines are the same
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityAlignment;

impl Alignment for IdentityAlignment {
    fn from_reference(&self, frame: u64) -> u64 {
        frame
    }

    fn to_reference(&self, frame: u64) -> u64 {
        frame
    }
}

/// Playback timeline shifted by a constant offset against the reference
#[derive(Debug, Clone, Copy)]
pub struct OffsetAlignment {
    /// Playback frame corresponding to reference frame 0
    pub offset: i64,
}

impl Alignment for OffsetAlignment {
    fn from_reference(&self, frame: u64) -> u64 {
        (frame as i64 + self.offset).max(0) as u64
    }

    fn to_reference(&self, frame: u64) -> u64 {
        (frame as i64 - self.offset).max(0) as u64
    }
}

/// In-memory selection state
#[derive(Debug, Default)]
pub struct SelectionState {
    selections: RwLock<Vec<Selection>>,
    selection_mode: AtomicBool,
    loop_mode: AtomicBool,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the selection set
    ///
    /// Empty ranges are dropped; overlapping or touching ranges are merged.
    pub fn set_selections(&self, selections: impl IntoIterator<Item = Selection>) {
        let normalized = normalize_selections(selections);
        match self.selections.write() {
            Ok(mut current) => *current = normalized,
            Err(poisoned) => *poisoned.into_inner() = normalized,
        }
    }

    pub fn clear_selections(&self) {
        self.set_selections(std::iter::empty());
    }

    pub fn set_play_selection_mode(&self, enabled: bool) {
        self.selection_mode.store(enabled, Ordering::Relaxed);
    }

    pub fn set_play_loop_mode(&self, enabled: bool) {
        self.loop_mode.store(enabled, Ordering::Relaxed);
    }
}

impl SelectionProvider for SelectionState {
    fn selections(&self) -> Vec<Selection> {
        self.selections
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn play_selection_mode(&self) -> bool {
        self.selection_mode.load(Ordering::Relaxed)
    }

    fn play_loop_mode(&self) -> bool {
        self.loop_mode.load(Ordering::Relaxed)
    }
}

/// Sort, drop empty ranges and merge overlaps
pub fn normalize_selections(selections: impl IntoIterator<Item = Selection>) -> Vec<Selection> {
    let mut sorted: Vec<Selection> = selections
        .into_iter()
        .filter(|s| s.end > s.start)
        .collect();
    sorted.sort();

    let mut merged: Vec<Selection> = Vec::with_capacity(sorted.len());
    for selection in sorted {
        match merged.last_mut() {
            Some(last) if selection.start <= last.end => {
                last.end = last.end.max(selection.end);
            }
            _ => merged.push(selection),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_merges_and_sorts() {
        let merged = normalize_selections([
            Selection::new(500, 600),
            Selection::new(100, 200),
            Selection::new(150, 300),
            Selection::new(700, 700),
        ]);
        assert_eq!(merged, vec![Selection::new(100, 300), Selection::new(500, 600)]);
    }

    #[test]
    fn test_offset_alignment_roundtrip() {
        let alignment = OffsetAlignment { offset: 1000 };
        assert_eq!(alignment.from_reference(10), 1010);
        assert_eq!(alignment.to_reference(1010), 10);
        // Frames before the offset clamp to the start
        assert_eq!(alignment.to_reference(10), 0);
    }

    #[test]
    fn test_selection_state_modes() {
        let state = SelectionState::new();
        assert!(!state.play_loop_mode());
        state.set_play_loop_mode(true);
        state.set_selections([Selection::new(10, 20)]);
        assert!(state.play_loop_mode());
        assert_eq!(state.selections().len(), 1);
        state.clear_selections();
        assert!(state.selections().is_empty());
    }
}
