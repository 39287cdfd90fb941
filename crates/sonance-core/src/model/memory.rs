//! In-memory models
//!
//! Simple implementations of the model contracts backed by vectors. Used by
//! the demo player and by tests; completion can be driven by hand to simulate
//! a model that is still loading.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use super::{CurveModel, CurvePoint, DenseModel, Model, ModelHandle, ModelStore, Note, NoteModel};
use crate::types::{ChannelBuffers, ModelId, Sample};

// ═══════════════════════════════════════════════════════════════════════════
// Dense
// ═══════════════════════════════════════════════════════════════════════════

/// Waveform held fully in memory, one `Vec` per channel
pub struct MemoryDenseModel {
    sample_rate: u32,
    start_frame: u64,
    channels: Vec<Vec<Sample>>,
    completion: AtomicU8,
}

impl MemoryDenseModel {
    /// Create a model from per-channel sample vectors (all the same length)
    pub fn new(sample_rate: u32, channels: Vec<Vec<Sample>>) -> Self {
        if let Some(first) = channels.first() {
            assert!(
                channels.iter().all(|c| c.len() == first.len()),
                "Channel lengths must match"
            );
        }
        Self {
            sample_rate,
            start_frame: 0,
            channels,
            completion: AtomicU8::new(100),
        }
    }

    /// Create a mono model
    pub fn mono(sample_rate: u32, samples: Vec<Sample>) -> Self {
        Self::new(sample_rate, vec![samples])
    }

    /// Place the content at `frame` instead of 0
    pub fn with_start_frame(mut self, frame: u64) -> Self {
        self.start_frame = frame;
        self
    }

    /// Set the reported loading progress (clamped to 100)
    pub fn set_completion(&self, percent: u8) {
        self.completion.store(percent.min(100), Ordering::Release);
    }

    fn frame_count(&self) -> u64 {
        self.channels.first().map(Vec::len).unwrap_or(0) as u64
    }
}

impl Model for MemoryDenseModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn start_frame(&self) -> u64 {
        self.start_frame
    }

    fn end_frame(&self) -> u64 {
        self.start_frame + self.frame_count()
    }

    fn completion(&self) -> u8 {
        self.completion.load(Ordering::Acquire)
    }
}

impl DenseModel for MemoryDenseModel {
    fn get_data(
        &self,
        channels: Range<usize>,
        start_frame: u64,
        frame_count: usize,
        out: &mut ChannelBuffers,
    ) -> usize {
        let end = start_frame + frame_count as u64;
        if end <= self.start_frame || start_frame >= self.end_frame() {
            return 0;
        }
        // Leading frames before the content are written as silence
        let lead = self.start_frame.saturating_sub(start_frame) as usize;
        let from = start_frame.saturating_sub(self.start_frame) as usize;
        let available = (self.frame_count() as usize - from).min(frame_count - lead);

        for (i, source) in channels.enumerate() {
            if i >= out.channel_count() {
                break;
            }
            let Some(samples) = self.channels.get(source) else {
                continue;
            };
            let dest = out.channel_mut(i);
            let lead = lead.min(dest.len());
            dest[..lead].fill(0.0);
            let n = available.min(dest.len() - lead);
            dest[lead..lead + n].copy_from_slice(&samples[from..from + n]);
        }
        lead + available
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Notes
// ═══════════════════════════════════════════════════════════════════════════

/// Note list held in memory, kept sorted by onset
pub struct MemoryNoteModel {
    sample_rate: u32,
    notes: Vec<Note>,
    completion: AtomicU8,
}

impl MemoryNoteModel {
    pub fn new(sample_rate: u32, mut notes: Vec<Note>) -> Self {
        notes.sort_by_key(|n| n.frame);
        Self {
            sample_rate,
            notes,
            completion: AtomicU8::new(100),
        }
    }

    pub fn set_completion(&self, percent: u8) {
        self.completion.store(percent.min(100), Ordering::Release);
    }
}

impl Model for MemoryNoteModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start_frame(&self) -> u64 {
        self.notes.first().map(|n| n.frame).unwrap_or(0)
    }

    fn end_frame(&self) -> u64 {
        self.notes.iter().map(Note::end_frame).max().unwrap_or(0)
    }

    fn completion(&self) -> u8 {
        self.completion.load(Ordering::Acquire)
    }
}

impl NoteModel for MemoryNoteModel {
    fn notes_within(&self, start: u64, end: u64) -> Vec<Note> {
        self.notes
            .iter()
            .take_while(|n| n.frame < end)
            .filter(|n| n.end_frame() > start || (n.duration == 0 && n.frame >= start))
            .copied()
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Curves
// ═══════════════════════════════════════════════════════════════════════════

/// Regularly sampled value track held in memory
pub struct MemoryCurveModel {
    sample_rate: u32,
    resolution: u64,
    points: Vec<CurvePoint>,
    completion: AtomicU8,
}

impl MemoryCurveModel {
    pub fn new(sample_rate: u32, resolution: u64, mut points: Vec<CurvePoint>) -> Self {
        points.sort_by_key(|p| p.frame);
        Self {
            sample_rate,
            resolution: resolution.max(1),
            points,
            completion: AtomicU8::new(100),
        }
    }

    /// Build a track from values spaced `resolution` frames apart starting at 0
    pub fn from_values(sample_rate: u32, resolution: u64, values: &[f32]) -> Self {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| CurvePoint::new(i as u64 * resolution, *v))
            .collect();
        Self::new(sample_rate, resolution, points)
    }

    pub fn set_completion(&self, percent: u8) {
        self.completion.store(percent.min(100), Ordering::Release);
    }

    fn first_at_or_after(&self, frame: u64) -> usize {
        self.points.partition_point(|p| p.frame < frame)
    }
}

impl Model for MemoryCurveModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start_frame(&self) -> u64 {
        self.points.first().map(|p| p.frame).unwrap_or(0)
    }

    fn end_frame(&self) -> u64 {
        self.points
            .last()
            .map(|p| p.frame + self.resolution)
            .unwrap_or(0)
    }

    fn completion(&self) -> u8 {
        self.completion.load(Ordering::Acquire)
    }
}

impl CurveModel for MemoryCurveModel {
    fn resolution(&self) -> u64 {
        self.resolution
    }

    fn points_within(&self, start: u64, end: u64) -> Vec<CurvePoint> {
        let from = self.first_at_or_after(start);
        self.points[from..]
            .iter()
            .take_while(|p| p.frame < end)
            .copied()
            .collect()
    }

    fn next_point_after(&self, frame: u64) -> Option<CurvePoint> {
        let index = self.points.partition_point(|p| p.frame <= frame);
        self.points.get(index).copied()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════════

/// Thread-safe in-memory model store
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<ModelId, ModelHandle>>,
    next_id: AtomicU32,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model and return its id
    pub fn insert(&self, handle: ModelHandle) -> ModelId {
        let id = ModelId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        if let Ok(mut models) = self.models.write() {
            models.insert(id, handle);
        }
        id
    }

    pub fn insert_dense(&self, model: MemoryDenseModel) -> (ModelId, Arc<MemoryDenseModel>) {
        let model = Arc::new(model);
        (self.insert(ModelHandle::Dense(model.clone())), model)
    }

    pub fn insert_notes(&self, model: MemoryNoteModel) -> (ModelId, Arc<MemoryNoteModel>) {
        let model = Arc::new(model);
        (self.insert(ModelHandle::Notes(model.clone())), model)
    }

    pub fn insert_curve(&self, model: MemoryCurveModel) -> (ModelId, Arc<MemoryCurveModel>) {
        let model = Arc::new(model);
        (self.insert(ModelHandle::Curve(model.clone())), model)
    }

    /// Unregister a model, returning it if present
    pub fn remove(&self, id: ModelId) -> Option<ModelHandle> {
        self.models.write().ok().and_then(|mut m| m.remove(&id))
    }
}

impl ModelStore for ModelRegistry {
    fn model(&self, id: ModelId) -> Option<ModelHandle> {
        self.models.read().ok().and_then(|m| m.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_get_data_clips_at_end() {
        let model = MemoryDenseModel::new(8000, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]])
            .with_start_frame(10);
        let mut out = ChannelBuffers::silence(1, 4);

        assert_eq!(model.get_data(1..2, 11, 4, &mut out), 2);
        assert_eq!(out.channel(0), &[5.0, 6.0, 0.0, 0.0]);
        assert_eq!(model.get_data(0..1, 6, 4, &mut out), 0);
        assert_eq!(model.end_frame(), 13);
    }

    #[test]
    fn test_dense_get_data_before_start_returns_overlap() {
        let model = MemoryDenseModel::mono(8000, vec![1.0, 2.0, 3.0]).with_start_frame(10);
        let mut out = ChannelBuffers::silence(1, 4);
        out.channel_mut(0).fill(9.0);

        assert_eq!(model.get_data(0..1, 8, 4, &mut out), 4);
        assert_eq!(out.channel(0), &[0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_notes_within_overlap() {
        let model = MemoryNoteModel::new(
            44100,
            vec![
                Note::new(0, 100, 440.0, 100),
                Note::new(150, 0, 440.0, 100),
                Note::new(500, 10, 220.0, 100),
            ],
        );
        let notes = model.notes_within(50, 200);
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].frame, 0);
        assert_eq!(notes[1].duration, 0);
        assert!(model.notes_within(100, 150).is_empty());
        assert_eq!(model.end_frame(), 510);
    }

    #[test]
    fn test_curve_queries() {
        let model = MemoryCurveModel::from_values(44100, 256, &[100.0, 200.0, 0.0, 300.0]);
        let points = model.points_within(256, 768);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 200.0);
        assert_eq!(model.next_point_after(256).map(|p| p.frame), Some(512));
        assert_eq!(model.next_point_after(768), None);
        assert_eq!(model.end_frame(), 1024);
    }

    #[test]
    fn test_registry_roundtrip() {
        let registry = ModelRegistry::new();
        let (id, model) = registry.insert_dense(MemoryDenseModel::mono(48000, vec![0.0; 16]));
        assert!(registry.model(id).is_some());

        model.set_completion(40);
        let handle = registry.model(id).unwrap();
        assert!(!handle.model().is_ready());
        assert_eq!(handle.kind(), "dense");

        assert!(registry.remove(id).is_some());
        assert!(registry.model(id).is_none());
    }
}
