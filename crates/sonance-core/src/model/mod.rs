//! Model contracts consumed by the playback engine
//!
//! The engine never owns model data. It talks to a [`ModelStore`] that hands
//! out reference-counted models of one of three playable kinds:
//!
//! - [`DenseModel`]: sampled waveform data read in blocks
//! - [`NoteModel`]: sparse notes/onsets, rendered by triggering a sample clip
//! - [`CurveModel`]: a continuous value track (e.g. a pitch curve) driving an oscillator
//!
//! Anything else is wrapped as [`ModelHandle::Other`] and is not playable.

mod memory;

pub use memory::{MemoryCurveModel, MemoryDenseModel, MemoryNoteModel, ModelRegistry};

use std::ops::Range;
use std::sync::Arc;

use crate::types::{ChannelBuffers, ModelId};

/// Properties shared by every model
pub trait Model: Send + Sync {
    /// Native sample rate of the model's timeline (Hz)
    fn sample_rate(&self) -> u32;

    /// Number of audio channels the model contributes (dense models only)
    fn channel_count(&self) -> usize {
        1
    }

    /// First frame with content
    fn start_frame(&self) -> u64;

    /// One past the last frame with content
    fn end_frame(&self) -> u64;

    /// Loading progress in percent (0..=100)
    fn completion(&self) -> u8 {
        100
    }

    /// Whether the model has finished loading
    fn is_ready(&self) -> bool {
        self.completion() >= 100
    }
}

/// Sampled waveform data
pub trait DenseModel: Model {
    /// Read `frame_count` frames of `channels` starting at `start_frame`
    ///
    /// Channel `channels.start + i` lands in `out` channel `i`, starting at
    /// index 0. Frames before the model's start are written as silence.
    /// Returns the number of frames written; frames past that count are left
    /// untouched.
    fn get_data(
        &self,
        channels: Range<usize>,
        start_frame: u64,
        frame_count: usize,
        out: &mut ChannelBuffers,
    ) -> usize;
}

/// A single note or onset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    /// Onset frame
    pub frame: u64,
    /// Length in frames (0 means the note has no audible extent)
    pub duration: u64,
    /// Pitch in Hz
    pub frequency: f32,
    /// MIDI-style velocity (0..=127)
    pub velocity: u8,
}

impl Note {
    pub fn new(frame: u64, duration: u64, frequency: f32, velocity: u8) -> Self {
        Self {
            frame,
            duration,
            frequency,
            velocity,
        }
    }

    /// Frame at which the note ends
    #[inline]
    pub fn end_frame(&self) -> u64 {
        self.frame + self.duration
    }

    /// Note level derived from velocity (0.0..=1.0)
    #[inline]
    pub fn level(&self) -> f32 {
        self.velocity.min(127) as f32 / 127.0
    }
}

/// Sparse note/onset data
pub trait NoteModel: Model {
    /// All notes overlapping `[start, end)`, ordered by onset frame
    fn notes_within(&self, start: u64, end: u64) -> Vec<Note>;
}

/// One point of a continuous value track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurvePoint {
    pub frame: u64,
    /// Value in Hz; zero or negative means "no pitch"
    pub value: f32,
}

impl CurvePoint {
    pub fn new(frame: u64, value: f32) -> Self {
        Self { frame, value }
    }
}

/// Continuous value track
pub trait CurveModel: Model {
    /// Frames between consecutive points
    fn resolution(&self) -> u64;

    /// All points within `[start, end)`, ordered by frame
    fn points_within(&self, start: u64, end: u64) -> Vec<CurvePoint>;

    /// First point strictly after `frame`
    fn next_point_after(&self, frame: u64) -> Option<CurvePoint>;
}

/// A model as handed out by the store, tagged with its playable kind
#[derive(Clone)]
pub enum ModelHandle {
    Dense(Arc<dyn DenseModel>),
    Notes(Arc<dyn NoteModel>),
    Curve(Arc<dyn CurveModel>),
    Other(Arc<dyn Model>),
}

impl ModelHandle {
    /// Access the shared model properties
    pub fn model(&self) -> &dyn Model {
        match self {
            ModelHandle::Dense(m) => m.as_ref(),
            ModelHandle::Notes(m) => m.as_ref(),
            ModelHandle::Curve(m) => m.as_ref(),
            ModelHandle::Other(m) => m.as_ref(),
        }
    }

    /// Short kind label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ModelHandle::Dense(_) => "dense",
            ModelHandle::Notes(_) => "notes",
            ModelHandle::Curve(_) => "curve",
            ModelHandle::Other(_) => "other",
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let model = self.model();
        f.debug_struct("ModelHandle")
            .field("kind", &self.kind())
            .field("sample_rate", &model.sample_rate())
            .field("channels", &model.channel_count())
            .field("extent", &(model.start_frame()..model.end_frame()))
            .finish()
    }
}

/// Registry mapping model ids to models
pub trait ModelStore: Send + Sync {
    fn model(&self, id: ModelId) -> Option<ModelHandle>;
}
