//! Playback engine - buffered model mixing and position tracking
//!
//! This module contains the playback source and everything it drives:
//! - PlaybackSource/PlaybackOutput: control handle and real-time consumer
//! - Fill task: mixes registered models into the sample rings ahead of time
//! - ModelMixer: per-model roles (dense read, clip sampler, curve synth)
//! - PlaybackRanges: selection constraint, gap jumping and looping
//! - PositionEstimator: latency-compensated playback position

mod clip_mixer;
mod error;
mod events;
mod fill;
pub mod gc;
mod model_mixer;
mod position;
mod ranges;
mod source;
mod synth;

pub use clip_mixer::*;
pub use error::*;
pub use events::*;
pub use fill::PUBLISH_LOOKAHEAD_FRAMES;
pub use model_mixer::*;
pub use position::*;
pub use ranges::*;
pub use source::{PlaybackContext, PlaybackOutput, PlaybackSource, MAX_METERED_CHANNELS};
pub use synth::*;
