//! Sonance Core - Real-time playback engine for multi-channel musical models

pub mod audio;
pub mod buffer;
pub mod chain;
pub mod clips;
pub mod config;
pub mod effect;
pub mod engine;
pub mod model;
pub mod params;
pub mod selection;
pub mod timestretch;
pub mod types;

pub use types::*;
