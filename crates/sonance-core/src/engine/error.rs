//! Error types for playback control operations
//!
//! The real-time path never fails; these only surface from control calls
//! where the caller may want to react.

use thiserror::Error;

use crate::types::ModelId;

/// Control-path errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Model not found: {0}")]
    UnknownModel(ModelId),

    #[error("Model {id} ({kind}) cannot be played")]
    UnplayableModel { id: ModelId, kind: &'static str },

    #[error("Clip not available for {id}: {clip}")]
    ClipNotFound { id: ModelId, clip: String },

    #[error("No source sample rate: no playable models registered")]
    NoSampleRate,

    #[error("Invalid stretch ratio: {0}")]
    InvalidRatio(f64),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for engine control operations
pub type EngineResult<T> = Result<T, EngineError>;
