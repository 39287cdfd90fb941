//! Playback notifications and fill-task wake reasons

use crate::types::ModelId;

/// Notifications emitted by a playback source
///
/// Delivered over a bounded channel; if nobody drains it, new events are
/// dropped rather than blocking the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Playback started (`true`) or stopped (`false`)
    PlayStatusChanged(bool),
    /// The engine now renders more channels than before; reopen the device
    ChannelCountIncreased(usize),
    /// A model (or the device) runs at a rate other than the source rate
    SampleRateMismatch {
        model: Option<ModelId>,
        requested: u32,
        available: u32,
    },
    /// An effect in the chain was disabled for the rest of its lifetime
    EffectFailed { name: String },
}

/// Why the fill task was woken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The consumer drained samples from the read generation
    BufferConsumed,
    /// Play state, models, selection or configuration changed
    StateChanged,
    /// The source is being dropped
    Exiting,
}

/// Capacity of the event channel
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Capacity of the wake channel; extra wakes are coalesced by dropping them
pub const WAKE_QUEUE_CAPACITY: usize = 16;
