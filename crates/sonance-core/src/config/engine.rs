//! Engine options

use serde::{Deserialize, Serialize};

use crate::chain::ChainOrder;
use crate::engine::START_GUARD_TOLERANCE;
use crate::timestretch::StretchQuality;
use crate::types::DEFAULT_RING_BUFFER_SIZE;

/// Options for a [`PlaybackSource`](crate::engine::PlaybackSource) and its chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ring capacity per channel in frames
    ///
    /// The effective size is never below four device blocks.
    /// Default: 131071
    pub ring_buffer_size: usize,

    /// Time-stretcher preset
    /// Default: finer
    pub stretch_quality: StretchQuality,

    /// Order of the stretch and effect stages
    /// Default: stretch_outermost
    pub chain_order: ChainOrder,

    /// Start-guard tolerance in milliseconds, see
    /// [`PositionEstimator`](crate::engine::PositionEstimator)
    /// Default: 100
    pub start_guard_tolerance_ms: u64,

    /// Stretch ratio applied when the chain is built (1.0 = real time)
    pub default_stretch_ratio: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: DEFAULT_RING_BUFFER_SIZE,
            stretch_quality: StretchQuality::default(),
            chain_order: ChainOrder::default(),
            start_guard_tolerance_ms: START_GUARD_TOLERANCE.as_millis() as u64,
            default_stretch_ratio: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config: EngineConfig = serde_yaml::from_str("stretch_quality: faster\n").unwrap();
        assert_eq!(config.stretch_quality, StretchQuality::Faster);
        assert_eq!(config.ring_buffer_size, DEFAULT_RING_BUFFER_SIZE);
        assert_eq!(config.start_guard_tolerance_ms, 100);
        assert_eq!(config.default_stretch_ratio, 1.0);
    }
}
