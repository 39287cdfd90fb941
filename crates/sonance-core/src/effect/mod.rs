//! Effect system - trait, parameter metadata and native effects
//!
//! Effects process de-interleaved multichannel buffers in place. Each effect
//! declares the channel count it was built for; the chain's effect wrapper
//! refuses (and permanently bypasses) an effect whose channel count does not
//! match the stream. All parameters are normalized (0.0-1.0).

pub mod native;

use crate::types::ChannelBuffers;

/// Information about an effect parameter
#[derive(Debug, Clone)]
pub struct ParamInfo {
    /// Parameter name for display
    pub name: String,
    /// Default value (0.0-1.0)
    pub default: f32,
    /// Minimum value (typically 0.0)
    pub min: f32,
    /// Maximum value (typically 1.0)
    pub max: f32,
    /// Unit label (e.g., "ms", "dB", "%")
    pub unit: String,
}

impl Default for ParamInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            default: 0.5,
            min: 0.0,
            max: 1.0,
            unit: String::new(),
        }
    }
}

impl ParamInfo {
    pub fn new(name: impl Into<String>, default: f32) -> Self {
        Self {
            name: name.into(),
            default,
            ..Default::default()
        }
    }

    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

/// Current parameter value
#[derive(Debug, Clone, Copy)]
pub struct ParamValue {
    /// Normalized value (0.0-1.0)
    pub normalized: f32,
    /// Actual value after range mapping
    pub actual: f32,
}

impl Default for ParamValue {
    fn default() -> Self {
        Self {
            normalized: 0.5,
            actual: 0.5,
        }
    }
}

impl ParamValue {
    /// Create from normalized value with the given param info
    pub fn from_normalized(normalized: f32, info: &ParamInfo) -> Self {
        let normalized = normalized.clamp(0.0, 1.0);
        let actual = info.min + normalized * (info.max - info.min);
        Self { normalized, actual }
    }
}

/// Information about an effect
#[derive(Debug, Clone)]
pub struct EffectInfo {
    /// Effect name for display and logs
    pub name: String,
    /// Effect category (e.g., "Utility", "Delay")
    pub category: String,
    /// Channels the effect consumes and produces
    pub channels: usize,
    pub params: Vec<ParamInfo>,
    /// Processing latency in samples
    pub latency_samples: u32,
}

impl EffectInfo {
    pub fn new(name: impl Into<String>, category: impl Into<String>, channels: usize) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            channels,
            params: Vec::new(),
            latency_samples: 0,
        }
    }

    pub fn with_param(mut self, param: ParamInfo) -> Self {
        self.params.push(param);
        self
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// The core effect trait - implemented by all audio effects
///
/// `process` runs on the audio thread: it must not allocate, lock or block.
pub trait Effect: Send {
    /// Process the first `frames` frames of `buffer` in place
    ///
    /// `buffer` has exactly [`EffectInfo::channels`] channels.
    fn process(&mut self, buffer: &mut ChannelBuffers, frames: usize);

    /// Latency of this effect in samples
    fn latency_samples(&self) -> u32;

    /// Name, category, channel count and parameters
    fn info(&self) -> &EffectInfo;

    fn get_params(&self) -> &[ParamValue];

    /// Set a parameter by index (normalized value 0.0-1.0)
    fn set_param(&mut self, index: usize, value: f32);

    fn set_bypass(&mut self, bypass: bool);

    fn is_bypassed(&self) -> bool;

    /// Clear internal state (delay lines, filters)
    fn reset(&mut self);

    /// Stream sample rate changed (called off the audio thread)
    fn set_sample_rate(&mut self, _sample_rate: u32) {}
}

/// Base implementation helper for effects
///
/// Provides bypass state and parameter storage.
#[derive(Debug, Clone)]
pub struct EffectBase {
    info: EffectInfo,
    params: Vec<ParamValue>,
    bypassed: bool,
}

impl EffectBase {
    pub fn new(info: EffectInfo) -> Self {
        let params: Vec<ParamValue> = info
            .params
            .iter()
            .map(|p| ParamValue::from_normalized(p.default, p))
            .collect();
        Self {
            info,
            params,
            bypassed: false,
        }
    }

    pub fn info(&self) -> &EffectInfo {
        &self.info
    }

    pub fn get_params(&self) -> &[ParamValue] {
        &self.params
    }

    pub fn set_param(&mut self, index: usize, value: f32) {
        if index < self.params.len() {
            self.params[index] = ParamValue::from_normalized(value, &self.info.params[index]);
        }
    }

    /// A parameter's actual (denormalized) value
    pub fn param_actual(&self, index: usize) -> f32 {
        self.params.get(index).map(|p| p.actual).unwrap_or(0.0)
    }

    pub fn param_normalized(&self, index: usize) -> f32 {
        self.params.get(index).map(|p| p.normalized).unwrap_or(0.0)
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.bypassed = bypass;
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_info() {
        let param = ParamInfo::new("Time", 0.25)
            .with_range(10.0, 2000.0)
            .with_unit("ms");

        assert_eq!(param.name, "Time");
        assert_eq!(param.default, 0.25);
        assert_eq!(param.min, 10.0);
        assert_eq!(param.max, 2000.0);
        assert_eq!(param.unit, "ms");
    }

    #[test]
    fn test_param_value_mapping() {
        let info = ParamInfo::new("Test", 0.5).with_range(0.0, 100.0);

        assert_eq!(ParamValue::from_normalized(0.5, &info).actual, 50.0);
        assert_eq!(ParamValue::from_normalized(1.0, &info).actual, 100.0);
        // Out-of-range input is clamped
        assert_eq!(ParamValue::from_normalized(-1.0, &info).normalized, 0.0);
    }

    #[test]
    fn test_effect_info_channels() {
        let info = EffectInfo::new("Test Effect", "Utility", 4)
            .with_param(ParamInfo::new("A", 0.5))
            .with_param(ParamInfo::new("B", 0.0));

        assert_eq!(info.channels, 4);
        assert_eq!(info.param_count(), 2);
        assert_eq!(info.latency_samples, 0);
    }

    #[test]
    fn test_effect_base() {
        let info = EffectInfo::new("Test", "Test", 2)
            .with_param(ParamInfo::new("P1", 0.5).with_range(0.0, 100.0))
            .with_param(ParamInfo::new("P2", 0.0).with_range(-1.0, 1.0));

        let mut base = EffectBase::new(info);
        assert_eq!(base.param_actual(0), 50.0);
        assert_eq!(base.param_actual(1), -1.0);

        base.set_param(1, 0.5);
        assert_eq!(base.param_actual(1), 0.0);
        // Unknown index is ignored
        base.set_param(7, 1.0);
        assert_eq!(base.param_actual(7), 0.0);

        assert!(!base.is_bypassed());
        base.set_bypass(true);
        assert!(base.is_bypassed());
    }
}
