//! Gain effect - Simple volume control

use crate::effect::{Effect, EffectBase, EffectInfo, ParamInfo, ParamValue};
use crate::types::ChannelBuffers;

/// Volume multiplier over every channel
///
/// Parameters:
/// - Gain: 0.0 = silence, 0.5 = unity, 1.0 = ×2 (+6 dB)
pub struct GainEffect {
    base: EffectBase,
}

impl GainEffect {
    /// Gain for a stream of `channels` channels
    pub fn new(channels: usize) -> Self {
        let info = EffectInfo::new("Gain", "Utility", channels).with_param(
            ParamInfo::new("Gain", 0.5)
                .with_range(0.0, 2.0)
                .with_unit("×"),
        );

        Self {
            base: EffectBase::new(info),
        }
    }

    fn gain(&self) -> f32 {
        self.base.param_actual(0)
    }
}

impl Effect for GainEffect {
    fn process(&mut self, buffer: &mut ChannelBuffers, frames: usize) {
        if self.base.is_bypassed() {
            return;
        }
        let gain = self.gain();
        for channel in buffer.channels_mut() {
            let end = frames.min(channel.len());
            for sample in &mut channel[..end] {
                *sample *= gain;
            }
        }
    }

    fn latency_samples(&self) -> u32 {
        0
    }

    fn info(&self) -> &EffectInfo {
        self.base.info()
    }

    fn get_params(&self) -> &[ParamValue] {
        self.base.get_params()
    }

    fn set_param(&mut self, index: usize, value: f32) {
        self.base.set_param(index, value);
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.base.set_bypass(bypass);
    }

    fn is_bypassed(&self) -> bool {
        self.base.is_bypassed()
    }

    fn reset(&mut self) {}
}
