//! Per-model play parameters
//!
//! Mute, gain, pan and the sample clip used to render note models. The mixer
//! reads these once per fill cycle, so writers on the control thread only need
//! atomics (and a lock for the clip name, which is read off the real-time path).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use crate::types::ModelId;

/// Clip used for note models that have no explicit choice
pub const DEFAULT_CLIP_ID: &str = "beep";

/// Read access to one model's play parameters
pub trait PlayParams: Send + Sync {
    fn is_muted(&self) -> bool;

    /// Linear gain (1.0 = unity)
    fn gain(&self) -> f32;

    /// Stereo pan in [-1.0, 1.0], 0.0 centred
    fn pan(&self) -> f32;

    /// Sample clip identifier (note models only)
    fn clip_id(&self) -> String {
        DEFAULT_CLIP_ID.to_string()
    }
}

/// Lookup of play parameters by model
pub trait PlayParameterStore: Send + Sync {
    /// Parameters for `id`; `None` means defaults (unmuted, unity gain, centred)
    fn parameters(&self, id: ModelId) -> Option<Arc<dyn PlayParams>>;
}

/// Lock-free parameter set
#[derive(Debug)]
pub struct PlayParameters {
    muted: AtomicBool,
    gain: AtomicU32,
    pan: AtomicU32,
    clip_id: RwLock<String>,
}

impl PlayParameters {
    pub fn new() -> Self {
        Self {
            muted: AtomicBool::new(false),
            gain: AtomicU32::new(1.0f32.to_bits()),
            pan: AtomicU32::new(0.0f32.to_bits()),
            clip_id: RwLock::new(DEFAULT_CLIP_ID.to_string()),
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Set the linear gain (negative values clamp to 0)
    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0).to_bits(), Ordering::Relaxed);
    }

    /// Set the pan, clamped to [-1.0, 1.0]
    pub fn set_pan(&self, pan: f32) {
        self.pan
            .store(pan.clamp(-1.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn set_clip_id(&self, clip_id: impl Into<String>) {
        if let Ok(mut id) = self.clip_id.write() {
            *id = clip_id.into();
        }
    }
}

impl Default for PlayParameters {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayParams for PlayParameters {
    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    fn pan(&self) -> f32 {
        f32::from_bits(self.pan.load(Ordering::Relaxed))
    }

    fn clip_id(&self) -> String {
        self.clip_id
            .read()
            .map(|id| id.clone())
            .unwrap_or_else(|_| DEFAULT_CLIP_ID.to_string())
    }
}

/// In-memory parameter store, creating parameter sets on first access
#[derive(Default)]
pub struct ParameterRegistry {
    params: RwLock<HashMap<ModelId, Arc<PlayParameters>>>,
}

impl ParameterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters for `id`, created with defaults if missing
    pub fn get_or_create(&self, id: ModelId) -> Arc<PlayParameters> {
        if let Some(existing) = self.params.read().ok().and_then(|p| p.get(&id).cloned()) {
            return existing;
        }
        let mut params = match self.params.write() {
            Ok(params) => params,
            Err(poisoned) => poisoned.into_inner(),
        };
        params.entry(id).or_default().clone()
    }
}

impl PlayParameterStore for ParameterRegistry {
    fn parameters(&self, id: ModelId) -> Option<Arc<dyn PlayParams>> {
        self.params
            .read()
            .ok()
            .and_then(|p| p.get(&id).cloned())
            .map(|p| p as Arc<dyn PlayParams>)
    }
}

/// Snapshot of the parameters the mixer applies for one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixParams {
    pub muted: bool,
    pub gain: f32,
    pub pan: f32,
}

impl MixParams {
    pub fn from_params(params: Option<&dyn PlayParams>) -> Self {
        match params {
            Some(p) => Self {
                muted: p.is_muted(),
                gain: p.gain(),
                pan: p.pan().clamp(-1.0, 1.0),
            },
            None => Self::default(),
        }
    }

    /// Per-channel multiplier for channel `channel`, combining gain and pan
    ///
    /// Pan only touches the first two channels: a positive pan attenuates the
    /// left, a negative pan attenuates the right.
    #[inline]
    pub fn channel_gain(&self, channel: usize) -> f32 {
        match channel {
            0 if self.pan > 0.0 => self.gain * (1.0 - self.pan),
            1 if self.pan < 0.0 => self.gain * (self.pan + 1.0),
            _ => self.gain,
        }
    }
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            muted: false,
            gain: 1.0,
            pan: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pan_law() {
        let params = MixParams {
            muted: false,
            gain: 0.5,
            pan: 0.5,
        };
        assert!((params.channel_gain(0) - 0.25).abs() < 1e-6);
        assert!((params.channel_gain(1) - 0.5).abs() < 1e-6);

        let params = MixParams { pan: -1.0, ..params };
        assert_eq!(params.channel_gain(0), 0.5);
        assert_eq!(params.channel_gain(1), 0.0);
        // Channels past the stereo pair are never panned
        assert_eq!(params.channel_gain(2), 0.5);
    }

    #[test]
    fn test_parameters_clamp() {
        let params = PlayParameters::new();
        params.set_pan(3.0);
        params.set_gain(-1.0);
        assert_eq!(params.pan(), 1.0);
        assert_eq!(params.gain(), 0.0);
    }

    #[test]
    fn test_registry_defaults() {
        let registry = ParameterRegistry::new();
        assert!(registry.parameters(ModelId(1)).is_none());

        let params = registry.get_or_create(ModelId(1));
        params.set_muted(true);
        params.set_clip_id("pluck");

        let stored = registry.parameters(ModelId(1)).unwrap();
        assert!(stored.is_muted());
        assert_eq!(stored.clip_id(), "pluck");
        assert_eq!(MixParams::from_params(None), MixParams::default());
    }
}
