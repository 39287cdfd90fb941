//! Sample clips for note models
//!
//! A clip is a short mono sample recorded (or synthesised) at a known pitch.
//! Note models are rendered by resampling the clip to each note's pitch. No
//! file decoding happens here: [`BuiltinClips`] synthesises its clips.

use std::f32::consts::TAU;
use std::sync::Arc;

use crate::types::Sample;

/// A mono sample clip
#[derive(Debug, Clone)]
pub struct Clip {
    pub name: String,
    /// Native sample rate of `samples`
    pub sample_rate: u32,
    /// Pitch of the recorded material (Hz)
    pub reference_frequency: f32,
    pub samples: Vec<Sample>,
}

impl Clip {
    /// Duration in frames at the native rate
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Source of clips by identifier
pub trait ClipLibrary: Send + Sync {
    /// Look up a clip; `None` if the identifier is unknown
    fn clip(&self, id: &str) -> Option<Arc<Clip>>;
}

/// Synthesised clip set: `beep`, `click` and `pluck`
#[derive(Debug)]
pub struct BuiltinClips {
    beep: Arc<Clip>,
    click: Arc<Clip>,
    pluck: Arc<Clip>,
}

/// Native rate of the built-in clips
pub const BUILTIN_CLIP_RATE: u32 = 44100;

/// Pitch all built-in clips are synthesised at (A4)
pub const BUILTIN_REFERENCE_FREQUENCY: f32 = 440.0;

impl BuiltinClips {
    pub fn new() -> Self {
        Self {
            beep: Arc::new(synth_clip("beep", 0.25, beep_sample)),
            click: Arc::new(synth_clip("click", 0.02, click_sample)),
            pluck: Arc::new(synth_clip("pluck", 0.8, pluck_sample)),
        }
    }

    /// Identifiers of every available clip
    pub fn ids() -> &'static [&'static str] {
        &["beep", "click", "pluck"]
    }
}

impl Default for BuiltinClips {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipLibrary for BuiltinClips {
    fn clip(&self, id: &str) -> Option<Arc<Clip>> {
        match id {
            "beep" => Some(self.beep.clone()),
            "click" => Some(self.click.clone()),
            "pluck" => Some(self.pluck.clone()),
            _ => None,
        }
    }
}

fn synth_clip(name: &str, seconds: f32, sample: fn(f32, f32) -> Sample) -> Clip {
    let rate = BUILTIN_CLIP_RATE as f32;
    let frames = (seconds * rate) as usize;
    let samples = (0..frames)
        .map(|i| {
            let t = i as f32 / rate;
            sample(t, seconds)
        })
        .collect();
    Clip {
        name: name.to_string(),
        sample_rate: BUILTIN_CLIP_RATE,
        reference_frequency: BUILTIN_REFERENCE_FREQUENCY,
        samples,
    }
}

/// Sine with short attack and linear decay
fn beep_sample(t: f32, length: f32) -> Sample {
    let attack = (t / 0.005).min(1.0);
    let decay = 1.0 - t / length;
    0.5 * attack * decay * (TAU * BUILTIN_REFERENCE_FREQUENCY * t).sin()
}

/// Exponentially decaying burst of a few harmonics
fn click_sample(t: f32, _length: f32) -> Sample {
    let envelope = (-t * 400.0).exp();
    let phase = TAU * BUILTIN_REFERENCE_FREQUENCY * t;
    0.5 * envelope * (phase.sin() + 0.5 * (3.0 * phase).sin() + 0.25 * (7.0 * phase).sin())
}

/// Plucked-string approximation: harmonics decaying faster the higher they are
fn pluck_sample(t: f32, _length: f32) -> Sample {
    let phase = TAU * BUILTIN_REFERENCE_FREQUENCY * t;
    (1..=6)
        .map(|h| {
            let h = h as f32;
            (-t * 3.0 * h).exp() * (h * phase).sin() / h
        })
        .sum::<f32>()
        * 0.4
}
