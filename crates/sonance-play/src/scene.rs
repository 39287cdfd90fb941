//! Built-in demo scene
//!
//! Four seconds at 48 kHz: a stereo pad, a plucked arpeggio on top and a
//! slow gliding bass line from a frequency curve.

use std::f32::consts::TAU;
use std::sync::Arc;

use sonance_core::model::{MemoryCurveModel, MemoryDenseModel, MemoryNoteModel, ModelRegistry, Note};
use sonance_core::params::ParameterRegistry;
use sonance_core::ModelId;

pub const SAMPLE_RATE: u32 = 48000;
pub const LENGTH_SECONDS: f32 = 4.0;

/// Models registered for the demo
pub struct Scene {
    pub models: Arc<ModelRegistry>,
    pub params: Arc<ParameterRegistry>,
    pub ids: Vec<ModelId>,
}

fn pad() -> MemoryDenseModel {
    let frames = (SAMPLE_RATE as f32 * LENGTH_SECONDS) as usize;
    let fade = SAMPLE_RATE as usize / 10;
    let voice = |frequency: f32| -> Vec<f32> {
        (0..frames)
            .map(|i| {
                let envelope = (i.min(frames - i) as f32 / fade as f32).min(1.0);
                let t = i as f32 / SAMPLE_RATE as f32;
                0.15 * envelope * (TAU * frequency * t).sin()
            })
            .collect()
    };
    MemoryDenseModel::new(SAMPLE_RATE, vec![voice(220.0), voice(329.63)])
}

fn arpeggio() -> MemoryNoteModel {
    let step = SAMPLE_RATE as u64 / 4;
    let pitches = [440.0, 554.37, 659.25, 880.0];
    let notes = (0..16)
        .map(|i| Note::new(i * step, step / 2, pitches[i as usize % pitches.len()], 96))
        .collect();
    MemoryNoteModel::new(SAMPLE_RATE, notes)
}

fn bass() -> MemoryCurveModel {
    // One value per half second
    MemoryCurveModel::from_values(
        SAMPLE_RATE,
        SAMPLE_RATE as u64 / 2,
        &[110.0, 110.0, 98.0, 98.0, 87.31, 87.31, 98.0, 0.0],
    )
}

pub fn build() -> Scene {
    let models = Arc::new(ModelRegistry::new());
    let params = Arc::new(ParameterRegistry::new());

    let (pad_id, _) = models.insert_dense(pad());
    let (arp_id, _) = models.insert_notes(arpeggio());
    let (bass_id, _) = models.insert_curve(bass());

    let arp = params.get_or_create(arp_id);
    arp.set_clip_id("pluck");
    arp.set_pan(0.3);
    params.get_or_create(bass_id).set_gain(0.6);

    Scene {
        models,
        params,
        ids: vec![pad_id, arp_id, bass_id],
    }
}
