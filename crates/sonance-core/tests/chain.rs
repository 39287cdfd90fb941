//! The processing chain on top of a real playback source

mod common;

use std::sync::Arc;

use common::*;
use sonance_core::chain::{
    build_chain, stage_names, ChainOrder, ProcessingChain, SampleSource, StretchConfig,
};
use sonance_core::config::EngineConfig;
use sonance_core::effect::native::GainEffect;
use sonance_core::effect::Effect;
use sonance_core::engine::{PlaybackContext, PlaybackEvent, PlaybackSource};
use sonance_core::model::{MemoryDenseModel, ModelRegistry};
use sonance_core::selection::SelectionState;

fn chained(order: ChainOrder, ratio: f64) -> (PlaybackSource, ProcessingChain) {
    let models = Arc::new(ModelRegistry::new());
    let (id, _) = models.insert_dense(MemoryDenseModel::mono(RATE, ramp(RATE as usize)));
    let context = PlaybackContext::new(models, Arc::new(SelectionState::new()));
    let (source, output) = PlaybackSource::new(context, &EngineConfig::default()).unwrap();
    source.add_model(id).unwrap();

    let mut chain = build_chain(
        Box::new(output),
        order,
        StretchConfig {
            ratio,
            ..StretchConfig::default()
        },
        Some(source.event_sender()),
    );
    configure_device(chain.source.as_mut());
    (source, chain)
}

#[test]
fn test_identity_stretch_passes_source_through() {
    let (source, mut chain) = chained(ChainOrder::StretchOutermost, 1.0);
    assert_eq!(
        stage_names(chain.source.as_ref()),
        vec!["stretch", "effect", "playback"]
    );
    source.play(500).unwrap();

    let mut buffers = block_buffers(2);
    pull_first_content(chain.source.as_mut(), &mut buffers, BLOCK);

    assert_eq!(buffers[0][0], ramp_value(500));
    assert_eq!(buffers[1][BLOCK - 1], ramp_value(500 + BLOCK as u64 - 1));
}

#[test]
fn test_effect_applies_in_either_order() {
    for order in [ChainOrder::StretchOutermost, ChainOrder::EffectOutermost] {
        let (source, mut chain) = chained(order, 1.0);
        let mut gain = GainEffect::new(2);
        // 0.25 × 2.0 = ×0.5
        gain.set_param(0, 0.25);
        chain.effect.set_effect(Box::new(gain));
        source.play(2048).unwrap();

        let mut buffers = block_buffers(2);
        pull_first_content(chain.source.as_mut(), &mut buffers, BLOCK);

        assert_eq!(buffers[0][0], ramp_value(2048) * 0.5, "{:?}", order);
    }
}

#[test]
fn test_mismatched_effect_is_reported_on_source_events() {
    let (source, mut chain) = chained(ChainOrder::EffectOutermost, 1.0);
    let events = source.events();
    chain.effect.set_effect(Box::new(GainEffect::new(6)));
    source.play(0).unwrap();

    let mut buffers = block_buffers(2);
    pull_first_content(chain.source.as_mut(), &mut buffers, BLOCK);

    assert!(chain.effect.has_failed());
    assert!(events
        .try_iter()
        .any(|e| e == PlaybackEvent::EffectFailed { name: "Gain".into() }));
}

#[test]
fn test_slowed_playback_pulls_less_source() {
    let (source, mut chain) = chained(ChainOrder::StretchOutermost, 2.0);
    assert!(chain.stretch.is_active());
    source.play(0).unwrap();

    let mut buffers = block_buffers(2);
    for _ in 0..20 {
        buffers.set_len_from_capacity(BLOCK);
        chain.source.pull_samples(&mut buffers, BLOCK);
        std::thread::sleep(std::time::Duration::from_millis(2));
    }

    // The stage reports its ratio to the source's position estimate
    let position = source.current_playing_frame();
    assert!(position < 20 * BLOCK as u64);
}
