//! Effect stage
//!
//! Runs one [`Effect`] over the stream pulled from upstream. The stage passes
//! audio through untouched when no effect is installed, when the effect is
//! bypassed, or when the effect has failed. An effect whose channel count
//! does not match the stream fails permanently: it is reported once and then
//! left alone until a different effect is installed.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use basedrop::Owned;
use crossbeam::channel::Sender;
use rtrb::{Consumer, Producer, RingBuffer};

use super::SampleSource;
use crate::effect::Effect;
use crate::engine::gc::gc_handle;
use crate::engine::PlaybackEvent;
use crate::types::{ChannelBuffers, Sample};

const COMMAND_QUEUE_CAPACITY: usize = 32;

enum EffectCommand {
    Set(Option<Owned<Box<dyn Effect>>>),
    Param { index: usize, value: f32 },
    Reset,
}

struct EffectShared {
    bypass: AtomicBool,
    failed: AtomicBool,
    sample_rate: AtomicU32,
    latency: AtomicU32,
    commands: Mutex<Producer<EffectCommand>>,
}

impl EffectShared {
    fn push(&self, command: EffectCommand) -> bool {
        let mut producer = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        if producer.push(command).is_err() {
            log::warn!("[EFFECT] Command queue full, command dropped");
            return false;
        }
        true
    }
}

/// Thread-safe control for an [`EffectWrapper`]
#[derive(Clone)]
pub struct EffectControl {
    shared: Arc<EffectShared>,
}

impl EffectControl {
    /// Install `effect`, replacing (and reclaiming off-thread) the current one
    pub fn set_effect(&self, mut effect: Box<dyn Effect>) {
        let sample_rate = self.shared.sample_rate.load(Ordering::Acquire);
        if sample_rate > 0 {
            effect.set_sample_rate(sample_rate);
        }
        log::info!(
            "[EFFECT] Installing {} ({} ch, {} samples latency)",
            effect.info().name,
            effect.info().channels,
            effect.latency_samples()
        );
        self.shared
            .push(EffectCommand::Set(Some(Owned::new(&gc_handle(), effect))));
    }

    /// Remove the current effect
    pub fn clear_effect(&self) {
        self.shared.push(EffectCommand::Set(None));
    }

    pub fn set_param(&self, index: usize, value: f32) {
        self.shared.push(EffectCommand::Param { index, value });
    }

    pub fn reset(&self) {
        self.shared.push(EffectCommand::Reset);
    }

    /// Pass audio through without removing the effect
    pub fn set_bypass(&self, bypass: bool) {
        self.shared.bypass.store(bypass, Ordering::Release);
    }

    pub fn is_bypassed(&self) -> bool {
        self.shared.bypass.load(Ordering::Acquire)
    }

    /// Whether the installed effect has been disabled
    pub fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Latency of the installed effect (0 when none)
    pub fn latency_samples(&self) -> u32 {
        self.shared.latency.load(Ordering::Acquire)
    }
}

/// Effect decorator over an upstream [`SampleSource`]
pub struct EffectWrapper {
    upstream: Box<dyn SampleSource>,
    shared: Arc<EffectShared>,
    commands: Consumer<EffectCommand>,
    effect: Option<Owned<Box<dyn Effect>>>,
    events: Option<Sender<PlaybackEvent>>,
    sample_rate: u32,
    latency_below: usize,
    failed: bool,
}

impl EffectWrapper {
    pub fn new(
        upstream: Box<dyn SampleSource>,
        events: Option<Sender<PlaybackEvent>>,
    ) -> (Self, EffectControl) {
        let (producer, consumer) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
        let shared = Arc::new(EffectShared {
            bypass: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            sample_rate: AtomicU32::new(0),
            latency: AtomicU32::new(0),
            commands: Mutex::new(producer),
        });
        let stage = Self {
            upstream,
            shared: shared.clone(),
            commands: consumer,
            effect: None,
            events,
            sample_rate: 0,
            latency_below: 0,
            failed: false,
        };
        (stage, EffectControl { shared })
    }

    fn effect_latency(&self) -> usize {
        self.effect
            .as_ref()
            .map(|e| e.latency_samples() as usize)
            .unwrap_or(0)
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                EffectCommand::Set(effect) => {
                    // The replaced effect is handed to the collector on drop
                    self.effect = effect;
                    self.failed = false;
                    self.shared.failed.store(false, Ordering::Release);
                    let latency = self.effect_latency();
                    self.shared.latency.store(latency as u32, Ordering::Release);
                    self.upstream.set_latency(self.latency_below + latency);
                }
                EffectCommand::Param { index, value } => {
                    if let Some(effect) = self.effect.as_mut() {
                        effect.set_param(index, value);
                    }
                }
                EffectCommand::Reset => {
                    if let Some(effect) = self.effect.as_mut() {
                        effect.reset();
                    }
                }
            }
        }
    }

    fn fail(&mut self, name: &str, effect_channels: usize, stream_channels: usize) {
        self.failed = true;
        self.shared.failed.store(true, Ordering::Release);
        log::error!(
            "[EFFECT] {} expects {} channels, stream has {}; disabled",
            name,
            effect_channels,
            stream_channels
        );
        if let Some(events) = &self.events {
            let _ = events.try_send(PlaybackEvent::EffectFailed {
                name: name.to_string(),
            });
        }
    }
}

impl SampleSource for EffectWrapper {
    fn pull_samples(&mut self, buffers: &mut ChannelBuffers, frame_count: usize) -> usize {
        let frames = self.upstream.pull_samples(buffers, frame_count);
        self.drain_commands();

        if self.failed || self.shared.bypass.load(Ordering::Acquire) {
            return frames;
        }
        let Some(effect) = self.effect.as_mut() else {
            return frames;
        };

        let effect_channels = effect.info().channels;
        let stream_channels = buffers.channel_count();
        if effect_channels != stream_channels {
            let name = effect.info().name.clone();
            self.fail(&name, effect_channels, stream_channels);
            return frames;
        }

        effect.process(buffers, frame_count);
        frames
    }

    fn set_channel_count(&mut self, channels: usize) {
        self.upstream.set_channel_count(channels);
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.upstream.set_sample_rate(sample_rate);
        self.shared.sample_rate.store(sample_rate, Ordering::Release);
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            if let Some(effect) = self.effect.as_mut() {
                effect.set_sample_rate(sample_rate);
            }
        }
    }

    fn set_block_size(&mut self, frames: usize) {
        self.upstream.set_block_size(frames);
    }

    fn set_latency(&mut self, frames: usize) {
        self.latency_below = frames;
        let latency = frames + self.effect_latency();
        self.upstream.set_latency(latency);
    }

    fn set_output_levels(&mut self, peaks: &[Sample]) {
        self.upstream.set_output_levels(peaks);
    }

    fn set_stretch_ratio_hint(&mut self, ratio: f64) {
        self.upstream.set_stretch_ratio_hint(ratio);
    }

    fn name(&self) -> &'static str {
        "effect"
    }

    fn upstream(&self) -> Option<&dyn SampleSource> {
        Some(self.upstream.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::ProbeSource;
    use crate::effect::native::GainEffect;
    use crate::effect::{EffectBase, EffectInfo, ParamValue};
    use crossbeam::channel;

    /// Zero-gain effect reporting a fixed latency
    struct Latent {
        base: EffectBase,
    }

    impl Effect for Latent {
        fn process(&mut self, buffer: &mut ChannelBuffers, _frames: usize) {
            buffer.fill_silence();
        }
        fn latency_samples(&self) -> u32 {
            64
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

    fn stage() -> (EffectWrapper, EffectControl) {
        let (probe, _) = ProbeSource::new();
        EffectWrapper::new(Box::new(probe), None)
    }

    #[test]
    fn test_no_effect_passes_through() {
        let (mut stage, _) = stage();
        let mut buffers = ChannelBuffers::silence(2, 8);
        assert_eq!(stage.pull_samples(&mut buffers, 8), 8);
        assert_eq!(buffers[1][7], 7.0);
    }

    #[test]
    fn test_effect_processes_and_bypass_skips() {
        let (mut stage, control) = stage();
        let mut gain = GainEffect::new(2);
        gain.set_param(0, 0.25);
        control.set_effect(Box::new(gain));

        let mut buffers = ChannelBuffers::silence(2, 4);
        stage.pull_samples(&mut buffers, 4);
        assert_eq!(buffers[0][2], 1.0);

        control.set_bypass(true);
        stage.pull_samples(&mut buffers, 4);
        assert_eq!(buffers[0][2], 6.0);
    }

    #[test]
    fn test_channel_mismatch_fails_permanently() {
        let (probe, _) = ProbeSource::new();
        let (events_tx, events_rx) = channel::bounded(4);
        let (mut stage, control) = EffectWrapper::new(Box::new(probe), Some(events_tx));
        control.set_effect(Box::new(GainEffect::new(1)));

        let mut buffers = ChannelBuffers::silence(2, 4);
        stage.pull_samples(&mut buffers, 4);
        stage.pull_samples(&mut buffers, 4);

        assert!(control.has_failed());
        assert_eq!(buffers[0][3], 7.0);
        // Reported once
        assert_eq!(
            events_rx.try_iter().collect::<Vec<_>>(),
            vec![PlaybackEvent::EffectFailed { name: "Gain".into() }]
        );

        control.set_effect(Box::new(GainEffect::new(2)));
        stage.pull_samples(&mut buffers, 4);
        assert!(!control.has_failed());
    }

    #[test]
    fn test_latency_includes_effect() {
        let (probe, state) = ProbeSource::new();
        let (mut stage, control) = EffectWrapper::new(Box::new(probe), None);
        stage.set_latency(100);
        assert_eq!(state.latency.load(Ordering::Relaxed), 100);

        control.set_effect(Box::new(Latent {
            base: EffectBase::new(EffectInfo::new("Latent", "Test", 2)),
        }));
        let mut buffers = ChannelBuffers::silence(2, 4);
        stage.pull_samples(&mut buffers, 4);

        assert_eq!(state.latency.load(Ordering::Relaxed), 164);
        assert_eq!(control.latency_samples(), 64);
        assert!(buffers[0].iter().all(|s| *s == 0.0));
    }
}
