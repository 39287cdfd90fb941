//! Processing chain between the audio device and the playback source
//!
//! The device callback pulls from the outermost [`SampleSource`]; wrappers
//! pull from the source they decorate and forward every setter upstream:
//!
//! ```text
//! StretchOutermost:  device ─► TimeStretchWrapper ─► EffectWrapper ─► PlaybackOutput
//! EffectOutermost:   device ─► EffectWrapper ─► TimeStretchWrapper ─► PlaybackOutput
//! ```
//!
//! With the stretcher outermost the effect runs at source speed (a delay is
//! stretched along with the material); with the effect outermost it runs at
//! device speed.

pub mod effect;
pub mod stretch;

pub use effect::{EffectControl, EffectWrapper};
pub use stretch::{StretchConfig, TimeStretchControl, TimeStretchWrapper, MAX_STRETCH_RATIO, MIN_STRETCH_RATIO};

use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};

use crate::engine::PlaybackEvent;
use crate::types::{ChannelBuffers, Sample};

/// A pull-model producer of de-interleaved samples
///
/// `pull_samples` runs on the audio thread. The setters describe the device
/// side of the stream and are called while the stream is set up (channel
/// count, sample rate, block size) or from the callback itself (latency,
/// levels, ratio hint, which must stay cheap).
pub trait SampleSource: Send {
    /// Fill the first `frame_count` frames of every channel of `buffers`
    ///
    /// The requested channel count is `buffers.channel_count()`. Returns the
    /// number of frames holding real content; the rest is silence.
    fn pull_samples(&mut self, buffers: &mut ChannelBuffers, frame_count: usize) -> usize;

    /// Device channel count
    fn set_channel_count(&mut self, channels: usize);

    /// Device sample rate
    fn set_sample_rate(&mut self, sample_rate: u32);

    /// Largest block the device will pull
    fn set_block_size(&mut self, frames: usize);

    /// Output latency below this stage, in this stage's frames
    fn set_latency(&mut self, frames: usize);

    /// Peak level per output channel of the last block
    fn set_output_levels(&mut self, peaks: &[Sample]);

    /// Product of the time ratios of all stages above this one
    fn set_stretch_ratio_hint(&mut self, _ratio: f64) {}

    /// Short stage name for logs
    fn name(&self) -> &'static str;

    /// Stage this one pulls from
    fn upstream(&self) -> Option<&dyn SampleSource> {
        None
    }
}

/// Order of the wrappers, outermost first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainOrder {
    /// device ─► stretch ─► effect ─► source
    #[default]
    StretchOutermost,
    /// device ─► effect ─► stretch ─► source
    EffectOutermost,
}

/// An assembled chain plus handles to control its stages from other threads
pub struct ProcessingChain {
    /// Outermost stage, to be installed on the audio backend
    pub source: Box<dyn SampleSource>,
    pub stretch: TimeStretchControl,
    pub effect: EffectControl,
}

/// Wrap `source` in a time-stretch and an effect stage in the given order
///
/// Effect failures are reported on `events` when given.
pub fn build_chain(
    source: Box<dyn SampleSource>,
    order: ChainOrder,
    stretch: StretchConfig,
    events: Option<Sender<PlaybackEvent>>,
) -> ProcessingChain {
    log::info!("[CHAIN] Building chain ({:?})", order);
    match order {
        ChainOrder::StretchOutermost => {
            let (effect_stage, effect) = EffectWrapper::new(source, events);
            let (stretch_stage, stretch) = TimeStretchWrapper::new(Box::new(effect_stage), stretch);
            ProcessingChain {
                source: Box::new(stretch_stage),
                stretch,
                effect,
            }
        }
        ChainOrder::EffectOutermost => {
            let (stretch_stage, stretch) = TimeStretchWrapper::new(source, stretch);
            let (effect_stage, effect) = EffectWrapper::new(Box::new(stretch_stage), events);
            ProcessingChain {
                source: Box::new(effect_stage),
                stretch,
                effect,
            }
        }
    }
}

/// Stage names from the outermost stage inwards
pub fn stage_names(outermost: &dyn SampleSource) -> Vec<&'static str> {
    let mut names = vec![outermost.name()];
    let mut stage = outermost.upstream();
    while let Some(current) = stage {
        names.push(current.name());
        stage = current.upstream();
    }
    names
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    /// What a [`ProbeSource`] has been told by the stages above it
    #[derive(Default)]
    pub struct ProbeState {
        pub latency: AtomicUsize,
        pub channels: AtomicUsize,
        pub pulled_frames: AtomicUsize,
        pub ratio_hint: AtomicU64,
    }

    /// Source producing a ramp `0, 1, 2, ...` on every channel
    pub struct ProbeSource {
        pub state: Arc<ProbeState>,
        next: f32,
    }

    impl ProbeSource {
        pub fn new() -> (Self, Arc<ProbeState>) {
            let state = Arc::new(ProbeState::default());
            state.ratio_hint.store(1.0f64.to_bits(), Ordering::Relaxed);
            (
                Self {
                    state: state.clone(),
                    next: 0.0,
                },
                state,
            )
        }
    }

    impl SampleSource for ProbeSource {
        fn pull_samples(&mut self, buffers: &mut ChannelBuffers, frame_count: usize) -> usize {
            for i in 0..frame_count {
                for channel in buffers.channels_mut() {
                    channel[i] = self.next;
                }
                self.next += 1.0;
            }
            self.state
                .pulled_frames
                .fetch_add(frame_count, Ordering::Relaxed);
            frame_count
        }

        fn set_channel_count(&mut self, channels: usize) {
            self.state.channels.store(channels, Ordering::Relaxed);
        }

        fn set_sample_rate(&mut self, _sample_rate: u32) {}

        fn set_block_size(&mut self, _frames: usize) {}

        fn set_latency(&mut self, frames: usize) {
            self.state.latency.store(frames, Ordering::Relaxed);
        }

        fn set_output_levels(&mut self, _peaks: &[Sample]) {}

        fn set_stretch_ratio_hint(&mut self, ratio: f64) {
            self.state
                .ratio_hint
                .store(ratio.to_bits(), Ordering::Relaxed);
        }

        fn name(&self) -> &'static str {
            "probe"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ProbeSource;
    use super::*;

    #[test]
    fn test_stretch_outermost_order() {
        let (probe, _) = ProbeSource::new();
        let chain = build_chain(
            Box::new(probe),
            ChainOrder::StretchOutermost,
            StretchConfig::default(),
            None,
        );
        assert_eq!(stage_names(chain.source.as_ref()), vec!["stretch", "effect", "probe"]);
    }

    #[test]
    fn test_effect_outermost_order() {
        let (probe, _) = ProbeSource::new();
        let chain = build_chain(
            Box::new(probe),
            ChainOrder::EffectOutermost,
            StretchConfig::default(),
            None,
        );
        assert_eq!(stage_names(chain.source.as_ref()), vec!["effect", "stretch", "probe"]);
    }

    #[test]
    fn test_setters_reach_the_source() {
        let (probe, state) = ProbeSource::new();
        let mut chain = build_chain(
            Box::new(probe),
            ChainOrder::StretchOutermost,
            StretchConfig::default(),
            None,
        );
        chain.source.set_channel_count(4);
        chain.source.set_latency(256);

        assert_eq!(state.channels.load(std::sync::atomic::Ordering::Relaxed), 4);
        // Identity stretch and no effect add nothing
        assert_eq!(state.latency.load(std::sync::atomic::Ordering::Relaxed), 256);
    }

    #[test]
    fn test_chain_order_serde_names() {
        let yaml = serde_yaml::to_string(&ChainOrder::EffectOutermost).unwrap();
        assert_eq!(yaml.trim(), "effect_outermost");
    }
}
