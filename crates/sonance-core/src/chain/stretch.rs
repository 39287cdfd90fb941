//! Time-stretch stage
//!
//! Plays the upstream source slower or faster without changing pitch. The
//! ratio is a time ratio: 2.0 takes twice as long (half speed), 0.5 plays at
//! double speed. At exactly 1.0 the stage is a pure pass-through.
//!
//! The stage lives on the audio thread. Ratio and quality are set from other
//! threads through a [`TimeStretchControl`]; stretchers are built off the
//! audio thread and handed over on an `rtrb` queue, and replaced ones are
//! reclaimed by the collector thread.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use basedrop::Owned;
use rtrb::{Consumer, Producer, RingBuffer};
use serde::{Deserialize, Serialize};

use super::SampleSource;
use crate::engine::gc::gc_handle;
use crate::engine::{EngineError, EngineResult};
use crate::timestretch::{StretchQuality, TimeStretcher};
use crate::types::{ChannelBuffers, Sample, MAX_BUFFER_SIZE};

/// Slowest supported playback (4× as long)
pub const MAX_STRETCH_RATIO: f64 = 4.0;

/// Fastest supported playback (4× as fast)
pub const MIN_STRETCH_RATIO: f64 = 0.25;

const COMMAND_QUEUE_CAPACITY: usize = 8;

/// Initial stretch settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StretchConfig {
    pub ratio: f64,
    pub quality: StretchQuality,
}

impl Default for StretchConfig {
    fn default() -> Self {
        Self {
            ratio: 1.0,
            quality: StretchQuality::default(),
        }
    }
}

enum StretchCommand {
    Install(Owned<TimeStretcher>),
}

struct StretchShared {
    ratio: AtomicU64,
    quality: AtomicU8,
    channels: AtomicUsize,
    sample_rate: AtomicU32,
    installed: AtomicBool,
    commands: Mutex<Producer<StretchCommand>>,
}

fn quality_to_u8(quality: StretchQuality) -> u8 {
    match quality {
        StretchQuality::Faster => 0,
        StretchQuality::Finer => 1,
    }
}

fn quality_from_u8(value: u8) -> StretchQuality {
    match value {
        0 => StretchQuality::Faster,
        _ => StretchQuality::Finer,
    }
}

fn build_stretcher(channels: usize, sample_rate: u32, quality: StretchQuality) -> Owned<TimeStretcher> {
    Owned::new(
        &gc_handle(),
        TimeStretcher::new(channels, sample_rate, quality, MAX_BUFFER_SIZE),
    )
}

impl StretchShared {
    fn ratio(&self) -> f64 {
        f64::from_bits(self.ratio.load(Ordering::Acquire))
    }

    fn quality(&self) -> StretchQuality {
        quality_from_u8(self.quality.load(Ordering::Acquire))
    }

    /// Build a stretcher for the current format and queue it for the stage
    fn send_stretcher(&self) {
        let channels = self.channels.load(Ordering::Acquire);
        let sample_rate = self.sample_rate.load(Ordering::Acquire);
        if channels == 0 || sample_rate == 0 {
            // Built by the stage once the format is known
            return;
        }
        let stretcher = build_stretcher(channels, sample_rate, self.quality());
        let mut producer = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        if producer.push(StretchCommand::Install(stretcher)).is_err() {
            log::warn!("[STRETCH] Command queue full, stretcher not installed");
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Control handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Thread-safe control for a [`TimeStretchWrapper`]
#[derive(Clone)]
pub struct TimeStretchControl {
    shared: Arc<StretchShared>,
}

impl TimeStretchControl {
    /// Set the time ratio, clamped to `[MIN_STRETCH_RATIO, MAX_STRETCH_RATIO]`
    ///
    /// Non-finite or non-positive ratios are rejected.
    pub fn set_ratio(&self, ratio: f64) -> EngineResult<()> {
        if !ratio.is_finite() || ratio <= 0.0 {
            log::warn!("[STRETCH] Rejecting ratio {}", ratio);
            return Err(EngineError::InvalidRatio(ratio));
        }
        let ratio = ratio.clamp(MIN_STRETCH_RATIO, MAX_STRETCH_RATIO);
        let previous = f64::from_bits(self.shared.ratio.swap(ratio.to_bits(), Ordering::AcqRel));
        if previous != ratio {
            log::info!("[STRETCH] Ratio {:.3} → {:.3}", previous, ratio);
        }
        if ratio != 1.0 && !self.shared.installed.load(Ordering::Acquire) {
            self.shared.send_stretcher();
        }
        Ok(())
    }

    pub fn ratio(&self) -> f64 {
        self.shared.ratio()
    }

    /// Change the quality preset; an existing stretcher is rebuilt
    pub fn set_quality(&self, quality: StretchQuality) {
        let previous = self
            .shared
            .quality
            .swap(quality_to_u8(quality), Ordering::AcqRel);
        if previous == quality_to_u8(quality) {
            return;
        }
        log::info!("[STRETCH] Quality set to {:?}", quality);
        if self.shared.installed.load(Ordering::Acquire) || self.shared.ratio() != 1.0 {
            self.shared.send_stretcher();
        }
    }

    pub fn quality(&self) -> StretchQuality {
        self.shared.quality()
    }

    /// Whether the stage currently holds a stretcher
    pub fn is_active(&self) -> bool {
        self.shared.installed.load(Ordering::Acquire)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stage
// ═══════════════════════════════════════════════════════════════════════════════

/// Time-stretch decorator over an upstream [`SampleSource`]
pub struct TimeStretchWrapper {
    upstream: Box<dyn SampleSource>,
    shared: Arc<StretchShared>,
    commands: Consumer<StretchCommand>,
    stretcher: Option<Owned<TimeStretcher>>,
    /// Upstream frames pulled per call, pre-allocated for the slowest ratio
    input: ChannelBuffers,
    /// Fractional upstream frames carried between calls
    fraction: f64,
    channels: usize,
    sample_rate: u32,
    block_size: usize,
    /// Latency reported from above (device frames)
    latency_below: usize,
    /// Ratio applied by the last pull
    active_ratio: f64,
    /// Ratio of the stages above this one
    outer_ratio: f64,
    mismatch_logged: bool,
}

impl TimeStretchWrapper {
    pub fn new(upstream: Box<dyn SampleSource>, config: StretchConfig) -> (Self, TimeStretchControl) {
        let (producer, consumer) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
        let ratio = if config.ratio.is_finite() && config.ratio > 0.0 {
            config.ratio.clamp(MIN_STRETCH_RATIO, MAX_STRETCH_RATIO)
        } else {
            1.0
        };
        let shared = Arc::new(StretchShared {
            ratio: AtomicU64::new(ratio.to_bits()),
            quality: AtomicU8::new(quality_to_u8(config.quality)),
            channels: AtomicUsize::new(0),
            sample_rate: AtomicU32::new(0),
            installed: AtomicBool::new(false),
            commands: Mutex::new(producer),
        });

        let stage = Self {
            upstream,
            shared: shared.clone(),
            commands: consumer,
            stretcher: None,
            input: ChannelBuffers::default(),
            fraction: 0.0,
            channels: 0,
            sample_rate: 0,
            block_size: 0,
            latency_below: 0,
            active_ratio: 1.0,
            outer_ratio: 1.0,
            mismatch_logged: false,
        };
        (stage, TimeStretchControl { shared })
    }

    /// Upstream frames to pull for `frame_count` output frames at `ratio`
    fn input_frames_for(&mut self, frame_count: usize, ratio: f64) -> usize {
        self.fraction += frame_count as f64 / ratio;
        let frames = self.fraction.floor();
        self.fraction -= frames;
        (frames as usize).min(self.input.capacity())
    }

    fn install(&mut self, stretcher: Owned<TimeStretcher>) {
        if stretcher.channel_count() != self.channels || stretcher.sample_rate() != self.sample_rate {
            // Built for a format that has since changed; dropped off-thread by the collector
            return;
        }
        self.stretcher = Some(stretcher);
        self.fraction = 0.0;
        self.shared.installed.store(true, Ordering::Release);
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                StretchCommand::Install(stretcher) => self.install(stretcher),
            }
        }
    }

    /// Rebuild the stretcher for a new format (called off the audio thread)
    fn format_changed(&mut self) {
        self.shared.channels.store(self.channels, Ordering::Release);
        self.shared.sample_rate.store(self.sample_rate, Ordering::Release);
        self.input = ChannelBuffers::with_capacity(
            self.channels,
            (MAX_BUFFER_SIZE as f64 * MAX_STRETCH_RATIO) as usize,
        );

        let wanted = self.shared.ratio() != 1.0 || self.stretcher.is_some();
        if wanted && self.channels > 0 && self.sample_rate > 0 {
            self.stretcher = Some(build_stretcher(
                self.channels,
                self.sample_rate,
                self.shared.quality(),
            ));
            self.shared.installed.store(true, Ordering::Release);
        } else {
            self.stretcher = None;
            self.shared.installed.store(false, Ordering::Release);
        }
        self.fraction = 0.0;
    }

    /// Keep upstream latency and ratio hint in line with the active ratio
    fn publish_ratio(&mut self, ratio: f64) {
        if ratio == self.active_ratio {
            return;
        }
        self.active_ratio = ratio;
        self.upstream.set_stretch_ratio_hint(self.outer_ratio * ratio);
        let latency = self.latency_to_upstream();
        self.upstream.set_latency(latency);
    }

    fn latency_to_upstream(&self) -> usize {
        if self.active_ratio == 1.0 {
            return self.latency_below;
        }
        let stretcher_latency = self
            .stretcher
            .as_ref()
            .map(|s| s.total_latency())
            .unwrap_or(0);
        (self.latency_below as f64 / self.active_ratio).round() as usize + stretcher_latency
    }
}

impl SampleSource for TimeStretchWrapper {
    fn pull_samples(&mut self, buffers: &mut ChannelBuffers, frame_count: usize) -> usize {
        self.drain_commands();

        let ratio = self.shared.ratio();
        if ratio == 1.0 || self.stretcher.is_none() {
            self.publish_ratio(1.0);
            return self.upstream.pull_samples(buffers, frame_count);
        }

        let channels = buffers.channel_count();
        let stretcher_channels = self.stretcher.as_ref().map(|s| s.channel_count()).unwrap_or(0);
        if channels != stretcher_channels || self.input.channel_count() != channels {
            if !self.mismatch_logged {
                self.mismatch_logged = true;
                log::warn!(
                    "[STRETCH] Stretcher has {} channels, stream has {}; bypassing",
                    stretcher_channels,
                    channels
                );
            }
            self.publish_ratio(1.0);
            return self.upstream.pull_samples(buffers, frame_count);
        }

        self.publish_ratio(ratio);
        let input_frames = self.input_frames_for(frame_count, ratio);
        self.input.set_len_from_capacity(input_frames);
        self.upstream.pull_samples(&mut self.input, input_frames);

        if let Some(stretcher) = self.stretcher.as_mut() {
            stretcher.process(&self.input, input_frames, buffers, frame_count);
        }
        frame_count
    }

    fn set_channel_count(&mut self, channels: usize) {
        self.upstream.set_channel_count(channels);
        if channels != self.channels {
            self.channels = channels;
            self.mismatch_logged = false;
            self.format_changed();
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        self.upstream.set_sample_rate(sample_rate);
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.format_changed();
        }
    }

    fn set_block_size(&mut self, frames: usize) {
        self.block_size = frames;
        // Upstream may be asked for up to MAX_STRETCH_RATIO times the block
        let upstream_block = (frames as f64 * MAX_STRETCH_RATIO).ceil() as usize;
        self.upstream.set_block_size(upstream_block);
    }

    fn set_latency(&mut self, frames: usize) {
        self.latency_below = frames;
        let latency = self.latency_to_upstream();
        self.upstream.set_latency(latency);
    }

    fn set_output_levels(&mut self, peaks: &[Sample]) {
        self.upstream.set_output_levels(peaks);
    }

    fn set_stretch_ratio_hint(&mut self, ratio: f64) {
        self.outer_ratio = ratio;
        self.upstream
            .set_stretch_ratio_hint(self.outer_ratio * self.active_ratio);
    }

    fn name(&self) -> &'static str {
        "stretch"
    }

    fn upstream(&self) -> Option<&dyn SampleSource> {
        Some(self.upstream.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::ProbeSource;

    fn stage(ratio: f64) -> (TimeStretchWrapper, TimeStretchControl, Arc<crate::chain::testing::ProbeState>) {
        let (probe, state) = ProbeSource::new();
        let (mut stage, control) = TimeStretchWrapper::new(
            Box::new(probe),
            StretchConfig {
                ratio,
                quality: StretchQuality::Faster,
            },
        );
        stage.set_channel_count(2);
        stage.set_sample_rate(48000);
        stage.set_block_size(512);
        (stage, control, state)
    }

    #[test]
    fn test_identity_ratio_is_exact_pass_through() {
        let (mut stage, control, _) = stage(1.0);
        assert!(!control.is_active());

        let mut buffers = ChannelBuffers::silence(2, 256);
        assert_eq!(stage.pull_samples(&mut buffers, 256), 256);
        for i in 0..256 {
            assert_eq!(buffers[0][i], i as Sample);
            assert_eq!(buffers[1][i], i as Sample);
        }
    }

    #[test]
    fn test_half_speed_pulls_half_the_input() {
        let (mut stage, control, state) = stage(2.0);
        assert!(control.is_active());

        let mut buffers = ChannelBuffers::silence(2, 512);
        for _ in 0..4 {
            stage.pull_samples(&mut buffers, 512);
        }
        assert_eq!(state.pulled_frames.load(Ordering::Relaxed), 4 * 256);
        assert_eq!(f64::from_bits(state.ratio_hint.load(Ordering::Relaxed)), 2.0);
    }

    #[test]
    fn test_fractional_input_is_carried() {
        let (mut stage, _, state) = stage(3.0);
        let mut buffers = ChannelBuffers::silence(2, 100);
        for _ in 0..3 {
            stage.pull_samples(&mut buffers, 100);
        }
        // 300 / 3 = 100 upstream frames in total, none lost to rounding
        assert_eq!(state.pulled_frames.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_latency_is_scaled_and_includes_stretcher() {
        let (mut stage, _, state) = stage(2.0);
        let mut buffers = ChannelBuffers::silence(2, 64);
        stage.pull_samples(&mut buffers, 64);
        stage.set_latency(1000);

        let stretcher_latency = stage.stretcher.as_ref().map(|s| s.total_latency()).unwrap_or(0);
        assert!(stretcher_latency > 0);
        assert_eq!(state.latency.load(Ordering::Relaxed), 500 + stretcher_latency);
    }

    #[test]
    fn test_ratio_is_validated_and_clamped() {
        let (_, control, _) = stage(1.0);
        assert!(control.set_ratio(f64::NAN).is_err());
        assert!(control.set_ratio(0.0).is_err());
        control.set_ratio(10.0).unwrap();
        assert_eq!(control.ratio(), MAX_STRETCH_RATIO);
    }

    #[test]
    fn test_control_installs_stretcher_on_demand() {
        let (mut stage, control, state) = stage(1.0);
        control.set_ratio(2.0).unwrap();

        let mut buffers = ChannelBuffers::silence(2, 128);
        stage.pull_samples(&mut buffers, 128);
        assert!(control.is_active());
        assert_eq!(state.pulled_frames.load(Ordering::Relaxed), 64);
    }
}
