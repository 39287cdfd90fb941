//! Multichannel feedback delay
//!
//! One delay line per channel with:
//! - Delay time (ms)
//! - Feedback
//! - Dry/wet mix
//! - Cross-feed mode: each channel feeds back into its neighbour
//!   (ping-pong on a stereo stream)

use crate::effect::{Effect, EffectBase, EffectInfo, ParamInfo, ParamValue};
use crate::types::{ChannelBuffers, Sample};

/// Maximum delay time in seconds
const MAX_DELAY_SECONDS: f32 = 2.0;

/// Rate assumed until the chain reports the stream rate
const DEFAULT_SAMPLE_RATE: u32 = 48000;

struct DelayLines {
    /// One circular buffer per channel, all the same length
    lines: Vec<Vec<Sample>>,
    write_pos: usize,
    delay_samples: usize,
}

impl DelayLines {
    fn new(channels: usize, sample_rate: u32) -> Self {
        let length = (sample_rate as f32 * MAX_DELAY_SECONDS) as usize + 1;
        Self {
            lines: (0..channels).map(|_| vec![0.0; length]).collect(),
            write_pos: 0,
            delay_samples: sample_rate as usize / 4,
        }
    }

    #[inline]
    fn length(&self) -> usize {
        self.lines.first().map(Vec::len).unwrap_or(1)
    }

    fn set_delay_samples(&mut self, samples: usize) {
        self.delay_samples = samples.clamp(1, self.length() - 1);
    }

    #[inline]
    fn read_pos(&self) -> usize {
        (self.write_pos + self.length() - self.delay_samples) % self.length()
    }

    fn reset(&mut self) {
        for line in &mut self.lines {
            line.fill(0.0);
        }
        self.write_pos = 0;
    }
}

/// Feedback delay effect
///
/// Parameters:
/// - Time: Delay time in ms (10-2000ms)
/// - Feedback: Amount of signal fed back (0-95%)
/// - Mix: Dry/wet balance (0% = dry, 100% = wet)
/// - Cross-feed: Feed each channel's echo into the next channel
///
/// The delay time is musical, not processing latency: zero latency is reported.
pub struct DelayEffect {
    base: EffectBase,
    lines: DelayLines,
    sample_rate: u32,
}

impl DelayEffect {
    pub fn new(channels: usize) -> Self {
        let info = EffectInfo::new("Delay", "Delay", channels)
            .with_param(
                ParamInfo::new("Time", 0.25)
                    .with_range(10.0, 2000.0)
                    .with_unit("ms"),
            )
            .with_param(ParamInfo::new("Feedback", 0.4).with_range(0.0, 0.95))
            .with_param(ParamInfo::new("Mix", 0.3).with_range(0.0, 1.0))
            .with_param(ParamInfo::new("Cross-feed", 0.0).with_range(0.0, 1.0));

        let mut effect = Self {
            base: EffectBase::new(info),
            lines: DelayLines::new(channels, DEFAULT_SAMPLE_RATE),
            sample_rate: DEFAULT_SAMPLE_RATE,
        };
        effect.update_delay_time();
        effect
    }

    fn delay_time_ms(&self) -> f32 {
        self.base.param_actual(0)
    }

    fn feedback(&self) -> f32 {
        self.base.param_actual(1)
    }

    fn mix(&self) -> f32 {
        self.base.param_actual(2)
    }

    fn cross_feed(&self) -> bool {
        self.base.param_actual(3) > 0.5
    }

    fn update_delay_time(&mut self) {
        let samples = (self.delay_time_ms() / 1000.0 * self.sample_rate as f32) as usize;
        self.lines.set_delay_samples(samples);
    }
}

impl Effect for DelayEffect {
    fn process(&mut self, buffer: &mut ChannelBuffers, frames: usize) {
        if self.base.is_bypassed() {
            return;
        }

        let feedback = self.feedback();
        let mix = self.mix();
        let dry = 1.0 - mix;
        let cross = self.cross_feed();
        let channels = self.lines.lines.len().min(buffer.channel_count());
        let length = self.lines.length();

        for i in 0..frames.min(buffer.len()) {
            let read_pos = self.lines.read_pos();
            let write_pos = self.lines.write_pos;
            for c in 0..channels {
                // Cross-feed takes the echo from the previous channel
                let source = if cross { (c + channels - 1) % channels } else { c };
                let delayed = self.lines.lines[c][read_pos];
                let echo = self.lines.lines[source][read_pos];
                let input = buffer[c][i];

                self.lines.lines[c][write_pos] = input + echo * feedback;
                buffer[c][i] = input * dry + delayed * mix;
            }
            self.lines.write_pos = (write_pos + 1) % length;
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
        if index == 0 {
            self.update_delay_time();
        }
    }

    fn set_bypass(&mut self, bypass: bool) {
        self.base.set_bypass(bypass);
    }

    fn is_bypassed(&self) -> bool {
        self.base.is_bypassed()
    }

    fn reset(&mut self) {
        self.lines.reset();
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate == 0 || sample_rate == self.sample_rate {
            return;
        }
        self.sample_rate = sample_rate;
        self.lines = DelayLines::new(self.base.info().channels, sample_rate);
        self.update_delay_time();
    }
}
