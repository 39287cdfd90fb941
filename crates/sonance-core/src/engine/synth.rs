//! Continuous oscillator driven by a frequency curve
//!
//! One additive oscillator per curve model. Odd harmonics up to the Nyquist
//! limit give a soft square-ish tone. Frequency changes glide, and starting or
//! stopping fades, so stepwise curve values never click.

use std::f64::consts::TAU;

use crate::params::MixParams;
use crate::types::ChannelBuffers;

/// Length of fades and glides (frames)
pub const RAMP_FRAMES: usize = 100;

/// Peak output level before gain
const OUTPUT_LEVEL: f64 = 0.3;

/// Additive harmonic oscillator
pub struct ContinuousSynth {
    channels: usize,
    sample_rate: u32,
    prev_frequency: f32,
    phase: f64,
}

impl ContinuousSynth {
    pub fn new(channels: usize, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
            prev_frequency: 0.0,
            phase: 0.0,
        }
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frequency at the end of the last block (0 when silent)
    #[inline]
    pub fn prev_frequency(&self) -> f32 {
        self.prev_frequency
    }

    pub fn reset(&mut self) {
        self.prev_frequency = 0.0;
        self.phase = 0.0;
    }

    /// Number of odd harmonics rendered at `frequency`
    pub fn harmonic_count(&self, frequency: f64) -> usize {
        if frequency <= 0.0 {
            return 0;
        }
        ((self.sample_rate as f64 / 4.0) / frequency - 1.0).max(1.0) as usize
    }

    /// Mix one block at `frequency` (≤ 0 means off) into `out` at `offset`
    pub fn mix(
        &mut self,
        out: &mut ChannelBuffers,
        offset: usize,
        frames: usize,
        params: MixParams,
        frequency: f32,
    ) {
        let rate = self.sample_rate as f64;
        let prev = self.prev_frequency as f64;
        let target = frequency as f64;
        let channels = self.channels.min(out.channel_count());

        if rate <= 0.0 || (target <= 0.0 && prev <= 0.0) {
            self.phase = 0.0;
            self.prev_frequency = 0.0;
            return;
        }

        let nyquist = rate / 2.0;
        for i in 0..frames {
            let ramp = (i as f64 / RAMP_FRAMES as f64).min(1.0);
            let (f, level) = if prev <= 0.0 {
                (target, ramp)
            } else if target <= 0.0 {
                if ramp >= 1.0 {
                    break;
                }
                (prev, 1.0 - ramp)
            } else {
                (prev + (target - prev) * ramp, 1.0)
            };

            self.phase = (self.phase + TAU * f / rate) % TAU;

            let mut value = 0.0;
            for h in 0..self.harmonic_count(f) {
                let hn = (2 * h + 1) as f64;
                if hn * f >= nyquist {
                    break;
                }
                value += (self.phase * hn).sin() / hn;
            }
            let value = (value * level * OUTPUT_LEVEL) as f32;

            for c in 0..channels {
                out[c][offset + i] += value * params.channel_gain(c);
            }
        }

        if target <= 0.0 {
            self.phase = 0.0;
            self.prev_frequency = 0.0;
        } else {
            self.prev_frequency = frequency;
        }
    }
}
