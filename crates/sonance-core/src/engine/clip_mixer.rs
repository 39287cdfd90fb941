//! Polyphonic clip sampler
//!
//! Renders note events by resampling one sample clip to each note's pitch.
//! Each voice plays the clip from the start at its own rate and is removed
//! once the clip runs out or its release fade has completed.

use std::sync::Arc;

use crate::clips::Clip;
use crate::params::MixParams;
use crate::types::{ChannelBuffers, Sample};

/// Lowest note frequency accepted (exclusive)
pub const MIN_NOTE_FREQUENCY: f32 = 20.0;

/// Highest note frequency accepted (exclusive)
pub const MAX_NOTE_FREQUENCY: f32 = 5000.0;

/// Release fade length in seconds
pub const RELEASE_SECONDS: f64 = 0.01;

/// Start of a note within the current block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteStart {
    pub frequency: f32,
    /// Frame within the block at which the note starts
    pub frame_offset: usize,
    pub level: f32,
    pub pan: f32,
    /// Absolute onset frame, used to pair the note with its end
    pub onset: u64,
}

/// End of a note within the current block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEnd {
    pub frequency: f32,
    pub frame_offset: usize,
    /// Absolute onset frame of the note being ended
    pub onset: u64,
}

/// Whether a note frequency is plausible enough to render
#[inline]
pub fn is_playable_frequency(frequency: f32) -> bool {
    frequency > MIN_NOTE_FREQUENCY && frequency < MAX_NOTE_FREQUENCY
}

#[derive(Debug, Clone)]
struct Voice {
    onset: u64,
    frequency: f32,
    level: f32,
    pan: f32,
    /// Output frames per clip frame
    ratio: f64,
    /// Note time (output frames since onset) at the start of the next block;
    /// negative while the onset lies ahead
    position: i64,
    /// Note time at which the release fade starts
    release_at: Option<i64>,
    finished: bool,
}

/// Clip sampler for one note model
pub struct ClipMixer {
    clip: Arc<Clip>,
    channels: usize,
    sample_rate: u32,
    release_frames: usize,
    voices: Vec<Voice>,
}

impl ClipMixer {
    /// Create a sampler rendering `channels` channels at `sample_rate`
    pub fn new(clip: Arc<Clip>, channels: usize, sample_rate: u32) -> Self {
        Self {
            clip,
            channels,
            sample_rate,
            release_frames: (RELEASE_SECONDS * sample_rate as f64).round().max(1.0) as usize,
            voices: Vec::with_capacity(32),
        }
    }

    #[inline]
    pub fn clip(&self) -> &Arc<Clip> {
        &self.clip
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sounding voices
    #[inline]
    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Silence every voice immediately
    pub fn reset(&mut self) {
        self.voices.clear();
    }

    /// Output frames per clip frame for a note at `frequency`
    pub fn resample_ratio(&self, frequency: f32) -> f64 {
        if frequency <= 0.0 || self.clip.sample_rate == 0 {
            return 0.0;
        }
        (self.clip.reference_frequency as f64 / frequency as f64)
            * (self.sample_rate as f64 / self.clip.sample_rate as f64)
    }

    /// Mix one block of `frames` frames into `out` starting at `offset`
    ///
    /// New notes in `starts` begin at their frame offset; notes in `ends` are
    /// matched to a sounding voice by onset (or, failing that, by frequency)
    /// and enter their release fade.
    pub fn mix(
        &mut self,
        out: &mut ChannelBuffers,
        offset: usize,
        frames: usize,
        gain: f32,
        starts: &[NoteStart],
        ends: &[NoteEnd],
    ) {
        for start in starts {
            self.start_voice(start);
        }
        for end in ends {
            self.end_voice(end);
        }

        let clip_len = self.clip.len();
        let channels = self.channels.min(out.channel_count());

        for voice in &mut self.voices {
            let params = MixParams {
                muted: false,
                gain: gain * voice.level,
                pan: voice.pan,
            };

            for i in 0..frames {
                let t = voice.position + i as i64;
                if t < 0 {
                    continue;
                }

                let envelope = match voice.release_at {
                    Some(release) if t >= release => {
                        let into = (t - release) as usize;
                        if into >= self.release_frames {
                            voice.finished = true;
                            break;
                        }
                        1.0 - into as f32 / self.release_frames as f32
                    }
                    _ => 1.0,
                };

                let clip_position = t as f64 / voice.ratio;
                let index = clip_position as usize;
                if index + 1 >= clip_len {
                    voice.finished = true;
                    break;
                }
                let frac = (clip_position - index as f64) as Sample;
                let sample = self.clip.samples[index] * (1.0 - frac)
                    + self.clip.samples[index + 1] * frac;
                let value = sample * envelope;

                for c in 0..channels {
                    out[c][offset + i] += value * params.channel_gain(c);
                }
            }
            voice.position += frames as i64;
        }

        self.voices.retain(|v| !v.finished);
    }

    fn start_voice(&mut self, start: &NoteStart) {
        if !is_playable_frequency(start.frequency) {
            log::trace!("[MIXER] Rejecting note at {} Hz", start.frequency);
            return;
        }
        let ratio = self.resample_ratio(start.frequency);
        let resampled_len = (self.clip.len() as f64 * ratio).floor();
        if resampled_len < 1.0 {
            // Nothing audible after resampling
            return;
        }
        self.voices.push(Voice {
            onset: start.onset,
            frequency: start.frequency,
            level: start.level,
            pan: start.pan,
            ratio,
            position: -(start.frame_offset as i64),
            release_at: None,
            finished: false,
        });
    }

    fn end_voice(&mut self, end: &NoteEnd) {
        let in_block = end.frame_offset as i64;
        // A voice may only be released after the frame it started on
        let eligible = |v: &Voice| v.release_at.is_none() && v.position + in_block > 0;

        let index = self
            .voices
            .iter()
            .position(|v| eligible(v) && v.onset == end.onset)
            .or_else(|| {
                self.voices
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| eligible(v) && v.frequency == end.frequency)
                    .max_by_key(|(_, v)| v.position)
                    .map(|(i, _)| i)
            });

        if let Some(i) = index {
            let voice = &mut self.voices[i];
            voice.release_at = Some(voice.position + in_block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_clip(len: usize) -> Arc<Clip> {
        Arc::new(Clip {
            name: "ramp".into(),
            sample_rate: 1000,
            reference_frequency: 100.0,
            samples: (0..len).map(|i| i as Sample / len as Sample).collect(),
        })
    }

    fn note(frequency: f32, frame_offset: usize, onset: u64) -> NoteStart {
        NoteStart {
            frequency,
            frame_offset,
            level: 1.0,
            pan: 0.0,
            onset,
        }
    }

    #[test]
    fn test_reference_pitch_plays_clip_verbatim() {
        let mut mixer = ClipMixer::new(ramp_clip(100), 2, 1000);
        let mut out = ChannelBuffers::silence(2, 64);

        mixer.mix(&mut out, 0, 64, 1.0, &[note(100.0, 4, 4)], &[]);

        assert_eq!(out[0][0..4], [0.0; 4]);
        for i in 0..60 {
            assert!((out[0][4 + i] - i as Sample / 100.0).abs() < 1e-6);
            assert_eq!(out[0][4 + i], out[1][4 + i]);
        }
        assert_eq!(mixer.active_voices(), 1);
    }

    #[test]
    fn test_octave_up_plays_twice_as_fast() {
        let mut mixer = ClipMixer::new(ramp_clip(100), 1, 1000);
        assert!((mixer.resample_ratio(200.0) - 0.5).abs() < 1e-9);

        let mut out = ChannelBuffers::silence(1, 64);
        mixer.mix(&mut out, 0, 64, 1.0, &[note(200.0, 0, 0)], &[]);
        assert!((out[0][10] - 0.2).abs() < 1e-6);
        // The 100-frame clip lasts ~50 output frames
        assert!(out[0][60] == 0.0);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_zero_length_resampled_clip_is_silent() {
        let mut mixer = ClipMixer::new(ramp_clip(1), 2, 1000);
        let mut out = ChannelBuffers::silence(2, 32);
        mixer.mix(&mut out, 0, 32, 1.0, &[note(4000.0, 0, 0)], &[]);
        assert!(out[0].iter().all(|s| *s == 0.0));
        assert_eq!(mixer.active_voices(), 0);

        let mut empty = ClipMixer::new(ramp_clip(0), 2, 1000);
        empty.mix(&mut out, 0, 32, 1.0, &[note(100.0, 0, 0)], &[]);
        assert_eq!(empty.active_voices(), 0);
    }

    #[test]
    fn test_implausible_frequencies_rejected() {
        let mut mixer = ClipMixer::new(ramp_clip(100), 2, 1000);
        let mut out = ChannelBuffers::silence(2, 16);
        mixer.mix(
            &mut out,
            0,
            16,
            1.0,
            &[note(20.0, 0, 0), note(5000.0, 0, 1), note(6000.0, 0, 2)],
            &[],
        );
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_release_fades_and_removes_voice() {
        let clip = Arc::new(Clip {
            name: "dc".into(),
            sample_rate: 1000,
            reference_frequency: 100.0,
            samples: vec![1.0; 1000],
        });
        // 10 ms release at 1 kHz is 10 frames
        let mut mixer = ClipMixer::new(clip, 1, 1000);
        let mut out = ChannelBuffers::silence(1, 64);
        let end = NoteEnd {
            frequency: 100.0,
            frame_offset: 20,
            onset: 0,
        };
        mixer.mix(&mut out, 0, 64, 1.0, &[note(100.0, 0, 0)], &[end]);

        assert_eq!(out[0][19], 1.0);
        assert_eq!(out[0][20], 1.0);
        assert!((out[0][25] - 0.5).abs() < 1e-6);
        assert_eq!(out[0][30], 0.0);
        assert_eq!(mixer.active_voices(), 0);
    }

    #[test]
    fn test_end_on_onset_frame_does_not_release_new_note() {
        let clip = Arc::new(Clip {
            name: "dc".into(),
            sample_rate: 1000,
            reference_frequency: 100.0,
            samples: vec![1.0; 1000],
        });
        let mut mixer = ClipMixer::new(clip, 1, 1000);
        let mut out = ChannelBuffers::silence(1, 64);
        // Same frequency retriggered at frame 10: the end belongs to the old note
        mixer.mix(&mut out, 0, 64, 1.0, &[note(100.0, 0, 0)], &[]);
        let end = NoteEnd {
            frequency: 100.0,
            frame_offset: 10,
            onset: 0,
        };
        mixer.mix(&mut out, 0, 64, 1.0, &[note(100.0, 10, 74)], &[end]);
        assert_eq!(mixer.active_voices(), 1);
    }

    #[test]
    fn test_pan_and_gain_apply() {
        let clip = Arc::new(Clip {
            name: "dc".into(),
            sample_rate: 1000,
            reference_frequency: 100.0,
            samples: vec![1.0; 100],
        });
        let mut mixer = ClipMixer::new(clip, 2, 1000);
        let mut out = ChannelBuffers::silence(2, 8);
        let mut start = note(100.0, 0, 0);
        start.pan = 0.5;
        start.level = 0.5;
        mixer.mix(&mut out, 0, 8, 0.5, &[start], &[]);
        assert!((out[0][1] - 0.125).abs() < 1e-6);
        assert!((out[1][1] - 0.25).abs() < 1e-6);
    }
}
