//! Per-model mixing
//!
//! Every registered model gets a role when it is added: dense models are read
//! and mixed directly, note models drive a [`ClipMixer`], curve models drive a
//! [`ContinuousSynth`]. Everything else is kept as `Unsupported` and
//! contributes nothing. The role is never re-derived on the mixing path.
//!
//! Clip and curve roles render in blocks of [`PROCESSING_BLOCK_SIZE`] frames;
//! a chunk that is not a whole number of blocks ends in one shorter block.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use super::clip_mixer::{is_playable_frequency, ClipMixer, NoteEnd, NoteStart};
use super::synth::ContinuousSynth;
use crate::clips::{Clip, ClipLibrary};
use crate::model::{CurveModel, DenseModel, ModelHandle, NoteModel};
use crate::params::{MixParams, PlayParameterStore, DEFAULT_CLIP_ID};
use crate::types::{ChannelBuffers, ModelId, PROCESSING_BLOCK_SIZE};

/// Destination of a mix: buffers plus the frame the chunk starts at
///
/// Fades may write up to `fade_in / 2` frames before `offset` and
/// `fade_out / 2` frames after the chunk.
pub struct MixTarget<'a> {
    pub buffers: &'a mut ChannelBuffers,
    pub offset: usize,
}

impl<'a> MixTarget<'a> {
    pub fn new(buffers: &'a mut ChannelBuffers, offset: usize) -> Self {
        Self { buffers, offset }
    }
}

/// Kind of role a model was given at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Dense,
    Clip,
    Curve,
    Unsupported,
}

/// Pending note end, ordered by (off frame, onset frame, frequency)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PendingOff {
    off_frame: u64,
    onset: u64,
    /// Positive frequencies order the same as their bit patterns
    frequency_bits: u32,
}

impl PendingOff {
    fn frequency(&self) -> f32 {
        f32::from_bits(self.frequency_bits)
    }
}

enum Role {
    Dense(Arc<dyn DenseModel>),
    Clip {
        model: Arc<dyn NoteModel>,
        clip_id: String,
        mixer: ClipMixer,
        pending_offs: BTreeSet<PendingOff>,
    },
    Curve {
        model: Arc<dyn CurveModel>,
        synth: ContinuousSynth,
    },
    Unsupported,
}

impl Role {
    fn kind(&self) -> RoleKind {
        match self {
            Role::Dense(_) => RoleKind::Dense,
            Role::Clip { .. } => RoleKind::Clip,
            Role::Curve { .. } => RoleKind::Curve,
            Role::Unsupported => RoleKind::Unsupported,
        }
    }
}

/// Mixes registered models into fill buffers
pub struct ModelMixer {
    roles: BTreeMap<ModelId, Role>,
    clips: Arc<dyn ClipLibrary>,
    params: Arc<dyn PlayParameterStore>,
    solo: Option<HashSet<ModelId>>,
    target_channels: usize,
    target_rate: u32,
    /// Dense read scratch, one channel per model channel
    scratch: ChannelBuffers,
    note_starts: Vec<NoteStart>,
    note_ends: Vec<NoteEnd>,
}

impl ModelMixer {
    pub fn new(clips: Arc<dyn ClipLibrary>, params: Arc<dyn PlayParameterStore>) -> Self {
        Self {
            roles: BTreeMap::new(),
            clips,
            params,
            solo: None,
            target_channels: 0,
            target_rate: 0,
            scratch: ChannelBuffers::default(),
            note_starts: Vec::with_capacity(64),
            note_ends: Vec::with_capacity(64),
        }
    }

    /// Fixed block size for clip and curve roles
    #[inline]
    pub fn block_size(&self) -> usize {
        PROCESSING_BLOCK_SIZE
    }

    #[inline]
    pub fn target_channels(&self) -> usize {
        self.target_channels
    }

    #[inline]
    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Set the output format; voice state is rebuilt if it changed
    pub fn set_target(&mut self, channels: usize, sample_rate: u32) {
        if channels == self.target_channels && sample_rate == self.target_rate {
            return;
        }
        self.target_channels = channels;
        self.target_rate = sample_rate;
        for role in self.roles.values_mut() {
            match role {
                Role::Clip { mixer, pending_offs, .. } => {
                    let clip = mixer.clip().clone();
                    *mixer = ClipMixer::new(clip, channels, sample_rate);
                    pending_offs.clear();
                }
                Role::Curve { synth, .. } => {
                    *synth = ContinuousSynth::new(channels, sample_rate);
                }
                Role::Dense(_) | Role::Unsupported => {}
            }
        }
    }

    /// Register a model and resolve its role
    ///
    /// Re-adding an id replaces the previous registration.
    pub fn add_model(&mut self, id: ModelId, handle: &ModelHandle) -> RoleKind {
        let role = match handle {
            ModelHandle::Dense(model) => Role::Dense(model.clone()),
            ModelHandle::Notes(model) => {
                let clip_id = self.clip_id_for(id);
                match self.load_clip(id, &clip_id) {
                    Some(clip) => Role::Clip {
                        model: model.clone(),
                        clip_id,
                        mixer: ClipMixer::new(clip, self.target_channels, self.target_rate),
                        pending_offs: BTreeSet::new(),
                    },
                    None => Role::Unsupported,
                }
            }
            ModelHandle::Curve(model) => Role::Curve {
                model: model.clone(),
                synth: ContinuousSynth::new(self.target_channels, self.target_rate),
            },
            ModelHandle::Other(_) => Role::Unsupported,
        };
        let kind = role.kind();
        log::debug!("[MIXER] Registered {} as {:?}", id, kind);
        self.roles.insert(id, role);
        kind
    }

    /// Unregister a model; its voices go with it
    pub fn remove_model(&mut self, id: ModelId) -> bool {
        self.roles.remove(&id).is_some()
    }

    pub fn contains(&self, id: ModelId) -> bool {
        self.roles.contains_key(&id)
    }

    pub fn role(&self, id: ModelId) -> Option<RoleKind> {
        self.roles.get(&id).map(Role::kind)
    }

    pub fn model_ids(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.roles.keys().copied()
    }

    /// Restrict playback to a set of models (`None` plays all unmuted models)
    pub fn set_solo(&mut self, solo: Option<HashSet<ModelId>>) {
        self.solo = solo;
    }

    pub fn solo(&self) -> Option<&HashSet<ModelId>> {
        self.solo.as_ref()
    }

    /// Drop pending note ends and all voice state (on play or seek)
    pub fn reset(&mut self) {
        for role in self.roles.values_mut() {
            match role {
                Role::Clip { mixer, pending_offs, .. } => {
                    mixer.reset();
                    pending_offs.clear();
                }
                Role::Curve { synth, .. } => synth.reset(),
                Role::Dense(_) | Role::Unsupported => {}
            }
        }
    }

    /// Add model `id` over `[start_frame, start_frame + frame_count)` into `target`
    ///
    /// Returns the number of frames produced (0 if the model is skipped).
    pub fn mix_model(
        &mut self,
        id: ModelId,
        start_frame: u64,
        frame_count: usize,
        target: &mut MixTarget<'_>,
        fade_in: usize,
        fade_out: usize,
    ) -> usize {
        if let Some(solo) = &self.solo {
            if !solo.contains(&id) {
                return 0;
            }
        }
        let params = self.params.parameters(id);
        let mix = MixParams::from_params(params.as_deref());
        if mix.muted {
            return 0;
        }

        // Pick up clip changes made since the last cycle
        if let Some(params) = &params {
            let wanted = params.clip_id();
            let stale = matches!(self.roles.get(&id), Some(Role::Clip { clip_id, .. }) if *clip_id != wanted);
            if stale {
                if let Some(clip) = self.load_clip(id, &wanted) {
                    if let Some(Role::Clip { clip_id, mixer, pending_offs, .. }) = self.roles.get_mut(&id) {
                        *mixer = ClipMixer::new(clip, self.target_channels, self.target_rate);
                        pending_offs.clear();
                        *clip_id = wanted;
                    }
                }
            }
        }

        let channels = self.target_channels.min(target.buffers.channel_count());
        let Some(role) = self.roles.get_mut(&id) else {
            return 0;
        };
        match role {
            Role::Dense(model) => mix_dense(
                model.as_ref(),
                &mut self.scratch,
                mix,
                channels,
                start_frame,
                frame_count,
                target,
                fade_in,
                fade_out,
            ),
            Role::Clip {
                model,
                mixer,
                pending_offs,
                ..
            } => {
                let mut done = 0;
                while done < frame_count {
                    let block = PROCESSING_BLOCK_SIZE.min(frame_count - done);
                    let block_start = start_frame + done as u64;
                    collect_note_events(
                        model.as_ref(),
                        pending_offs,
                        block_start,
                        block,
                        mix.pan,
                        &mut self.note_starts,
                        &mut self.note_ends,
                    );
                    mixer.mix(
                        target.buffers,
                        target.offset + done,
                        block,
                        mix.gain,
                        &self.note_starts,
                        &self.note_ends,
                    );
                    done += block;
                }
                frame_count
            }
            Role::Curve { model, synth } => {
                let mut done = 0;
                while done < frame_count {
                    let block = PROCESSING_BLOCK_SIZE.min(frame_count - done);
                    let block_start = start_frame + done as u64;
                    let frequency = curve_frequency(model.as_ref(), block_start, block);
                    synth.mix(target.buffers, target.offset + done, block, mix, frequency);
                    done += block;
                }
                frame_count
            }
            Role::Unsupported => 0,
        }
    }

    fn clip_id_for(&self, id: ModelId) -> String {
        self.params
            .parameters(id)
            .map(|p| p.clip_id())
            .unwrap_or_else(|| DEFAULT_CLIP_ID.to_string())
    }

    fn load_clip(&self, id: ModelId, clip_id: &str) -> Option<Arc<Clip>> {
        if let Some(clip) = self.clips.clip(clip_id) {
            return Some(clip);
        }
        log::warn!(
            "[MIXER] Clip '{}' not found for {}, falling back to '{}'",
            clip_id,
            id,
            DEFAULT_CLIP_ID
        );
        let fallback = self.clips.clip(DEFAULT_CLIP_ID);
        if fallback.is_none() {
            log::warn!("[MIXER] No clip available for {}, it will not be played", id);
        }
        fallback
    }
}

/// Read a dense model with edge fades and add it into the target
#[allow(clippy::too_many_arguments)]
fn mix_dense(
    model: &dyn DenseModel,
    scratch: &mut ChannelBuffers,
    mix: MixParams,
    channels: usize,
    start_frame: u64,
    frame_count: usize,
    target: &mut MixTarget<'_>,
    fade_in: usize,
    fade_out: usize,
) -> usize {
    let model_channels = model.channel_count().max(1);
    let lead = fade_in / 2;
    let tail = fade_out / 2;
    let read_len = lead + frame_count + tail;

    let read_start = start_frame as i64 - lead as i64;
    // Frames before the timeline start or the model's first frame stay silent
    let from = read_start.max(model.start_frame() as i64).max(0);
    let pad = ((from - read_start) as usize).min(read_len);

    if scratch.channel_count() != model_channels {
        scratch.set_channel_count(model_channels);
    }
    scratch.resize(read_len);
    scratch.fill_silence();
    if pad < read_len {
        let got = model.get_data(0..model_channels, from as u64, read_len - pad, scratch);
        let got = got.min(read_len - pad);
        if pad > 0 {
            for channel in scratch.channels_mut() {
                channel.copy_within(0..got, pad);
                channel[..pad].fill(0.0);
            }
        }
    }
    let fade_out_start = read_len.saturating_sub(fade_out);

    let base = target.offset - lead.min(target.offset);
    let skip = lead - lead.min(target.offset);
    for i in skip..read_len {
        let mut ramp = 1.0f32;
        if fade_in > 0 && i < fade_in {
            ramp = i as f32 / fade_in as f32;
        }
        if fade_out > 0 && i >= fade_out_start {
            ramp = ramp.min((read_len - i) as f32 / fade_out as f32);
        }
        let index = base + i - skip;
        if index >= target.buffers.len() {
            break;
        }
        for c in 0..channels {
            let sample = scratch[c % model_channels][i];
            target.buffers[c][index] += sample * ramp * mix.channel_gain(c);
        }
    }
    frame_count
}

/// Turn the notes of one block into start and end events
///
/// Pending ends falling at or before a new onset are emitted before it, the
/// remaining ends inside the block after all onsets.
fn collect_note_events(
    model: &dyn NoteModel,
    pending_offs: &mut BTreeSet<PendingOff>,
    block_start: u64,
    block: usize,
    pan: f32,
    starts: &mut Vec<NoteStart>,
    ends: &mut Vec<NoteEnd>,
) {
    starts.clear();
    ends.clear();
    let block_end = block_start + block as u64;

    let emit_until = |frame: u64, pending: &mut BTreeSet<PendingOff>, ends: &mut Vec<NoteEnd>| {
        while let Some(first) = pending.first().copied() {
            if first.off_frame > frame {
                break;
            }
            pending.pop_first();
            ends.push(NoteEnd {
                frequency: first.frequency(),
                frame_offset: first.off_frame.saturating_sub(block_start) as usize,
                onset: first.onset,
            });
        }
    };

    for note in model.notes_within(block_start, block_end) {
        if note.frame < block_start || note.frame >= block_end {
            continue;
        }
        if note.duration == 0 {
            log::trace!("[MIXER] Skipping zero-duration note at {}", note.frame);
            continue;
        }
        if !is_playable_frequency(note.frequency) {
            continue;
        }
        emit_until(note.frame, pending_offs, ends);
        starts.push(NoteStart {
            frequency: note.frequency,
            frame_offset: (note.frame - block_start) as usize,
            level: note.level(),
            pan,
            onset: note.frame,
        });
        pending_offs.insert(PendingOff {
            off_frame: note.end_frame(),
            onset: note.frame,
            frequency_bits: note.frequency.to_bits(),
        });
    }
    emit_until(block_end - 1, pending_offs, ends);
}

/// Frequency driving the oscillator for one block (0 = off)
///
/// Uses the last point inside or before the block, as long as it lies within
/// two resolution steps of the block start. A point at the block end belongs
/// to the next block.
fn curve_frequency(model: &dyn CurveModel, block_start: u64, block: usize) -> f32 {
    let reach = model.resolution().saturating_mul(2);
    let from = block_start.saturating_sub(reach);
    let block_end = block_start + block as u64;
    model
        .points_within(from, block_end)
        .last()
        .map(|p| p.value)
        .unwrap_or(0.0)
}
