//! Playback source: control handle and real-time consumer
//!
//! A playback source is split in two halves that share one [`SourceShared`]:
//!
//! - [`PlaybackSource`]: the control handle (play/stop, model registration,
//!   position queries). Owned by the host, never touched by the audio thread.
//! - [`PlaybackOutput`]: the consumer end of the sample rings, installed at
//!   the bottom of the processing chain and pulled from the audio callback.
//!
//! Between them runs the fill task (see [`super::fill`]) which mixes models
//! into the rings ahead of the consumer.
//!
//! # Threading
//!
//! ```text
//! Control thread          Fill task               Audio thread
//! ──────────────          ─────────               ────────────
//! play/stop/add_model ──► Mutex<Orchestration> ◄─ (never locked)
//!          │                    │
//!          └── wake ──────────► │ write generation
//!                               │      │ publish (SharedCell::set)
//!                               ▼      ▼
//!                            read generation ──────► pull_samples
//!                                       ◄── wake ─── (BufferConsumed)
//! ```
//!
//! The audio thread only touches atomics, the published generation and the
//! lock-free rings inside it. Retired generations are reclaimed by the global
//! collector thread.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use basedrop::{Shared, SharedCell};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use super::error::{EngineError, EngineResult};
use super::events::{PlaybackEvent, WakeReason, EVENT_QUEUE_CAPACITY, WAKE_QUEUE_CAPACITY};
use super::fill;
use super::gc::gc_handle;
use super::model_mixer::{ModelMixer, RoleKind};
use super::position::{Estimate, EstimatorInput, PositionEstimator};
use super::ranges::{FillChunk, PlaybackRanges};
use crate::buffer::BufferGeneration;
use crate::chain::SampleSource;
use crate::clips::{BuiltinClips, ClipLibrary};
use crate::config::EngineConfig;
use crate::model::{ModelHandle, ModelStore};
use crate::params::{ParameterRegistry, PlayParameterStore};
use crate::selection::{Alignment, IdentityAlignment, SelectionProvider};
use crate::types::{ChannelBuffers, ModelId, PlayState, Sample, MIN_TARGET_CHANNELS, PROCESSING_BLOCK_SIZE};

/// Most output channels metered by [`PlaybackSource::output_levels`]
pub const MAX_METERED_CHANNELS: usize = 32;

// ═══════════════════════════════════════════════════════════════════════════════
// Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Collaborators a playback source reads from
///
/// Everything is shared and read-only from the engine's point of view.
#[derive(Clone)]
pub struct PlaybackContext {
    pub models: Arc<dyn ModelStore>,
    pub selection: Arc<dyn SelectionProvider>,
    pub params: Arc<dyn PlayParameterStore>,
    pub clips: Arc<dyn ClipLibrary>,
    pub alignment: Arc<dyn Alignment>,
}

impl PlaybackContext {
    /// Context with default parameters, the built-in clips and no alignment
    pub fn new(models: Arc<dyn ModelStore>, selection: Arc<dyn SelectionProvider>) -> Self {
        Self {
            models,
            selection,
            params: Arc::new(ParameterRegistry::new()),
            clips: Arc::new(BuiltinClips::new()),
            alignment: Arc::new(IdentityAlignment),
        }
    }

    pub fn with_params(mut self, params: Arc<dyn PlayParameterStore>) -> Self {
        self.params = params;
        self
    }

    pub fn with_clips(mut self, clips: Arc<dyn ClipLibrary>) -> Self {
        self.clips = clips;
        self
    }

    pub fn with_alignment(mut self, alignment: Arc<dyn Alignment>) -> Self {
        self.alignment = alignment;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shared state
// ═══════════════════════════════════════════════════════════════════════════════

/// State behind the coarse lock (control thread and fill task only)
pub(super) struct Orchestration {
    pub(super) mixer: ModelMixer,
    pub(super) models: BTreeMap<ModelId, ModelHandle>,
    /// Models already reported as running at a foreign rate
    mismatched: HashSet<ModelId>,
    pub(super) ranges: PlaybackRanges,
    pub(super) estimator: PositionEstimator,
    pub(super) play_started: Option<Instant>,
    /// Generation being filled ahead of publication (`None` once unified)
    pub(super) write_generation: Option<Shared<BufferGeneration>>,
    /// Playback frame the next fill starts at
    pub(super) write_fill: u64,
    pub(super) fill_buffer: ChannelBuffers,
    pub(super) chunks: Vec<FillChunk>,
    content_end: u64,
}

pub(super) struct SourceShared {
    pub(super) context: PlaybackContext,
    state: Mutex<Orchestration>,

    /// Generation the consumer reads from
    pub(super) read_generation: SharedCell<BufferGeneration>,
    pub(super) playing: AtomicBool,
    pub(super) exiting: AtomicBool,
    /// Set by `play` until the fill task publishes the fresh generation
    pub(super) generation_stale: AtomicBool,
    /// Playback frame the read generation has been filled up to
    pub(super) read_fill: AtomicU64,

    pub(super) source_rate: AtomicU32,
    pub(super) target_channels: AtomicUsize,

    // Reported by the consumer side
    epoch: Instant,
    last_pull_nanos: AtomicU64,
    last_block: AtomicUsize,
    device_rate: AtomicU32,
    device_channels: AtomicUsize,
    device_block: AtomicUsize,
    device_latency: AtomicUsize,
    stretch_ratio: AtomicU64,
    levels: Box<[AtomicU32]>,

    configured_ring_size: usize,
    start_guard_tolerance: Duration,

    channel_mismatch_logged: AtomicBool,
    underrun_logged: AtomicBool,

    wake_tx: Sender<WakeReason>,
    events_tx: Sender<PlaybackEvent>,
}

impl SourceShared {
    pub(super) fn lock_state(&self) -> MutexGuard<'_, Orchestration> {
        // A panic on another thread leaves the orchestration usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ring capacity per channel: `max(4 × device block, configured size)`
    pub(super) fn ring_size(&self) -> usize {
        (self.device_block.load(Ordering::Relaxed) * 4).max(self.configured_ring_size)
    }

    pub(super) fn wake(&self, reason: WakeReason) {
        // A full queue already guarantees a wake-up
        let _ = self.wake_tx.try_send(reason);
    }

    pub(super) fn emit(&self, event: PlaybackEvent) {
        match self.events_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::debug!("[PLAY] Event queue full, dropping {:?}", event);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Clear the play flag; returns whether playback was running
    pub(super) fn stop(&self) -> bool {
        let was_playing = self.playing.swap(false, Ordering::AcqRel);
        if was_playing {
            log::info!("[PLAY] Stopped");
            self.emit(PlaybackEvent::PlayStatusChanged(false));
            self.wake(WakeReason::StateChanged);
        }
        was_playing
    }

    /// Recompute the playable ranges from the models and the selection
    pub(super) fn rebuild_ranges(&self, state: &mut Orchestration) {
        let selection = &self.context.selection;
        state.content_end = state
            .models
            .values()
            .map(|h| h.model().end_frame())
            .max()
            .unwrap_or(0);
        state.ranges = PlaybackRanges::build(
            &selection.selections(),
            selection.play_selection_mode(),
            selection.play_loop_mode(),
            state.content_end,
            self.context.alignment.as_ref(),
        );
    }

    /// Start a fresh write generation at playback frame `frame`
    ///
    /// The consumer keeps reading the current read generation until the fill
    /// task publishes the new one.
    pub(super) fn reseed(&self, state: &mut Orchestration, frame: u64) {
        let channels = self
            .target_channels
            .load(Ordering::Acquire)
            .max(MIN_TARGET_CHANNELS);
        let generation = BufferGeneration::new(channels, self.ring_size());
        log::debug!(
            "[FILL] New write generation {} ({} ch × {}) at frame {}",
            generation.id(),
            channels,
            generation.capacity(),
            frame
        );
        state.write_generation = Some(Shared::new(&gc_handle(), generation));
        state.write_fill = frame;
        state.mixer.reset();
    }

    fn estimator_input(&self, state: &Orchestration) -> EstimatorInput {
        let buffered_frames = if self.generation_stale.load(Ordering::Acquire) {
            0
        } else {
            self.read_generation.get().read_space()
        };
        let last_pull = self.last_pull_nanos.load(Ordering::Acquire);
        let since_last_pull = if last_pull == 0 {
            Duration::ZERO
        } else {
            self.epoch
                .elapsed()
                .saturating_sub(Duration::from_nanos(last_pull))
        };

        EstimatorInput {
            buffered_to: self.read_fill.load(Ordering::Acquire),
            buffered_frames,
            last_block_frames: self.last_block.load(Ordering::Relaxed),
            device_latency_frames: self.device_latency.load(Ordering::Relaxed),
            device_rate: self.device_rate.load(Ordering::Relaxed),
            source_rate: self.source_rate.load(Ordering::Acquire),
            since_last_pull,
            since_play: state.play_started.map(|t| t.elapsed()).unwrap_or_default(),
            stretch_ratio: f64::from_bits(self.stretch_ratio.load(Ordering::Relaxed)),
        }
    }

    /// Estimate the audible playback frame
    pub(super) fn estimate(&self, state: &mut Orchestration) -> Estimate {
        let input = self.estimator_input(state);
        state.estimator.estimate(&input, &state.ranges)
    }

    /// Stop when non-looping playback has run off the end of fully loaded models
    pub(super) fn stop_if_finished(&self, state: &Orchestration, estimate: &Estimate) -> bool {
        if !estimate.reached_end || !self.playing.load(Ordering::Acquire) {
            return false;
        }
        if !state.models.values().all(|h| h.model().is_ready()) {
            return false;
        }
        log::info!("[PLAY] Reached end of content at frame {}", estimate.frame);
        self.stop()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Control handle
// ═══════════════════════════════════════════════════════════════════════════════

/// Control half of a playback source
///
/// # Example
///
/// ```ignore
/// let context = PlaybackContext::new(registry.clone(), selection.clone());
/// let (source, output) = PlaybackSource::new(context, &EngineConfig::default())?;
/// source.add_model(id)?;
/// // install `output` (wrapped in the processing chain) on the audio backend
/// source.play(0)?;
/// println!("at {}", source.current_playing_frame());
/// ```
pub struct PlaybackSource {
    shared: Arc<SourceShared>,
    events_rx: Receiver<PlaybackEvent>,
    fill_thread: Option<JoinHandle<()>>,
}

impl PlaybackSource {
    /// Create a source, its consumer half, and start the fill task
    pub fn new(
        context: PlaybackContext,
        config: &EngineConfig,
    ) -> EngineResult<(Self, PlaybackOutput)> {
        let (wake_tx, wake_rx) = channel::bounded(WAKE_QUEUE_CAPACITY);
        let (events_tx, events_rx) = channel::bounded(EVENT_QUEUE_CAPACITY);

        let ring_size = config.ring_buffer_size.max(PROCESSING_BLOCK_SIZE);
        let initial = BufferGeneration::new(MIN_TARGET_CHANNELS, ring_size);
        let mixer = ModelMixer::new(context.clips.clone(), context.params.clone());
        let tolerance = Duration::from_millis(config.start_guard_tolerance_ms);

        let shared = Arc::new(SourceShared {
            state: Mutex::new(Orchestration {
                mixer,
                models: BTreeMap::new(),
                mismatched: HashSet::new(),
                ranges: PlaybackRanges::default(),
                estimator: PositionEstimator::new(tolerance),
                play_started: None,
                write_generation: None,
                write_fill: 0,
                fill_buffer: ChannelBuffers::default(),
                chunks: Vec::with_capacity(16),
                content_end: 0,
            }),
            context,
            read_generation: SharedCell::new(Shared::new(&gc_handle(), initial)),
            playing: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            generation_stale: AtomicBool::new(false),
            read_fill: AtomicU64::new(0),
            source_rate: AtomicU32::new(0),
            target_channels: AtomicUsize::new(MIN_TARGET_CHANNELS),
            epoch: Instant::now(),
            last_pull_nanos: AtomicU64::new(0),
            last_block: AtomicUsize::new(0),
            device_rate: AtomicU32::new(0),
            device_channels: AtomicUsize::new(0),
            device_block: AtomicUsize::new(0),
            device_latency: AtomicUsize::new(0),
            stretch_ratio: AtomicU64::new(1.0f64.to_bits()),
            levels: (0..MAX_METERED_CHANNELS).map(|_| AtomicU32::new(0)).collect(),
            configured_ring_size: ring_size,
            start_guard_tolerance: tolerance,
            channel_mismatch_logged: AtomicBool::new(false),
            underrun_logged: AtomicBool::new(false),
            wake_tx,
            events_tx,
        });

        let fill_shared = shared.clone();
        let fill_thread = thread::Builder::new()
            .name("sonance-fill".to_string())
            .spawn(move || fill::run(fill_shared, wake_rx))
            .map_err(|source| EngineError::Spawn {
                name: "fill",
                source,
            })?;

        log::info!(
            "[PLAY] Playback source created (ring {} frames, guard {:?})",
            ring_size,
            tolerance
        );

        let output = PlaybackOutput {
            shared: shared.clone(),
        };
        Ok((
            Self {
                shared,
                events_rx,
                fill_thread: Some(fill_thread),
            },
            output,
        ))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Models
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a model from the store and resolve its playback role
    ///
    /// The first playable model fixes the source sample rate. Models at a
    /// different rate are still played (at the wrong speed) and reported
    /// once via [`PlaybackEvent::SampleRateMismatch`].
    pub fn add_model(&self, id: ModelId) -> EngineResult<RoleKind> {
        let handle = self
            .shared
            .context
            .models
            .model(id)
            .ok_or(EngineError::UnknownModel(id))?;
        if let ModelHandle::Other(_) = handle {
            log::warn!("[PLAY] {} is not playable ({})", id, handle.kind());
            return Err(EngineError::UnplayableModel {
                id,
                kind: handle.kind(),
            });
        }

        let model_rate = handle.model().sample_rate();
        let model_channels = handle.model().channel_count();

        let mut guard = self.shared.lock_state();
        let state = &mut *guard;

        let mut source_rate = self.shared.source_rate.load(Ordering::Acquire);
        if source_rate == 0 && model_rate > 0 {
            source_rate = model_rate;
            self.shared.source_rate.store(source_rate, Ordering::Release);
            log::info!("[PLAY] Source sample rate set to {} Hz by {}", source_rate, id);
        } else if model_rate != source_rate && state.mismatched.insert(id) {
            log::warn!(
                "[PLAY] {} runs at {} Hz, source runs at {} Hz; it will play at the wrong speed",
                id,
                model_rate,
                source_rate
            );
            self.shared.emit(PlaybackEvent::SampleRateMismatch {
                model: Some(id),
                requested: source_rate,
                available: model_rate,
            });
        }

        let current_channels = self.shared.target_channels.load(Ordering::Acquire);
        let wanted_channels = if matches!(handle, ModelHandle::Dense(_)) {
            model_channels.max(current_channels)
        } else {
            current_channels
        };
        state.mixer.set_target(wanted_channels, source_rate);

        let kind = state.mixer.add_model(id, &handle);
        if kind == RoleKind::Unsupported {
            state.mixer.remove_model(id);
            log::warn!("[PLAY] No playback role for {} ({})", id, handle.kind());
            return Err(EngineError::ClipNotFound {
                id,
                clip: self
                    .shared
                    .context
                    .params
                    .parameters(id)
                    .map(|p| p.clip_id())
                    .unwrap_or_default(),
            });
        }
        state.models.insert(id, handle);

        if wanted_channels > current_channels {
            self.shared
                .target_channels
                .store(wanted_channels, Ordering::Release);
            log::info!(
                "[PLAY] Channel count increased {} → {} by {}",
                current_channels,
                wanted_channels,
                id
            );
            self.shared
                .emit(PlaybackEvent::ChannelCountIncreased(wanted_channels));
        }

        self.shared.rebuild_ranges(state);
        drop(guard);

        self.shared.wake(WakeReason::StateChanged);
        Ok(kind)
    }

    /// Unregister a model; returns whether it was registered
    ///
    /// Removing the last model forgets the source sample rate and stops
    /// playback. The channel count never shrinks.
    pub fn remove_model(&self, id: ModelId) -> bool {
        let mut guard = self.shared.lock_state();
        let state = &mut *guard;
        let removed = state.models.remove(&id).is_some();
        state.mixer.remove_model(id);
        state.mismatched.remove(&id);
        if !removed {
            return false;
        }

        let now_empty = state.models.is_empty();
        if now_empty {
            self.shared.source_rate.store(0, Ordering::Release);
            state.mismatched.clear();
        }
        self.shared.rebuild_ranges(state);
        drop(guard);

        log::info!("[PLAY] Removed {}", id);
        if now_empty {
            self.shared.stop();
        }
        self.shared.wake(WakeReason::StateChanged);
        true
    }

    /// Unregister every model
    pub fn clear_models(&self) {
        for id in self.model_ids() {
            self.remove_model(id);
        }
    }

    /// Registered models in id order
    pub fn model_ids(&self) -> Vec<ModelId> {
        self.shared.lock_state().models.keys().copied().collect()
    }

    /// Role a registered model was given
    pub fn role(&self, id: ModelId) -> Option<RoleKind> {
        self.shared.lock_state().mixer.role(id)
    }

    /// Restrict playback to `solo` (`None` plays every unmuted model)
    pub fn set_solo_set(&self, solo: Option<HashSet<ModelId>>) {
        let mut guard = self.shared.lock_state();
        guard.mixer.set_solo(solo);
        self.refill_locked(&mut guard);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Change notifications
    // ─────────────────────────────────────────────────────────────────────────

    /// The selection set changed
    pub fn selection_changed(&self) {
        self.ranges_changed();
    }

    /// Play-selection mode was toggled
    pub fn play_selection_mode_changed(&self) {
        self.ranges_changed();
    }

    /// Loop mode was toggled
    pub fn play_loop_mode_changed(&self) {
        self.ranges_changed();
    }

    /// Mute, gain, pan or clip of some model changed
    ///
    /// Buffered audio was mixed with the old parameters; while playing it is
    /// re-rendered from the current position.
    pub fn parameters_changed(&self) {
        let mut guard = self.shared.lock_state();
        self.refill_locked(&mut guard);
    }

    fn ranges_changed(&self) {
        let mut guard = self.shared.lock_state();
        self.shared.rebuild_ranges(&mut guard);
        self.refill_locked(&mut guard);
    }

    /// Re-render buffered audio from the current position while playing
    fn refill_locked(&self, state: &mut Orchestration) {
        if !self.shared.playing.load(Ordering::Acquire) {
            return;
        }
        let estimate = self.shared.estimate(state);
        self.shared.reseed(state, estimate.frame);
        self.shared.wake(WakeReason::StateChanged);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    /// Start (or restart) playback at `start_frame` on the reference timeline
    ///
    /// The frame is clamped into the playable ranges: outside the selection
    /// (when constrained) or past the end of the content, playback starts at
    /// the first playable frame.
    pub fn play(&self, start_frame: u64) -> EngineResult<()> {
        if self.shared.source_rate.load(Ordering::Acquire) == 0 {
            log::warn!("[PLAY] play({}) ignored: no source sample rate", start_frame);
            return Err(EngineError::NoSampleRate);
        }

        let mut guard = self.shared.lock_state();
        let state = &mut *guard;
        self.shared.rebuild_ranges(state);

        let requested = self.shared.context.alignment.from_reference(start_frame);
        let frame = state.ranges.clamp_start(requested);

        // Consumer outputs silence until the fresh generation is published
        self.shared.generation_stale.store(true, Ordering::Release);
        self.shared.reseed(state, frame);
        self.shared.read_fill.store(frame, Ordering::Release);
        state.estimator.start(frame, &state.ranges);
        state.play_started = Some(Instant::now());
        drop(guard);

        let was_playing = self.shared.playing.swap(true, Ordering::AcqRel);
        log::info!(
            "[PLAY] Playing from frame {} (requested {})",
            frame,
            start_frame
        );
        if !was_playing {
            self.shared.emit(PlaybackEvent::PlayStatusChanged(true));
        }
        self.shared.wake(WakeReason::StateChanged);
        Ok(())
    }

    /// Stop playback (idempotent)
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::Acquire)
    }

    pub fn play_state(&self) -> PlayState {
        if self.is_playing() {
            PlayState::Playing
        } else {
            PlayState::Stopped
        }
    }

    /// Frame currently audible, on the reference timeline
    ///
    /// While stopped this is the last reported frame. Non-looping playback
    /// that has run past the end of fully loaded models is stopped here.
    pub fn current_playing_frame(&self) -> u64 {
        let mut guard = self.shared.lock_state();
        let state = &mut *guard;
        let alignment = self.shared.context.alignment.clone();

        if !self.shared.playing.load(Ordering::Acquire) {
            return state
                .estimator
                .last_reported()
                .map(|f| alignment.to_reference(f))
                .unwrap_or(0);
        }

        let estimate = self.shared.estimate(state);
        self.shared.stop_if_finished(state, &estimate);
        alignment.to_reference(estimate.frame)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Channels the engine renders (at least 2, never shrinks)
    pub fn target_channel_count(&self) -> usize {
        self.shared.target_channels.load(Ordering::Acquire)
    }

    /// Rate of the first playable model (0 until one is registered)
    pub fn source_sample_rate(&self) -> u32 {
        self.shared.source_rate.load(Ordering::Acquire)
    }

    /// Rate the device reported (0 until the output is configured)
    pub fn device_sample_rate(&self) -> u32 {
        self.shared.device_rate.load(Ordering::Relaxed)
    }

    /// Channels the device reported (0 until the output is configured)
    pub fn device_channel_count(&self) -> usize {
        self.shared.device_channels.load(Ordering::Relaxed)
    }

    /// Effective ring capacity per channel
    pub fn ring_buffer_size(&self) -> usize {
        self.shared.ring_size()
    }

    pub fn start_guard_tolerance(&self) -> Duration {
        self.shared.start_guard_tolerance
    }

    /// One past the last frame of any registered model
    pub fn content_end_frame(&self) -> u64 {
        self.shared.lock_state().content_end
    }

    /// Current playback ranges (playback timeline)
    pub fn playback_ranges(&self) -> PlaybackRanges {
        self.shared.lock_state().ranges.clone()
    }

    /// Whether every registered model has finished loading
    pub fn is_ready(&self) -> bool {
        self.shared
            .lock_state()
            .models
            .values()
            .all(|h| h.model().is_ready())
    }

    /// Peak level per output channel since the last call
    ///
    /// Reading resets the meters.
    pub fn output_levels(&self) -> Vec<Sample> {
        let channels = self
            .shared
            .device_channels
            .load(Ordering::Relaxed)
            .max(self.target_channel_count())
            .min(MAX_METERED_CHANNELS);
        self.shared.levels[..channels]
            .iter()
            .map(|level| f32::from_bits(level.swap(0, Ordering::AcqRel)))
            .collect()
    }

    /// Receiver for playback notifications (cloneable)
    pub fn events(&self) -> Receiver<PlaybackEvent> {
        self.events_rx.clone()
    }

    /// Sender for other stages reporting on the same channel (see [`build_chain`](crate::chain::build_chain))
    pub fn event_sender(&self) -> Sender<PlaybackEvent> {
        self.shared.events_tx.clone()
    }
}

impl Drop for PlaybackSource {
    fn drop(&mut self) {
        self.shared.exiting.store(true, Ordering::Release);
        self.shared.playing.store(false, Ordering::Release);
        // Blocking send: the fill task must see the exit even if the queue is full
        let _ = self
            .shared
            .wake_tx
            .send_timeout(WakeReason::Exiting, Duration::from_millis(100));
        if let Some(handle) = self.fill_thread.take() {
            if handle.join().is_err() {
                log::error!("[FILL] Fill task panicked");
            }
        }
        log::debug!("[PLAY] Playback source dropped");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Consumer
// ═══════════════════════════════════════════════════════════════════════════════

/// Consumer half of a playback source, the innermost stage of the chain
///
/// `pull_samples` is real-time safe: no locks, no allocation, no blocking.
pub struct PlaybackOutput {
    shared: Arc<SourceShared>,
}

impl PlaybackOutput {
    fn silence(buffers: &mut ChannelBuffers, frames: usize) {
        for channel in buffers.channels_mut() {
            let end = frames.min(channel.len());
            channel[..end].fill(0.0);
        }
    }

    fn record_pull(&self, frames: usize) {
        let shared = &self.shared;
        let now = shared.epoch.elapsed().as_nanos() as u64;
        // 0 means "never pulled"
        shared.last_pull_nanos.store(now.max(1), Ordering::Release);
        shared.last_block.store(frames, Ordering::Relaxed);
    }
}

impl SampleSource for PlaybackOutput {
    fn pull_samples(&mut self, buffers: &mut ChannelBuffers, frame_count: usize) -> usize {
        let shared = &self.shared;
        let frames = frame_count.min(buffers.len());

        if !shared.playing.load(Ordering::Acquire) {
            Self::silence(buffers, frames);
            return 0;
        }
        if shared.generation_stale.load(Ordering::Acquire) {
            Self::silence(buffers, frames);
            self.record_pull(0);
            shared.wake(WakeReason::BufferConsumed);
            return frames;
        }

        let generation = shared.read_generation.get();
        let available_channels = generation.channel_count();
        let requested_channels = buffers.channel_count();

        if requested_channels < available_channels {
            if !shared.channel_mismatch_logged.swap(true, Ordering::Relaxed) {
                log::warn!(
                    "[PLAY] Output has {} channels, engine renders {}; outputting silence",
                    requested_channels,
                    available_channels
                );
            }
            Self::silence(buffers, frames);
            return 0;
        }

        // Read the same count from every ring so channels stay aligned
        let readable = generation.read_space().min(frames);
        for c in 0..available_channels {
            let channel = &mut buffers[c];
            let read = generation.ring(c).read(&mut channel[..readable]);
            channel[read..frames].fill(0.0);
        }
        for c in available_channels..requested_channels {
            let (sources, rest) = buffers.channels_mut().split_at_mut(c);
            rest[0][..frames].copy_from_slice(&sources[c % available_channels][..frames]);
        }

        if readable < frames {
            if !shared.underrun_logged.swap(true, Ordering::Relaxed) {
                log::debug!(
                    "[PLAY] Buffer underrun: {} of {} frames available",
                    readable,
                    frames
                );
            }
        } else {
            shared.underrun_logged.store(false, Ordering::Relaxed);
        }

        self.record_pull(frames);
        shared.wake(WakeReason::BufferConsumed);
        frames
    }

    fn set_channel_count(&mut self, channels: usize) {
        self.shared.device_channels.store(channels, Ordering::Relaxed);
        self.shared
            .channel_mismatch_logged
            .store(false, Ordering::Relaxed);
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        let shared = &self.shared;
        let previous = shared.device_rate.swap(sample_rate, Ordering::Relaxed);
        let source_rate = shared.source_rate.load(Ordering::Acquire);
        if previous != sample_rate && source_rate != 0 && source_rate != sample_rate {
            log::warn!(
                "[PLAY] Device runs at {} Hz, source at {} Hz",
                sample_rate,
                source_rate
            );
            shared.emit(PlaybackEvent::SampleRateMismatch {
                model: None,
                requested: source_rate,
                available: sample_rate,
            });
        }
    }

    fn set_block_size(&mut self, frames: usize) {
        let previous = self.shared.device_block.swap(frames, Ordering::Relaxed);
        if previous != frames {
            // The fill task resizes the rings if the capacity has to grow
            self.shared.wake(WakeReason::StateChanged);
        }
    }

    fn set_latency(&mut self, frames: usize) {
        self.shared.device_latency.store(frames, Ordering::Relaxed);
    }

    fn set_output_levels(&mut self, peaks: &[Sample]) {
        // Non-negative floats order like their bit patterns
        for (level, peak) in self.shared.levels.iter().zip(peaks) {
            level.fetch_max(peak.abs().to_bits(), Ordering::AcqRel);
        }
    }

    fn set_stretch_ratio_hint(&mut self, ratio: f64) {
        self.shared
            .stretch_ratio
            .store(ratio.to_bits(), Ordering::Relaxed);
    }

    fn name(&self) -> &'static str {
        "playback"
    }
}
