//! Fill task
//!
//! Background thread that keeps the rings ahead of the consumer. Each cycle:
//!
//! 1. Make sure the generation being written has enough channels and capacity
//!    (a channel-count increase or a larger device block forces a new one).
//! 2. Plan the free space (rounded down to whole processing blocks) over the
//!    playback ranges, mix every model into the fill buffer chunk by chunk,
//!    and write the result to the rings.
//! 3. Publish a pending write generation once it holds enough lookahead.
//! 4. Stop non-looping playback that has run off the end.
//!
//! The task sleeps on the wake channel between cycles. The consumer wakes it
//! after every pull; the timeout is a tenth of the ring duration while
//! playing and the whole ring duration otherwise.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use basedrop::Shared;
use crossbeam::channel::{Receiver, RecvTimeoutError};

use super::events::WakeReason;
use super::model_mixer::MixTarget;
use super::source::{Orchestration, SourceShared};
use crate::buffer::BufferGeneration;
use crate::types::{ChannelBuffers, PROCESSING_BLOCK_SIZE};

/// Lookahead a write generation needs before it replaces the read generation
pub const PUBLISH_LOOKAHEAD_FRAMES: usize = 2 * PROCESSING_BLOCK_SIZE;

/// Wait used before any model has fixed the source rate
const IDLE_TIMEOUT: Duration = Duration::from_millis(100);

pub(super) fn run(shared: Arc<SourceShared>, wake_rx: Receiver<WakeReason>) {
    log::info!("[FILL] Fill task started");

    loop {
        if shared.exiting.load(Ordering::Acquire) {
            break;
        }

        cycle(&shared);

        match wake_rx.recv_timeout(wait_timeout(&shared)) {
            Ok(WakeReason::Exiting) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(_) | Err(RecvTimeoutError::Timeout) => {}
        }
        // Wakes queued meanwhile are covered by the next cycle
        if wake_rx.try_iter().any(|reason| reason == WakeReason::Exiting) {
            break;
        }
    }

    log::info!("[FILL] Fill task exiting");
}

fn wait_timeout(shared: &SourceShared) -> Duration {
    let rate = shared.source_rate.load(Ordering::Acquire);
    if rate == 0 {
        return IDLE_TIMEOUT;
    }
    let ring = Duration::from_secs_f64(shared.ring_size() as f64 / rate as f64);
    if shared.playing.load(Ordering::Acquire) {
        ring / 10
    } else {
        ring
    }
}

fn cycle(shared: &SourceShared) {
    if !shared.playing.load(Ordering::Acquire) || shared.source_rate.load(Ordering::Acquire) == 0 {
        return;
    }

    let mut guard = shared.lock_state();
    let state = &mut *guard;

    ensure_generation_shape(shared, state);

    let generation = match &state.write_generation {
        Some(pending) => pending.clone(),
        None => shared.read_generation.get(),
    };
    let unified = state.write_generation.is_none();

    let space = generation.write_space() / PROCESSING_BLOCK_SIZE * PROCESSING_BLOCK_SIZE;
    if space > 0 {
        fill_generation(state, &generation, space);
        if unified {
            shared.read_fill.store(state.write_fill, Ordering::Release);
        }
    }

    if unified {
        let estimate = shared.estimate(state);
        shared.stop_if_finished(state, &estimate);
    } else {
        publish_if_ready(shared, state, &generation);
    }
}

/// Replace the generation being written if it is too small for the current
/// channel count or ring size
fn ensure_generation_shape(shared: &SourceShared, state: &mut Orchestration) {
    let (channels, capacity) = match &state.write_generation {
        Some(pending) => (pending.channel_count(), pending.capacity()),
        None => {
            let current = shared.read_generation.get();
            (current.channel_count(), current.capacity())
        }
    };
    let wanted_channels = shared.target_channels.load(Ordering::Acquire);
    let wanted_capacity = shared.ring_size();
    if channels >= wanted_channels && capacity >= wanted_capacity {
        return;
    }

    let frame = if shared.generation_stale.load(Ordering::Acquire) {
        // Nothing of the pending start has been heard yet
        shared.read_fill.load(Ordering::Acquire)
    } else {
        shared.estimate(state).frame
    };
    log::info!(
        "[FILL] Rebuilding buffers: {} → {} channels, {} → {} frames",
        channels,
        wanted_channels,
        capacity,
        wanted_capacity
    );
    shared.reseed(state, frame);
}

/// Mix `space` frames from the fill cursor and write them to `generation`
fn fill_generation(state: &mut Orchestration, generation: &BufferGeneration, space: usize) {
    let channels = generation.channel_count();
    if state.fill_buffer.channel_count() != channels || state.fill_buffer.capacity() < space {
        state.fill_buffer = ChannelBuffers::with_capacity(channels, generation.capacity());
    }
    state.fill_buffer.set_len_from_capacity(space);
    state.fill_buffer.fill_silence();

    let next = state.ranges.plan(state.write_fill, space, &mut state.chunks);

    let mut offset = 0;
    for chunk in &state.chunks {
        if !chunk.silent {
            let mut target = MixTarget::new(&mut state.fill_buffer, offset);
            for &id in state.models.keys() {
                state.mixer.mix_model(
                    id,
                    chunk.start,
                    chunk.frames,
                    &mut target,
                    chunk.fade_in,
                    chunk.fade_out,
                );
            }
        }
        offset += chunk.frames;
    }

    let written = generation.write_frames(state.fill_buffer.channels(), space);
    if written < space {
        log::warn!("[FILL] Ring overrun: wrote {} of {} frames", written, space);
    }
    log::trace!(
        "[FILL] {} frames from {} ({} chunks), next {}",
        space,
        state.write_fill,
        state.chunks.len(),
        next
    );
    state.write_fill = next;
}

/// Publish the write generation once it is far enough ahead (or the content
/// ends before it could be)
fn publish_if_ready(
    shared: &SourceShared,
    state: &mut Orchestration,
    generation: &Shared<BufferGeneration>,
) {
    let lookahead = generation.read_space();
    let near_end = !state.ranges.is_looping()
        && state.ranges.last_end().map_or(true, |end| {
            end.saturating_sub(state.write_fill) <= PUBLISH_LOOKAHEAD_FRAMES as u64
        });
    if lookahead < PUBLISH_LOOKAHEAD_FRAMES && !near_end {
        return;
    }

    shared.read_generation.set(generation.clone());
    shared.read_fill.store(state.write_fill, Ordering::Release);
    shared.generation_stale.store(false, Ordering::Release);
    state.write_generation = None;

    log::debug!(
        "[FILL] Published generation {} ({} frames ahead, filled to {})",
        generation.id(),
        lookahead,
        state.write_fill
    );
}
