//! Deferred reclamation for buffers the audio thread may still hold
//!
//! The consumer takes a reference-counted pointer to the published buffer
//! generation for every pull. When the fill task publishes a new generation,
//! the old one must not be freed on the audio thread (freeing half a megabyte
//! per channel is a syscall away from an xrun). `basedrop` solves this: the
//! last `Shared<T>` to drop only enqueues the allocation, and the collector
//! thread started here frees it.
//!
//! The same handle is used for stretchers and effects handed to the
//! processing chain through its command queues.
//!
//! ```ignore
//! use basedrop::Shared;
//! use crate::engine::gc::gc_handle;
//!
//! let generation = Shared::new(&gc_handle(), BufferGeneration::new(2, 131071));
//! let reader = generation.clone();
//! drop(generation);
//! drop(reader); // queued, freed on the collector thread
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Interval between collection sweeps
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("sonance-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives and dies on this thread
            let mut collector = Collector::new();
            tx.send(collector.handle())
                .expect("Failed to send GC handle");

            log::info!("[GC] Reclamation thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn reclamation thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle for creating `Shared<T>` / `Owned<T>` allocations reclaimed off the audio thread
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::{Shared, SharedCell};

    #[test]
    fn test_shared_cell_swap_keeps_reader_alive() {
        let handle = gc_handle();
        let cell = SharedCell::new(Shared::new(&handle, vec![1.0f32; 4]));

        let reader = cell.get();
        cell.set(Shared::new(&handle, vec![2.0f32; 4]));

        // The old value stays valid for the reader that still holds it
        assert_eq!(reader[0], 1.0);
        assert_eq!(cell.get()[0], 2.0);
    }
}
