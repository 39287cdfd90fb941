//! Sample buffering between the fill task and the hardware callback
//!
//! - [`SampleRing`]: lock-free single-producer/single-consumer ring, one per channel
//! - [`BufferGeneration`]: a full set of rings that is swapped as a unit

mod generation;
mod ring;

pub use generation::BufferGeneration;
pub use ring::SampleRing;
