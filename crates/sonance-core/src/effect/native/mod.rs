//! Native Rust effects
//!
//! Implemented directly in Rust, zero latency, any channel count.

mod delay;
mod gain;

pub use delay::DelayEffect;
pub use gain::GainEffect;
