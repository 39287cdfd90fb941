//! Audio output
//!
//! The device side of the engine: a backend opens an output stream and
//! drives the outermost [`SampleSource`](crate::chain::SampleSource) from its
//! callback through an [`OutputCallback`].
//!
//! - **CPAL** (feature `cpal-backend`, on by default): ALSA/PipeWire/JACK on
//!   Linux, WASAPI on Windows, CoreAudio on macOS
//!
//! # Example Usage
//!
//! ```ignore
//! use sonance_core::audio::{start_output, AudioConfig};
//!
//! let handle = start_output(&AudioConfig::default(), chain.source)?;
//! println!("{} Hz, {:.1} ms", handle.sample_rate(), handle.latency_ms());
//! ```

mod callback;
mod config;
mod error;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;
#[cfg(feature = "cpal-backend")]
mod device;

pub use callback::OutputCallback;
pub use config::{
    AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE,
    LOW_LATENCY_BUFFER_SIZES,
};
pub use error::{AudioError, AudioResult};

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::{start_output, AudioHandle};
#[cfg(feature = "cpal-backend")]
pub use device::{get_output_devices, AudioDevice};
