//! Configuration for the playback engine and its front-ends
//!
//! - Generic YAML config loading/saving
//! - Standard config file locations
//! - [`EngineConfig`]: options fixed when a [`PlaybackSource`](crate::engine::PlaybackSource) is built
//!
//! # Usage
//!
//! ```ignore
//! use sonance_core::config::{default_config_path, load_config, save_config, EngineConfig};
//!
//! let path = default_config_path("engine.yaml");
//! let config: EngineConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod engine;
mod io;
mod paths;

pub use engine::EngineConfig;
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
