//! Standard locations for configuration files

use std::path::PathBuf;

/// Per-user config directory
///
/// Returns: `{config_dir}/sonance` (e.g. `~/.config/sonance` on Linux), or
/// `./sonance` when the platform reports no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sonance")
}

/// Default path of a config file
///
/// # Arguments
/// * `filename` - Config file name (e.g. "engine.yaml", "play.yaml")
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_ends_with_sonance() {
        assert!(default_config_dir().ends_with("sonance"));
    }

    #[test]
    fn test_config_path_includes_filename() {
        let path = default_config_path("test.yaml");
        assert!(path.ends_with("sonance/test.yaml"));
    }
}
