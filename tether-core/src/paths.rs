//! On-disk layout.
//!
//! ```text
//! ~/.tether/
//!   config.yaml        (optional; defaults apply when absent)
//!   run/
//!     <name>.json      (one snapshot file per persisted state)
//! ```

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const TETHER_DIR: &str = ".tether";
pub const CONFIG_FILE: &str = "config.yaml";
pub const RUN_DIR: &str = "run";
pub const STATE_EXTENSION: &str = "json";

pub fn tether_root(home: &Path) -> PathBuf {
    home.join(TETHER_DIR)
}

pub fn config_path(home: &Path) -> PathBuf {
    tether_root(home).join(CONFIG_FILE)
}

pub fn run_dir(home: &Path) -> PathBuf {
    tether_root(home).join(RUN_DIR)
}

/// `<home>/.tether/run/<name>.json` (pure).
pub fn state_path(home: &Path, name: &str) -> PathBuf {
    run_dir(home).join(format!("{name}.{STATE_EXTENSION}"))
}

/// Resolve the user's home directory.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}
