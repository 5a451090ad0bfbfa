//! `tether config` — print the effective configuration.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tether_core::{config, paths};

/// Arguments for `tether config`.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Write the effective configuration to `config.yaml` if none exists yet.
    #[arg(long)]
    pub init: bool,
}

impl ConfigArgs {
    pub fn run(self, home: &Path) -> Result<()> {
        let config = config::load_at(home).context("failed to load config")?;

        if self.init {
            let path = paths::config_path(home);
            if path.exists() {
                eprintln!("{} already exists, leaving it untouched", path.display());
            } else {
                let written = config::save_at(home, &config).context("failed to write config")?;
                eprintln!("Wrote {}", written.display());
            }
        }

        let yaml = serde_yaml::to_string(&config).context("failed to render config")?;
        print!("{yaml}");
        Ok(())
    }
}
