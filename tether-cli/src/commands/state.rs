//! `tether state` — persist, print, or remove a named state snapshot.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use tether_core::{config, paths};
use tether_streams::DurableFileQueue;

#[derive(Subcommand, Debug)]
pub enum StateCommand {
    /// Replace the snapshot `<name>` with `<content>` (must be JSON).
    Write {
        name: String,
        content: String,
    },

    /// Print the persisted snapshot `<name>`.
    Show { name: String },

    /// Delete the snapshot `<name>`; a missing snapshot is not an error.
    Remove { name: String },
}

pub fn run(home: &Path, command: StateCommand) -> Result<()> {
    match command {
        StateCommand::Write { name, content } => write(home, &name, content),
        StateCommand::Show { name } => show(home, &name),
        StateCommand::Remove { name } => remove(home, &name),
    }
}

fn write(home: &Path, name: &str, content: String) -> Result<()> {
    validate_name(name)?;
    serde_json::from_str::<serde_json::Value>(&content)
        .with_context(|| format!("state '{name}' is not valid JSON"))?;

    let config = config::load_at(home).context("failed to load config")?;
    let path = paths::state_path(home, name);

    super::runtime()?.block_on(async {
        let queue = DurableFileQueue::with_config(&path, &config.queue);
        queue.open().await?;
        queue.write(content)?;
        queue.drain().await?;
        queue.close().await
    })
    .with_context(|| format!("failed to persist state '{name}'"))?;

    tracing::info!(name, path = %path.display(), "state written");
    println!("Wrote {}", path.display());
    Ok(())
}

fn show(home: &Path, name: &str) -> Result<()> {
    validate_name(name)?;
    let path = paths::state_path(home, name);
    if !path.exists() {
        bail!("no state recorded for '{name}'");
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    println!("{content}");
    Ok(())
}

fn remove(home: &Path, name: &str) -> Result<()> {
    validate_name(name)?;
    let config = config::load_at(home).context("failed to load config")?;
    let path = paths::state_path(home, name);
    let existed = path.exists();

    super::runtime()?
        .block_on(async {
            DurableFileQueue::with_config(&path, &config.queue)
                .remove()
                .await
        })
        .with_context(|| format!("failed to remove state '{name}'"))?;

    if existed {
        println!("Removed {}", path.display());
    } else {
        println!("No state recorded for '{name}'");
    }
    Ok(())
}

/// Names become file stems under `run/`, so they may not escape it.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        bail!("invalid state name '{name}'");
    }
    Ok(())
}
