//! Tether — operator surface over the supervisor I/O primitives.
//!
//! # Usage
//!
//! ```text
//! tether state write <name> <content>
//! tether state show <name>
//! tether state remove <name>
//! tether frame [--hold]
//! tether config [--init]
//! ```
//!
//! Every command accepts `--home <dir>` (or `TETHER_HOME`) in place of the
//! user's home directory. Logs go to stderr, filtered by `RUST_LOG`.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{config::ConfigArgs, frame::FrameArgs, state::StateCommand};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Persist supervisor state and frame JSON message streams",
    long_about = None,
)]
struct Cli {
    /// Directory holding `.tether/` (defaults to the home directory).
    #[arg(long, global = true, env = "TETHER_HOME")]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write, show, or remove a persisted state snapshot.
    State {
        #[command(subcommand)]
        command: StateCommand,
    },

    /// Re-frame newline-delimited JSON from stdin onto stdout.
    Frame(FrameArgs),

    /// Print the effective configuration.
    Config(ConfigArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let home = match cli.home {
        Some(home) => home,
        None => dirs::home_dir().context("could not determine home directory")?,
    };

    match cli.command {
        Commands::State { command } => commands::state::run(&home, command),
        Commands::Frame(args) => args.run(&home),
        Commands::Config(args) => args.run(&home),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
