pub mod config;
pub mod frame;
pub mod state;

use anyhow::{Context, Result};

/// Single-threaded runtime; each command drives one primitive at a time.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")
}
