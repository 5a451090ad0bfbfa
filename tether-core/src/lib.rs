//! Tether core library — configuration model, on-disk layout, errors.
//!
//! Public API surface:
//! - [`config`] — [`TetherConfig`] and its per-primitive sections
//! - [`paths`] — where tether keeps its config and state files
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod error;
pub mod paths;

pub use config::{
    ChannelConfig, ParseErrorPolicy, QueueConfig, RelayConfig, RetryConfig, TetherConfig,
    WriteFailurePolicy,
};
pub use error::ConfigError;
