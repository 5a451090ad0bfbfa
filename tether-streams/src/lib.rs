//! I/O primitives shared by a supervising process and its supervised child.
//!
//! - [`relay`] — [`Relay`], a pass-through that buffers while paused.
//! - [`channel`] — [`MessageChannel`], newline-delimited JSON over a byte stream pair.
//! - [`file_queue`] — [`DurableFileQueue`], serialized full-snapshot writes to one file.

pub mod channel;
mod error;
pub mod file_queue;
pub mod relay;

pub use channel::{ChannelEvent, LineDecoder, MessageChannel};
pub use error::{ChannelError, QueueError, QueueOp, RelayError};
pub use file_queue::{DurableFileQueue, FsBackend, QueueStatus, SnapshotBackend};
pub use relay::{Relay, RelayEvent, WriteOutcome};
