use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error surface of [`crate::Relay`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("stream not open")]
    Closed,
}

/// Error surface of [`crate::MessageChannel`].
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The outbound message has no JSON representation.
    #[error("message cannot be encoded as JSON: {0}")]
    Serialization(#[source] serde_json::Error),

    /// An inbound line is not a JSON value. The line has already been consumed.
    #[error("invalid JSON line {line:?}: {source}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Filesystem operation a [`QueueError`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOp {
    Open,
    Replace,
    Close,
    Unlink,
}

impl fmt::Display for QueueOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QueueOp::Open => "open",
            QueueOp::Replace => "replace",
            QueueOp::Close => "close",
            QueueOp::Unlink => "unlink",
        };
        f.write_str(label)
    }
}

/// Error surface of [`crate::DurableFileQueue`].
///
/// Cloneable so a single failure can be reported to every drain waiter.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("{op} failed at {path}: {source}")]
    Io {
        path: PathBuf,
        op: QueueOp,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("{op} at {path} timed out after {after:?}")]
    TimedOut {
        path: PathBuf,
        op: QueueOp,
        after: Duration,
    },

    #[error("snapshots are pending but {path} is not open")]
    NotOpen { path: PathBuf },

    #[error("file queue worker has stopped")]
    WorkerGone,
}

impl QueueError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            QueueError::Io { .. } => "queue_io",
            QueueError::TimedOut { .. } => "queue_timed_out",
            QueueError::NotOpen { .. } => "queue_not_open",
            QueueError::WorkerGone => "queue_worker_gone",
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, op: QueueOp, source: std::io::Error) -> QueueError {
    QueueError::Io {
        path: path.into(),
        op,
        source: Arc::new(source),
    }
}
