//! Durable single-writer snapshot file.
//!
//! [`DurableFileQueue`] persists the latest snapshot of some state (a PID
//! record, typically) by replacing the whole file for every write. Writes are
//! queued and applied strictly one at a time, in call order, so the file is
//! never torn and two writes never race.
//!
//! ## Architecture
//! ```text
//! DurableFileQueue (cloneable handle)
//!   write/open/close/remove/drain ──► [unbounded mpsc] ──► worker task
//!                                                          ├─ handle: Option<B::Handle>
//!                                                          ├─ pending: VecDeque<snapshot>
//!                                                          └─ drain loop: replace() × N
//!   status() ◄── [watch] ◄────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - The worker owns the file handle and the queue; nothing else touches them.
//! - At most one `replace` is in flight. Commands that arrive meanwhile are
//!   applied between two writes.
//! - Snapshots queued while no handle is open stay queued until [`DurableFileQueue::open`].
//! - A failed write is handled per [`WriteFailurePolicy`]: dropped and
//!   reported to drain waiters, or requeued at the head with backoff.

use std::collections::VecDeque;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};

use tether_core::{QueueConfig, WriteFailurePolicy};

use crate::error::{io_err, QueueError, QueueOp};

// ---------------------------------------------------------------------------
// Storage backend
// ---------------------------------------------------------------------------

/// Filesystem operations the queue needs, one call per operation.
#[async_trait]
pub trait SnapshotBackend: Send + Sync + 'static {
    type Handle: Send + 'static;

    /// Open `path` for writing, creating it if absent and truncating it.
    async fn open(&self, path: &Path) -> io::Result<Self::Handle>;

    /// Replace the whole file content with `content` (truncate, then write at 0).
    async fn replace(&self, handle: &mut Self::Handle, content: &[u8]) -> io::Result<()>;

    async fn close(&self, handle: Self::Handle) -> io::Result<()>;

    async fn unlink(&self, path: &Path) -> io::Result<()>;
}

/// [`SnapshotBackend`] on top of `tokio::fs`.
#[derive(Debug, Clone)]
pub struct FsBackend {
    fsync: bool,
}

impl FsBackend {
    pub fn new(fsync: bool) -> Self {
        Self { fsync }
    }
}

impl Default for FsBackend {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl SnapshotBackend for FsBackend {
    type Handle = tokio::fs::File;

    async fn open(&self, path: &Path) -> io::Result<Self::Handle> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await
    }

    async fn replace(&self, file: &mut Self::Handle, content: &[u8]) -> io::Result<()> {
        file.set_len(0).await?;
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(content).await?;
        file.flush().await?;
        if self.fsync {
            file.sync_data().await?;
        }
        Ok(())
    }

    async fn close(&self, mut file: Self::Handle) -> io::Result<()> {
        file.flush().await?;
        if self.fsync {
            file.sync_all().await?;
        }
        Ok(())
    }

    async fn unlink(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Observable worker state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStatus {
    /// A file handle is held.
    pub open: bool,
    /// The drain loop is running.
    pub draining: bool,
    /// Snapshots not yet written, the one in flight excluded.
    pub pending: usize,
}

type Reply = oneshot::Sender<Result<(), QueueError>>;

enum Command {
    Write(Vec<u8>),
    Open(Reply),
    Close(Reply),
    Remove(Reply),
    Drain(Reply),
}

/// Cloneable handle to a snapshot file worker.
#[derive(Clone)]
pub struct DurableFileQueue {
    path: PathBuf,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<QueueStatus>,
}

impl DurableFileQueue {
    /// Queue for `path` on the local filesystem with default settings.
    ///
    /// Must be called inside a tokio runtime. Nothing touches the disk until
    /// [`DurableFileQueue::open`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_config(path, &QueueConfig::default())
    }

    pub fn with_config(path: impl Into<PathBuf>, config: &QueueConfig) -> Self {
        Self::with_backend(path, FsBackend::new(config.fsync), config)
    }

    pub fn with_backend<B: SnapshotBackend>(
        path: impl Into<PathBuf>,
        backend: B,
        config: &QueueConfig,
    ) -> Self {
        let path = path.into();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(QueueStatus::default());

        let worker = Worker {
            path: path.clone(),
            backend,
            config: config.clone(),
            handle: None,
            pending: VecDeque::new(),
            draining: false,
            waiters: Vec::new(),
            failure: None,
            commands: commands_rx,
            status: status_tx,
        };
        tokio::spawn(worker.run());

        Self {
            path,
            commands: commands_tx,
            status: status_rx,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> QueueStatus {
        *self.status.borrow()
    }

    /// Queue a full snapshot. Returns without waiting for the disk.
    ///
    /// Written as soon as a handle is open; otherwise kept until [`Self::open`].
    pub fn write(&self, content: impl Into<Vec<u8>>) -> Result<(), QueueError> {
        self.commands
            .send(Command::Write(content.into()))
            .map_err(|_| QueueError::WorkerGone)
    }

    /// Wait until every queued snapshot has been handled.
    ///
    /// Never starts a second drain loop; concurrent callers all wait for the
    /// running one.
    ///
    /// # Errors
    /// - [`QueueError::NotOpen`] if snapshots are pending and no handle is open,
    ///   or the handle was closed before the queue emptied.
    /// - The first write failure of the loop, when the failed snapshot was dropped.
    pub async fn drain(&self) -> Result<(), QueueError> {
        self.request(Command::Drain).await
    }

    /// Open (create, truncate) the file. No-op if already open.
    pub async fn open(&self) -> Result<(), QueueError> {
        self.request(Command::Open).await
    }

    /// Close the handle. Queued snapshots are kept for the next [`Self::open`].
    pub async fn close(&self) -> Result<(), QueueError> {
        self.request(Command::Close).await
    }

    /// Close the handle if open, then delete the file.
    ///
    /// The handle is released even if closing it fails. A file that is
    /// already gone counts as removed.
    pub async fn remove(&self) -> Result<(), QueueError> {
        self.request(Command::Remove).await
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), QueueError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| QueueError::WorkerGone)?;
        rx.await.map_err(|_| QueueError::WorkerGone)?
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Snapshot {
    content: Vec<u8>,
    failed_attempts: u32,
}

struct Worker<B: SnapshotBackend> {
    path: PathBuf,
    backend: B,
    config: QueueConfig,
    handle: Option<B::Handle>,
    pending: VecDeque<Snapshot>,
    draining: bool,
    waiters: Vec<Reply>,
    // First dropped-snapshot failure of the current drain loop.
    failure: Option<QueueError>,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<QueueStatus>,
}

impl<B: SnapshotBackend> Worker<B> {
    async fn run(mut self) {
        loop {
            // Apply whatever arrived while the previous write was in flight.
            while let Ok(command) = self.commands.try_recv() {
                self.apply(command).await;
            }

            if self.handle.is_some() && !self.pending.is_empty() {
                self.write_next().await;
                continue;
            }

            self.settle();
            match self.commands.recv().await {
                Some(command) => self.apply(command).await,
                None => break,
            }
        }
        self.shutdown().await;
    }

    async fn apply(&mut self, command: Command) {
        match command {
            Command::Write(content) => {
                self.pending.push_back(Snapshot {
                    content,
                    failed_attempts: 0,
                });
                self.publish();
            }
            Command::Open(reply) => {
                let _ = reply.send(self.open().await);
            }
            Command::Close(reply) => {
                let result = match self.handle.take() {
                    Some(handle) => self.close_handle(handle).await,
                    None => Ok(()),
                };
                let _ = reply.send(result);
            }
            Command::Remove(reply) => {
                let _ = reply.send(self.remove().await);
            }
            Command::Drain(reply) => {
                if !self.pending.is_empty() && self.handle.is_none() {
                    let _ = reply.send(Err(self.not_open()));
                } else {
                    // Answered by `settle` once the loop is idle.
                    self.waiters.push(reply);
                }
            }
        }
    }

    async fn open(&mut self) -> Result<(), QueueError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let timeout = self.config.write_timeout();
        let handle = timed(&self.path, QueueOp::Open, timeout, self.backend.open(&self.path)).await?;
        self.handle = Some(handle);
        tracing::debug!(
            path = %self.path.display(),
            pending = self.pending.len(),
            "snapshot file opened"
        );
        self.publish();
        Ok(())
    }

    async fn close_handle(&mut self, handle: B::Handle) -> Result<(), QueueError> {
        let timeout = self.config.write_timeout();
        let result = timed(&self.path, QueueOp::Close, timeout, self.backend.close(handle)).await;
        self.abandon_waiters();
        self.publish();
        if let Err(err) = &result {
            tracing::warn!(path = %self.path.display(), error = %err, "closing snapshot file failed");
        }
        result
    }

    async fn remove(&mut self) -> Result<(), QueueError> {
        if let Some(handle) = self.handle.take() {
            // The handle is gone either way; unlink regardless.
            let _ = self.close_handle(handle).await;
        }
        let timeout = self.config.write_timeout();
        match timed(&self.path, QueueOp::Unlink, timeout, self.backend.unlink(&self.path)).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "snapshot file removed");
                Ok(())
            }
            Err(QueueError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn write_next(&mut self) {
        let Some(mut snapshot) = self.pending.pop_front() else {
            return;
        };
        if !self.draining {
            self.draining = true;
            tracing::trace!(path = %self.path.display(), "drain started");
        }
        self.publish();

        let timeout = self.config.write_timeout();
        let result = match self.handle.as_mut() {
            Some(handle) => {
                timed(
                    &self.path,
                    QueueOp::Replace,
                    timeout,
                    self.backend.replace(handle, &snapshot.content),
                )
                .await
            }
            None => {
                self.pending.push_front(snapshot);
                return;
            }
        };

        let err = match result {
            Ok(()) => {
                tracing::trace!(
                    path = %self.path.display(),
                    bytes = snapshot.content.len(),
                    "snapshot written"
                );
                return;
            }
            Err(err) => err,
        };

        snapshot.failed_attempts += 1;
        let retry = &self.config.retry;
        let retryable = self.config.on_write_failure == WriteFailurePolicy::Requeue
            && snapshot.failed_attempts < retry.max_attempts;

        if retryable {
            let delay = retry.delay(snapshot.failed_attempts - 1);
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                attempt = snapshot.failed_attempts,
                delay = ?delay,
                "snapshot write failed, retrying"
            );
            self.pending.push_front(snapshot);
            self.publish();
            tokio::time::sleep(delay).await;
        } else {
            tracing::error!(
                path = %self.path.display(),
                error = %err,
                label = err.as_label(),
                attempts = snapshot.failed_attempts,
                "snapshot write failed, dropping snapshot"
            );
            self.failure.get_or_insert(err);
        }
    }

    /// The loop went idle: clear the drain flag and answer waiters.
    fn settle(&mut self) {
        if self.draining {
            self.draining = false;
            tracing::trace!(path = %self.path.display(), "drain finished");
        }
        self.publish();
        let outcome = match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// The handle went away; waiters of a queue that cannot empty now fail.
    fn abandon_waiters(&mut self) {
        self.draining = false;
        if self.pending.is_empty() || self.waiters.is_empty() {
            return;
        }
        self.failure = None;
        let err = self.not_open();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    async fn shutdown(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                path = %self.path.display(),
                dropped = self.pending.len(),
                "file queue stopped with unwritten snapshots"
            );
        }
        if let Some(handle) = self.handle.take() {
            let _ = self.close_handle(handle).await;
        }
    }

    fn not_open(&self) -> QueueError {
        QueueError::NotOpen {
            path: self.path.clone(),
        }
    }

    fn publish(&self) {
        self.status.send_replace(QueueStatus {
            open: self.handle.is_some(),
            draining: self.draining,
            pending: self.pending.len(),
        });
    }
}

async fn timed<T, F>(
    path: &Path,
    op: QueueOp,
    limit: Option<Duration>,
    operation: F,
) -> Result<T, QueueError>
where
    F: Future<Output = io::Result<T>>,
{
    let result = match limit {
        Some(after) => match tokio::time::timeout(after, operation).await {
            Ok(result) => result,
            Err(_) => {
                return Err(QueueError::TimedOut {
                    path: path.to_path_buf(),
                    op,
                    after,
                })
            }
        },
        None => operation.await,
    };
    result.map_err(|source| io_err(path, op, source))
}
