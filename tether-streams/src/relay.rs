//! Flow-controlled pass-through.
//!
//! A [`Relay`] hands every written chunk to its subscribers as a
//! [`RelayEvent::Data`] unless it is paused, in which case the chunk is kept
//! in an unbounded FIFO until [`Relay::resume`] replays it.
//!
//! ```text
//! producer ──write──► Relay ──Data──► subscriber callbacks
//!                       │
//!                 paused? └──► buffer (VecDeque) ──resume──┘
//! ```
//!
//! ## Rules
//! - Callbacks run on the caller's thread, with no relay lock held, so a
//!   callback may write, pause, or resume the same relay.
//! - One replay runs at a time. A [`Relay::resume`] from another thread waits
//!   for the running replay; one from inside a callback hands its work to it.
//! - [`Relay::close`] and [`Relay::end`] never close anything; the relay is a
//!   permanent conduit. Only [`Relay::terminate`] closes it, for good.
//! - The buffer is unbounded. Producers that may outpace a paused consumer
//!   should watch [`Relay::buffered_len`].

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use tether_core::RelayConfig;

use crate::error::RelayError;

/// Event delivered to relay subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent<T> {
    Data(T),
    Error(RelayError),
}

/// Result of a successful [`Relay::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The chunk was emitted to subscribers.
    Accepted,
    /// The relay is paused; the chunk was buffered. Treat as backpressure.
    Buffered,
}

impl WriteOutcome {
    pub fn is_accepted(self) -> bool {
        matches!(self, WriteOutcome::Accepted)
    }
}

type Listener<T> = Arc<dyn Fn(&RelayEvent<T>) + Send + Sync>;

struct State<T> {
    paused: bool,
    closed: bool,
    // Set by `resume`, cleared by `pause`; a resume loop stops once it is cleared.
    draining: bool,
    buffer: VecDeque<T>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    listeners: Mutex<Vec<Listener<T>>>,
    // Thread running the current replay, if any.
    replayer: Mutex<Option<ThreadId>>,
    replay_done: Condvar,
}

/// Cloneable handle to a flow-controlled relay.
pub struct Relay<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Relay<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> Relay<T> {
    pub fn new(paused: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    paused,
                    closed: false,
                    draining: false,
                    buffer: VecDeque::new(),
                }),
                listeners: Mutex::new(Vec::new()),
                replayer: Mutex::new(None),
                replay_done: Condvar::new(),
            }),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.start_paused)
    }

    /// Register a callback for every future event.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&RelayEvent<T>) + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }

    /// Emit `chunk`, or buffer it while paused.
    ///
    /// # Errors
    /// [`RelayError::Closed`] after [`Relay::terminate`]; subscribers also
    /// receive it as [`RelayEvent::Error`].
    pub fn write(&self, chunk: T) -> Result<WriteOutcome, RelayError> {
        let mut state = self.state();
        if state.closed {
            drop(state);
            tracing::warn!("write to terminated relay rejected");
            self.emit(&RelayEvent::Error(RelayError::Closed));
            return Err(RelayError::Closed);
        }
        if state.paused {
            state.buffer.push_back(chunk);
            return Ok(WriteOutcome::Buffered);
        }
        drop(state);

        self.emit(&RelayEvent::Data(chunk));
        Ok(WriteOutcome::Accepted)
    }

    pub fn pause(&self) {
        let mut state = self.state();
        state.paused = true;
        state.draining = false;
    }

    /// Replay the buffer in FIFO order, then unpause.
    ///
    /// Every buffered chunk is emitted before this returns. Chunks written by
    /// subscribers meanwhile join the tail and are emitted in the same pass;
    /// a subscriber calling [`Relay::pause`] stops the replay and keeps the
    /// rest buffered. Replays are serialized across threads.
    pub fn resume(&self) {
        let Some(_replay) = self.claim_replay() else {
            // Called from a callback of the running replay, which drains the tail.
            self.state().draining = true;
            return;
        };
        {
            let mut state = self.state();
            state.draining = true;
            if !state.buffer.is_empty() {
                tracing::debug!(buffered = state.buffer.len(), "relay resuming");
            }
        }

        loop {
            let chunk = {
                let mut state = self.state();
                if !state.draining {
                    return;
                }
                match state.buffer.pop_front() {
                    Some(chunk) => chunk,
                    None => {
                        state.paused = false;
                        state.draining = false;
                        return;
                    }
                }
            };
            self.emit(&RelayEvent::Data(chunk));
        }
    }

    /// Intentionally does nothing.
    pub fn close(&self) {}

    /// Write `chunk` if given, then [`Relay::close`].
    pub fn end(&self, chunk: Option<T>) -> Result<(), RelayError> {
        if let Some(chunk) = chunk {
            self.write(chunk)?;
        }
        self.close();
        Ok(())
    }

    /// Permanently close the relay. Buffered chunks are discarded.
    pub fn terminate(&self) {
        let mut state = self.state();
        state.closed = true;
        state.draining = false;
        let dropped = std::mem::take(&mut state.buffer).len();
        if dropped > 0 {
            tracing::debug!(dropped, "relay terminated with buffered chunks");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn buffered_len(&self) -> usize {
        self.state().buffer.len()
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for any replay on another thread, then own the next one.
    ///
    /// `None` if the current thread already runs a replay.
    fn claim_replay(&self) -> Option<ReplayGuard<'_, T>> {
        let me = thread::current().id();
        let mut owner = self
            .shared
            .replayer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *owner == Some(me) {
            return None;
        }
        while owner.is_some() {
            owner = self
                .shared
                .replay_done
                .wait(owner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *owner = Some(me);
        Some(ReplayGuard {
            shared: &self.shared,
        })
    }

    fn emit(&self, event: &RelayEvent<T>) {
        // Snapshot so callbacks can subscribe or write without deadlocking.
        let listeners: Vec<Listener<T>> = self
            .shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(event);
        }
    }
}

struct ReplayGuard<'a, T> {
    shared: &'a Shared<T>,
}

impl<T> Drop for ReplayGuard<'_, T> {
    fn drop(&mut self) {
        *self
            .shared
            .replayer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.shared.replay_done.notify_all();
    }
}
