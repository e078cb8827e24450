//! Read-after-write rendezvous between one writer and one reader.
//!
//! The encode session publishes after every append to the shared file; the
//! decode session waits here when a read returns nothing. A reader takes a
//! [`GateState`] snapshot *before* reading and waits for that snapshot to go
//! stale, so a publish that lands between the read and the wait is never
//! lost.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateState {
    /// Bumped on every publish.
    pub generation: u64,
    /// A writer is attached and may still append.
    pub writer_open: bool,
    /// The reader was told to stop waiting.
    pub reader_stopped: bool,
}

/// Why a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWait {
    /// New bytes were published.
    Published,
    /// The writer detached; whatever is in the file is all there will be.
    WriterClosed,
    /// The reader was stopped.
    Stopped,
    /// Nothing happened within the stall timeout.
    TimedOut,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<GateState>,
    condvar: Condvar,
}

#[derive(Debug, Clone)]
pub struct ReadGate {
    shared: Arc<Shared>,
}

impl ReadGate {
    pub fn new() -> ReadGate {
        ReadGate {
            shared: Arc::new(Shared {
                state: Mutex::new(GateState::default()),
                condvar: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> GateState {
        *self.lock()
    }

    /// Attach the writer. Readers keep waiting on empty reads from now on.
    pub fn open_writer(&self) {
        self.lock().writer_open = true;
    }

    /// Detach the writer and wake the reader. Idempotent.
    pub fn close_writer(&self) {
        let mut state = self.lock();
        if state.writer_open {
            state.writer_open = false;
            self.shared.condvar.notify_all();
        }
    }

    /// Announce that bytes were appended.
    pub fn publish(&self) {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        self.shared.condvar.notify_all();
    }

    /// Unblock the reader for good. Idempotent.
    pub fn stop_reader(&self) {
        let mut state = self.lock();
        state.reader_stopped = true;
        self.shared.condvar.notify_all();
    }

    /// Block until the state differs from a snapshot taken with generation
    /// `seen`, or `timeout` elapses.
    pub fn wait(&self, seen: u64, timeout: Option<Duration>) -> GateWait {
        let pending = |s: &mut GateState| {
            !s.reader_stopped && s.writer_open && s.generation == seen
        };

        let guard = self.lock();
        let guard = match timeout {
            None => self
                .shared
                .condvar
                .wait_while(guard, pending)
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                let (guard, result) = self
                    .shared
                    .condvar
                    .wait_timeout_while(guard, timeout, pending)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() {
                    return GateWait::TimedOut;
                }
                guard
            }
        };

        if guard.reader_stopped {
            GateWait::Stopped
        } else if guard.generation != seen {
            GateWait::Published
        } else {
            GateWait::WriterClosed
        }
    }
}

impl Default for ReadGate {
    fn default() -> Self {
        Self::new()
    }
}
