//! Session state management

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Session state machine
///
/// Encode and decode sessions share the same lifecycle. Resources are only
/// released on the `Stopping -> Closed` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session, or a start attempt failed
    Idle,

    /// Acquiring file, codec and surface
    Opening,

    /// The internal loop is processing
    Running {
        /// When the session started running
        started_at: Instant,
    },

    /// Stop requested, the loop is draining
    Stopping,

    /// Close callback has run; cannot be restarted
    Closed,
}

impl SessionState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        match (self, target) {
            // From Idle
            (Idle, Opening) => true,

            // From Opening
            (Opening, Running { .. }) => true,
            (Opening, Idle) => true, // start failed

            // From Running
            (Running { .. }, Stopping) => true,

            // From Stopping
            (Stopping, Closed) => true,

            // From Closed - no transitions allowed
            (Closed, _) => false,

            // Self-transitions
            (a, b) if a == b => true,

            // All other transitions invalid
            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Opening => "Opening",
            SessionState::Running { .. } => "Running",
            SessionState::Stopping => "Stopping",
            SessionState::Closed => "Closed",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running { .. })
    }

    /// Opening, running or stopping: resources are held.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Opening | SessionState::Running { .. } | SessionState::Stopping
        )
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    /// Get the duration since the session started (if running)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let SessionState::Running { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Session state shared between the owner and the worker thread.
#[derive(Debug, Clone)]
pub struct StateCell {
    inner: Arc<Mutex<SessionState>>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionState::Idle)),
        }
    }

    pub fn get(&self) -> SessionState {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `target` if that is a valid change of state.
    ///
    /// Returns false for invalid transitions and for self-transitions, so
    /// exactly one caller wins each edge.
    pub fn advance(&self, target: SessionState) -> bool {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let same = std::mem::discriminant(&*state) == std::mem::discriminant(&target);
        if same || !state.can_transition_to(&target) {
            return false;
        }
        log::trace!("session state {} -> {}", *state, target);
        *state = target;
        true
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
