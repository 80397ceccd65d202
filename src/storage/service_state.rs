//! Lifecycle state machine shared by engines and the registry.

use crate::error::StorageError;

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    New,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::New => "NEW",
            State::Starting => "STARTING",
            State::Running => "RUNNING",
            State::Stopping => "STOPPING",
            State::Terminated => "TERMINATED",
            State::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

pub type StateCallback = Arc<dyn Fn(State) + Send + Sync>;

struct Inner {
    state: State,
    reason: Option<String>,
}

/// `NEW -> STARTING -> RUNNING -> STOPPING -> TERMINATED`, with `FAILED`
/// reachable from everywhere. Once failed, further transitions are ignored.
pub struct ServiceState {
    inner: Mutex<Inner>,
    changed: Condvar,
    callbacks: Mutex<Vec<StateCallback>>,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::New,
                reason: None,
            }),
            changed: Condvar::new(),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.inner.lock().reason.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state(), State::Terminated | State::Failed)
    }

    pub fn register_callback(&self, callback: StateCallback) {
        self.callbacks.lock().push(callback);
    }

    pub fn dispatch_to_starting(&self) -> Result<(), StorageError> {
        self.transition(State::New, State::Starting)
    }

    pub fn dispatch_to_running(&self) -> Result<(), StorageError> {
        self.transition(State::Starting, State::Running)
    }

    pub fn dispatch_to_stopping(&self) -> Result<(), StorageError> {
        self.transition(State::Running, State::Stopping)
    }

    pub fn dispatch_to_terminated(&self) -> Result<(), StorageError> {
        self.transition(State::Stopping, State::Terminated)
    }

    pub fn dispatch_to_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        {
            let mut inner = self.inner.lock();
            if inner.state == State::Failed {
                return;
            }
            error!("Service failed: {}", reason);
            inner.state = State::Failed;
            inner.reason = Some(reason);
            self.changed.notify_all();
        }
        self.fire(State::Failed);
    }

    pub fn force_to_terminated(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = State::Terminated;
            self.changed.notify_all();
        }
        self.fire(State::Terminated);
    }

    /// Back to `NEW` from a finished state, so the service can be restarted.
    pub fn reset(&self) -> Result<(), StorageError> {
        {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, State::Terminated | State::Failed | State::New) {
                return Err(StorageError::Rejected(format!(
                    "unable to reset service in state {}",
                    inner.state
                )));
            }
            inner.state = State::New;
            inner.reason = None;
            self.changed.notify_all();
        }
        self.fire(State::New);
        Ok(())
    }

    fn transition(&self, expected: State, next: State) -> Result<(), StorageError> {
        {
            let mut inner = self.inner.lock();

            if inner.state == State::Failed {
                debug!("Ignoring transition to {}, service failed", next);
                return Ok(());
            }

            if inner.state != expected {
                return Err(StorageError::Rejected(format!(
                    "illegal transition {} -> {}",
                    inner.state, next
                )));
            }

            inner.state = next;
            self.changed.notify_all();
        }

        self.fire(next);
        Ok(())
    }

    fn fire(&self, state: State) {
        let callbacks: Vec<StateCallback> = self.callbacks.lock().clone();
        for callback in callbacks {
            callback(state);
        }
    }

    /// Blocks until `RUNNING` or a finished state; false on timeout.
    pub fn await_running(&self, timeout: Duration) -> bool {
        self.await_state(timeout, |s| s == State::Running)
    }

    pub fn await_finished(&self, timeout: Duration) -> bool {
        self.await_state(timeout, |s| matches!(s, State::Terminated | State::Failed))
    }

    fn await_state<F>(&self, timeout: Duration, done: F) -> bool
    where
        F: Fn(State) -> bool,
    {
        let mut inner = self.inner.lock();
        let deadline = std::time::Instant::now() + timeout;

        loop {
            if done(inner.state) {
                return true;
            }
            if matches!(inner.state, State::Terminated | State::Failed) {
                return false;
            }
            if self.changed.wait_until(&mut inner, deadline).timed_out() {
                return done(inner.state);
            }
        }
    }
}
