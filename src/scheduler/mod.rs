//! Scheduler family: a shared contract (§3, §5) implemented by three
//! concrete disciplines — [`discrete`], [`busy_loop`], and [`executor`] —
//! plus a [`repeating`] helper built on top of any of them.

pub mod busy_loop;
pub mod discrete;
pub mod executor;
pub mod repeating;

use std::sync::Mutex;

use crate::error::{ActionError, ExecutionOutcome, SchedulerError};
use crate::event::{Event, EventHandle};

/// Run-state machine shared by every scheduler (§4.4's transition table
/// generalises to all three disciplines).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Executing,
    Paused,
    Stopping,
    Stopped,
}

/// Public submission/lifecycle contract every scheduler discipline
/// implements (§3's "Scheduler" data model plus §4's per-discipline
/// contracts).
pub trait Scheduler {
    /// Submit an action to run as soon as the consumer is free, ahead of
    /// any scheduled event (§5, "do-now events are strictly prioritised").
    fn do_now(
        &self,
        description: impl Into<String>,
        daemon: bool,
        action: Box<dyn FnMut() -> Result<(), ActionError> + Send>,
    ) -> Result<EventHandle, SchedulerError>;

    /// Submit an action to run at absolute time `t`.
    fn do_at(
        &self,
        t: f64,
        description: impl Into<String>,
        daemon: bool,
        action: Box<dyn FnMut() -> Result<(), ActionError> + Send>,
    ) -> Result<EventHandle, SchedulerError>;

    fn run_state(&self) -> RunState;

    fn stop(&self);

    /// The scheduler's current time (virtual ticks for the discrete
    /// scheduler, wall-clock units for the realtime disciplines). Exposed
    /// on the shared trait so generic helpers like [`repeating`] can
    /// compute fixed-delay re-scheduling without downcasting.
    fn now(&self) -> f64;
}

/// Copy-on-write listener set (§4.9, §9 "Listener set mutated rarely,
/// iterated on every mutation"): registration is rare, dispatch iterates a
/// snapshot taken once per firing so a listener registering or
/// deregistering mid-dispatch never invalidates the in-flight iteration.
pub struct ListenerSet<F: ?Sized> {
    listeners: Mutex<Vec<std::sync::Arc<F>>>,
}

impl<F: ?Sized> Default for ListenerSet<F> {
    fn default() -> Self {
        ListenerSet {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<F: ?Sized> ListenerSet<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: std::sync::Arc<F>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn snapshot(&self) -> Vec<std::sync::Arc<F>> {
        self.listeners.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run `event`'s action, classifying the result per §7: an `Err` is
/// inspected via [`crate::error::is_recoverable`]; a panic is always fatal
/// (a raw panic payload carries no marker type, so it cannot be
/// recoverable) and is caught here as the executor-loop's safety net
/// rather than left to unwind across the consumer thread.
pub fn execute_guarded(event: &mut Event) -> ExecutionOutcome {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| event.execute()));
    match result {
        Ok(Ok(())) => ExecutionOutcome::Ok,
        Ok(Err(err)) => {
            if crate::error::is_recoverable(err.as_ref()) {
                ExecutionOutcome::Recoverable(err)
            } else {
                ExecutionOutcome::Fatal(err)
            }
        }
        Err(panic_payload) => {
            let message = panic_message(&panic_payload);
            ExecutionOutcome::Fatal(Box::new(PanicError(message)))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "event action panicked with a non-string payload".to_string()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("event action panicked: {0}")]
struct PanicError(String);
