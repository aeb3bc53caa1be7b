//! Discrete (virtual-time) scheduler (§4.4): single-thread cooperative,
//! deterministic. Virtual time only advances as events execute; there is
//! no wall clock and no suspension point. External threads must not submit
//! directly — cross-thread injection is explicitly out of scope (§5) and is
//! enforced here by rejecting any submission from a thread other than the
//! one that constructed the scheduler.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

use crate::error::{ActionError, ConfigError, ExecutionOutcome, SchedulerError};
use crate::event::{Event, EventHandle, MinOrder};
use crate::time::VirtualTimeProvider;

use super::{execute_guarded, ListenerSet, RunState, Scheduler};

/// Construction-time parameters (§6).
#[derive(Debug, Clone)]
pub struct DiscreteSchedulerConfig {
    pub enforce_strict_event_ordering: bool,
    pub log_exceptions: bool,
}

impl Default for DiscreteSchedulerConfig {
    fn default() -> Self {
        DiscreteSchedulerConfig {
            enforce_strict_event_ordering: true,
            log_exceptions: true,
        }
    }
}

type RecoverableListener = dyn Fn(&ActionError) + Send + Sync;
type FailureListener = dyn Fn(&ActionError) + Send + Sync;
type ShutdownHook = dyn Fn() + Send + Sync;

pub struct DiscreteScheduler {
    config: DiscreteSchedulerConfig,
    owning_thread: ThreadId,
    time: Arc<VirtualTimeProvider>,
    do_now: Mutex<VecDeque<Event>>,
    do_at: Mutex<BinaryHeap<MinOrder>>,
    state: Mutex<RunState>,
    running_until: AtomicBool,
    recoverable_listeners: ListenerSet<RecoverableListener>,
    failure_listeners: ListenerSet<FailureListener>,
    shutdown_hooks: ListenerSet<ShutdownHook>,
}

impl std::fmt::Debug for DiscreteScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscreteScheduler")
            .field("now", &self.time.now())
            .field("pending_now", &self.do_now.lock().unwrap().len())
            .field("pending_at", &self.do_at.lock().unwrap().len())
            .field("run_state", &*self.state.lock().unwrap())
            .finish()
    }
}

impl DiscreteScheduler {
    pub fn new(config: DiscreteSchedulerConfig, time: Arc<VirtualTimeProvider>) -> Self {
        DiscreteScheduler {
            config,
            owning_thread: std::thread::current().id(),
            time,
            do_now: Mutex::new(VecDeque::new()),
            do_at: Mutex::new(BinaryHeap::new()),
            state: Mutex::new(RunState::Idle),
            running_until: AtomicBool::new(false),
            recoverable_listeners: ListenerSet::new(),
            failure_listeners: ListenerSet::new(),
            shutdown_hooks: ListenerSet::new(),
        }
    }

    pub fn now(&self) -> f64 {
        self.time.now()
    }

    pub fn on_recoverable(&self, listener: Arc<RecoverableListener>) {
        self.recoverable_listeners.register(listener);
    }

    pub fn on_failure(&self, listener: Arc<FailureListener>) {
        self.failure_listeners.register(listener);
    }

    pub fn on_shutdown(&self, hook: Arc<ShutdownHook>) {
        self.shutdown_hooks.register(hook);
    }

    fn require_owning_thread(&self) -> Result<(), SchedulerError> {
        if std::thread::current().id() != self.owning_thread {
            return Err(SchedulerError::ForeignThreadNotAllowed);
        }
        Ok(())
    }

    /// `doIn` convenience (§4.4): schedule `delay` units from now. Negative
    /// delays always fail, even in permissive mode.
    pub fn do_in(
        &self,
        delay: f64,
        description: impl Into<String>,
        daemon: bool,
        action: Box<dyn FnMut() -> Result<(), ActionError> + Send>,
    ) -> Result<EventHandle, SchedulerError> {
        if delay < 0.0 {
            return Err(ConfigError::NegativeDuration { delay }.into());
        }
        self.do_at(self.now() + delay, description, daemon, action)
    }

    pub fn pause(&self) -> Result<(), SchedulerError> {
        self.require_owning_thread()?;
        let mut state = self.state.lock().unwrap();
        match *state {
            RunState::Idle => {
                *state = RunState::Paused;
                Ok(())
            }
            RunState::Stopped | RunState::Stopping => Err(SchedulerError::Stopped),
            _ => Ok(()),
        }
    }

    /// Drains all currently due work, returning to `Idle` once both queues
    /// are empty (or hold only daemon events).
    pub fn unpause(&self) -> Result<(), SchedulerError> {
        self.require_owning_thread()?;
        {
            let mut state = self.state.lock().unwrap();
            if *state == RunState::Paused {
                *state = RunState::Executing;
            }
        }
        self.run_pending();
        let mut state = self.state.lock().unwrap();
        if *state == RunState::Executing {
            *state = RunState::Idle;
        }
        Ok(())
    }

    pub fn prepare_to_stop(&self) -> Result<(), SchedulerError> {
        self.require_owning_thread()?;
        let mut state = self.state.lock().unwrap();
        match *state {
            RunState::Executing => {
                self.do_at.lock().unwrap().clear();
                *state = RunState::Stopping;
                Ok(())
            }
            _ => Err(SchedulerError::Stopped),
        }
    }

    /// Execute every currently-due event, advancing virtual time as each
    /// do-at event is reached. Do-now events always drain first at
    /// unchanged time (§4.4's polling rule).
    ///
    /// Unbounded: a self-rescheduling repeating task run this way never
    /// returns, since every tick re-enters the same `do_at` heap this loop
    /// drains. Bound a run with [`Self::run_until_time`]/
    /// [`Self::run_for_duration`] when driving anything that reschedules
    /// itself indefinitely.
    pub fn run_pending(&self) {
        self.run_pending_until(None);
    }

    /// Shared drain loop behind `run_pending`/`run_until_time`. With
    /// `end_time = None`, drains every pending event unconditionally (the
    /// `run_pending` contract). With `end_time = Some(bound)`, stops before
    /// popping a `do_at` event scheduled beyond `bound`, leaving it (and
    /// everything after it) queued for a later call.
    fn run_pending_until(&self, end_time: Option<f64>) {
        loop {
            while let Some(mut event) = self.do_now.lock().unwrap().pop_front() {
                self.run_one(&mut event);
            }
            let due = {
                let mut heap = self.do_at.lock().unwrap();
                let ready = match heap.peek() {
                    Some(MinOrder(event)) => match end_time {
                        Some(bound) => event.time() <= bound,
                        None => true,
                    },
                    None => false,
                };
                if ready {
                    heap.pop()
                } else {
                    None
                }
            };
            match due {
                Some(MinOrder(mut event)) => {
                    self.time.advance_to(event.time());
                    self.run_one(&mut event);
                }
                None => break,
            }
        }
    }

    fn run_one(&self, event: &mut Event) {
        if event.is_cancelled() {
            return;
        }
        match execute_guarded(event) {
            ExecutionOutcome::Ok => {}
            ExecutionOutcome::Recoverable(err) => {
                for listener in self.recoverable_listeners.snapshot() {
                    listener(&err);
                }
            }
            ExecutionOutcome::Fatal(err) => {
                if self.config.log_exceptions {
                    tracing::error!(error = %err, "discrete scheduler: fatal event error");
                }
                for listener in self.failure_listeners.snapshot() {
                    listener(&err);
                }
                self.stop();
            }
        }
    }

    /// Pause-until helper (§4.4): schedules a sentinel event at `end_time`
    /// *before* running anything, then drains only events due at or before
    /// `end_time`, so the clock always reaches exactly `end_time` while
    /// nothing scheduled beyond it runs early. Because the sentinel is
    /// scheduled ahead of the drain, any event already queued for exactly
    /// `end_time` holds a lower id and so runs first under the `(time, id)`
    /// tie-break (§4.1) — "everything scheduled exactly at end time runs
    /// first" falls out of that ordering rather than needing special-casing.
    pub fn run_until_time(&self, end_time: f64) -> Result<(), SchedulerError> {
        self.require_owning_thread()?;
        if !self.state_is(RunState::Paused) {
            return Err(SchedulerError::Stopped);
        }
        if end_time < self.now() {
            return Err(ConfigError::PastTimeUnderStrictOrdering {
                now: self.now(),
                requested: end_time,
            }
            .into());
        }
        if self
            .running_until
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::Stopped);
        }

        self.do_at(
            end_time,
            "run-until-time sentinel",
            true,
            Box::new(|| Ok(())),
        )?;
        {
            let mut state = self.state.lock().unwrap();
            *state = RunState::Executing;
        }
        self.run_pending_until(Some(end_time));

        self.running_until.store(false, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        *state = RunState::Paused;
        Ok(())
    }

    pub fn run_for_duration(&self, duration: f64) -> Result<(), SchedulerError> {
        self.run_until_time(self.now() + duration)
    }

    fn state_is(&self, expected: RunState) -> bool {
        *self.state.lock().unwrap() == expected
    }
}

impl Scheduler for DiscreteScheduler {
    fn do_now(
        &self,
        description: impl Into<String>,
        daemon: bool,
        action: Box<dyn FnMut() -> Result<(), ActionError> + Send>,
    ) -> Result<EventHandle, SchedulerError> {
        self.require_owning_thread()?;
        {
            let state = self.state.lock().unwrap();
            if *state == RunState::Stopped {
                return Err(SchedulerError::Stopped);
            }
        }
        let event = Event::new(self.now(), description, daemon, action);
        let handle = event.handle();
        self.do_now.lock().unwrap().push_back(event);
        Ok(handle)
    }

    fn do_at(
        &self,
        t: f64,
        description: impl Into<String>,
        daemon: bool,
        action: Box<dyn FnMut() -> Result<(), ActionError> + Send>,
    ) -> Result<EventHandle, SchedulerError> {
        self.require_owning_thread()?;
        {
            let state = self.state.lock().unwrap();
            if matches!(*state, RunState::Stopped | RunState::Stopping) {
                return Err(SchedulerError::Stopped);
            }
        }
        let now = self.now();
        let t = if t < now {
            if self.config.enforce_strict_event_ordering {
                return Err(ConfigError::PastTimeUnderStrictOrdering { now, requested: t }.into());
            }
            now
        } else {
            t
        };
        let event = Event::new(t, description, daemon, action);
        let handle = event.handle();
        self.do_at.lock().unwrap().push(MinOrder(event));
        Ok(handle)
    }

    fn run_state(&self) -> RunState {
        *self.state.lock().unwrap()
    }

    fn now(&self) -> f64 {
        self.time.now()
    }

    fn stop(&self) {
        let should_flush_do_now = { *self.state.lock().unwrap() == RunState::Stopping };
        if should_flush_do_now {
            while let Some(mut event) = self.do_now.lock().unwrap().pop_front() {
                self.run_one_without_reentering_stop(&mut event);
            }
        }
        *self.state.lock().unwrap() = RunState::Stopped;
        for hook in self.shutdown_hooks.snapshot() {
            hook();
        }
    }
}

impl DiscreteScheduler {
    fn run_one_without_reentering_stop(&self, event: &mut Event) {
        if event.is_cancelled() {
            return;
        }
        if let ExecutionOutcome::Fatal(err) | ExecutionOutcome::Recoverable(err) =
            execute_guarded(event)
        {
            for listener in self.failure_listeners.snapshot() {
                listener(&err);
            }
        }
    }
}
