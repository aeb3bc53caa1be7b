//! Executor-backed realtime scheduler (§4.5): delegates timing to a single
//! dedicated thread that sleeps precisely until the next due event rather
//! than spinning, modelling the source design's "single-threaded timed
//! executor" without pulling in an external task-pool crate. `doAt(t)`
//! requires a [`crate::time::UnitTimeProvider`] so `(t - now)` can be
//! converted into an actual sleep duration.
//!
//! The source design stores a placeholder future per event, replaced by
//! compare-and-set once the real timer future is known, purely so
//! `cancel(event)` can reach into the executor's timer and cancel it. This
//! crate's [`crate::event::Event`] already carries an O(1) shared
//! cancellation flag (§4.1), so no such indirection is needed here —
//! `remove_on_cancel` instead controls whether a cancelled event is
//! eagerly evicted from the pending heap/queue or left for the consumer
//! loop to skip lazily.

use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{ActionError, ExecutionOutcome, SchedulerError};
use crate::event::{Event, EventHandle, MinOrder};
use crate::time::UnitTimeProvider;

use super::{execute_guarded, ListenerSet, RunState, Scheduler};

/// Construction-time parameters (§6).
#[derive(Debug, Clone)]
pub struct ExecutorSchedulerConfig {
    pub name: String,
    pub daemon_thread: bool,
    pub remove_on_cancel: bool,
}

impl Default for ExecutorSchedulerConfig {
    fn default() -> Self {
        ExecutorSchedulerConfig {
            name: "executor-scheduler".to_string(),
            daemon_thread: false,
            remove_on_cancel: false,
        }
    }
}

type RecoverableListener = dyn Fn(&ActionError) + Send + Sync;
type FailureListener = dyn Fn(&ActionError) + Send + Sync;
type ShutdownHook = dyn Fn() + Send + Sync;

struct Inner {
    do_now: VecDeque<Event>,
    scheduled: BinaryHeap<MinOrder>,
}

struct Shared {
    time: Arc<dyn UnitTimeProvider>,
    inner: Mutex<Inner>,
    wake: Condvar,
    should_stop: AtomicBool,
    state: Mutex<RunState>,
    recoverable_listeners: ListenerSet<RecoverableListener>,
    failure_listeners: ListenerSet<FailureListener>,
    shutdown_hooks: ListenerSet<ShutdownHook>,
    config: ExecutorSchedulerConfig,
}

pub struct ExecutorScheduler {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ExecutorScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock().unwrap();
        f.debug_struct("ExecutorScheduler")
            .field("pending_now", &inner.do_now.len())
            .field("pending_at", &inner.scheduled.len())
            .field("run_state", &*self.shared.state.lock().unwrap())
            .finish()
    }
}

impl ExecutorScheduler {
    pub fn start(config: ExecutorSchedulerConfig, time: Arc<dyn UnitTimeProvider>) -> Self {
        let shared = Arc::new(Shared {
            time,
            inner: Mutex::new(Inner {
                do_now: VecDeque::new(),
                scheduled: BinaryHeap::new(),
            }),
            wake: Condvar::new(),
            should_stop: AtomicBool::new(false),
            state: Mutex::new(RunState::Idle),
            recoverable_listeners: ListenerSet::new(),
            failure_listeners: ListenerSet::new(),
            shutdown_hooks: ListenerSet::new(),
            config,
        });

        let loop_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name(loop_shared.config.name.clone())
            .spawn(move || run_loop(&loop_shared))
            .expect("failed to spawn executor scheduler consumer thread");

        ExecutorScheduler {
            shared,
            consumer: Mutex::new(Some(thread)),
        }
    }

    pub fn on_recoverable(&self, listener: Arc<RecoverableListener>) {
        self.shared.recoverable_listeners.register(listener);
    }

    pub fn on_failure(&self, listener: Arc<FailureListener>) {
        self.shared.failure_listeners.register(listener);
    }

    pub fn on_shutdown(&self, hook: Arc<ShutdownHook>) {
        self.shared.shutdown_hooks.register(hook);
    }

    /// Request stop, run shutdown hooks, and wait up to one second for the
    /// consumer thread to finish (§4.5's shutdown sequence).
    pub fn shutdown(&self) {
        self.shared.should_stop.store(true, Ordering::Relaxed);
        self.shared.wake.notify_all();
        for hook in self.shared.shutdown_hooks.snapshot() {
            hook();
        }
        if let Some(handle) = self.consumer.lock().unwrap().take() {
            let deadline = std::time::Instant::now() + Duration::from_secs(1);
            while !handle.is_finished() && std::time::Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        let mut inner = self.shared.inner.lock().unwrap();
        inner.do_now.clear();
        inner.scheduled.clear();
    }
}

fn run_loop(shared: &Arc<Shared>) {
    *shared.state.lock().unwrap() = RunState::Executing;
    loop {
        if shared.should_stop.load(Ordering::Relaxed) {
            break;
        }
        let due = {
            let mut inner = shared.inner.lock().unwrap();
            if let Some(event) = inner.do_now.pop_front() {
                Some(event)
            } else {
                let now = shared.time.now();
                let ready = matches!(inner.scheduled.peek(), Some(MinOrder(e)) if e.time() <= now);
                if ready {
                    inner.scheduled.pop().map(|MinOrder(e)| e)
                } else {
                    None
                }
            }
        };

        match due {
            Some(mut event) => {
                if event.is_cancelled() {
                    continue;
                }
                if !handle_outcome(shared, execute_guarded(&mut event)) {
                    return;
                }
            }
            None => {
                let wait_for = {
                    let inner = shared.inner.lock().unwrap();
                    inner.scheduled.peek().map(|MinOrder(e)| {
                        shared.time.duration_from_f64(e.time() - shared.time.now())
                    })
                };
                let guard = shared.inner.lock().unwrap();
                let _unused = match wait_for {
                    Some(duration) => shared.wake.wait_timeout(guard, duration).unwrap().0,
                    None => shared
                        .wake
                        .wait_timeout(guard, Duration::from_millis(50))
                        .unwrap()
                        .0,
                };
            }
        }
    }
    *shared.state.lock().unwrap() = RunState::Stopped;
}

fn handle_outcome(shared: &Shared, outcome: ExecutionOutcome) -> bool {
    match outcome {
        ExecutionOutcome::Ok => true,
        ExecutionOutcome::Recoverable(err) => {
            for listener in shared.recoverable_listeners.snapshot() {
                listener(&err);
            }
            true
        }
        ExecutionOutcome::Fatal(err) => {
            tracing::error!(error = %err, "executor scheduler: fatal event error");
            for listener in shared.failure_listeners.snapshot() {
                listener(&err);
            }
            shared.should_stop.store(true, Ordering::Relaxed);
            false
        }
    }
}

impl Scheduler for ExecutorScheduler {
    fn do_now(
        &self,
        description: impl Into<String>,
        daemon: bool,
        action: Box<dyn FnMut() -> Result<(), ActionError> + Send>,
    ) -> Result<EventHandle, SchedulerError> {
        if self.shared.should_stop.load(Ordering::Relaxed) {
            return Err(SchedulerError::Stopped);
        }
        let event = Event::new(self.shared.time.now(), description, daemon, action);
        let handle = event.handle();
        self.shared.inner.lock().unwrap().do_now.push_back(event);
        self.shared.wake.notify_all();
        Ok(handle)
    }

    fn do_at(
        &self,
        t: f64,
        description: impl Into<String>,
        daemon: bool,
        action: Box<dyn FnMut() -> Result<(), ActionError> + Send>,
    ) -> Result<EventHandle, SchedulerError> {
        if self.shared.should_stop.load(Ordering::Relaxed) {
            return Err(SchedulerError::Stopped);
        }
        let event = Event::new(t, description, daemon, action);
        let handle = event.handle();
        self.shared
            .inner
            .lock()
            .unwrap()
            .scheduled
            .push(MinOrder(event));
        self.shared.wake.notify_all();
        Ok(handle)
    }

    fn run_state(&self) -> RunState {
        *self.shared.state.lock().unwrap()
    }

    fn now(&self) -> f64 {
        self.shared.time.now()
    }

    fn stop(&self) {
        self.shutdown();
    }
}

impl ExecutorScheduler {
    /// Evict a cancelled, not-yet-due event from the scheduled heap
    /// immediately, when `remove_on_cancel` is configured (otherwise it is
    /// left for the consumer loop to skip lazily on its cancelled flag).
    pub fn cancel(&self, handle: &EventHandle) {
        handle.cancel();
        if self.shared.config.remove_on_cancel {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.scheduled = inner
                .scheduled
                .drain()
                .filter(|MinOrder(e)| e.id() != handle.id())
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemTimeProvider;
    use std::sync::atomic::AtomicUsize;

    fn start() -> ExecutorScheduler {
        ExecutorScheduler::start(
            ExecutorSchedulerConfig::default(),
            Arc::new(SystemTimeProvider::new()),
        )
    }

    #[test]
    fn runs_do_now_promptly() {
        let sched = start();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        sched
            .do_now(
                "x",
                false,
                Box::new(move || {
                    count_clone.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }),
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::Relaxed), 1);
        sched.shutdown();
    }

    #[test]
    fn runs_do_at_near_its_scheduled_time() {
        let sched = start();
        let ran_at = Arc::new(Mutex::new(None));
        let ran_at_clone = Arc::clone(&ran_at);
        let now = sched.shared.time.now();
        sched
            .do_at(
                now + 30.0,
                "x",
                false,
                Box::new(move || {
                    *ran_at_clone.lock().unwrap() = Some(());
                    Ok(())
                }),
            )
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert!(ran_at.lock().unwrap().is_none());
        std::thread::sleep(Duration::from_millis(60));
        assert!(ran_at.lock().unwrap().is_some());
        sched.shutdown();
    }

    #[test]
    fn cancel_prevents_execution() {
        let sched = start();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let handle = sched
            .do_at(
                sched.shared.time.now() + 30.0,
                "x",
                false,
                Box::new(move || {
                    ran_clone.store(true, Ordering::Relaxed);
                    Ok(())
                }),
            )
            .unwrap();
        sched.cancel(&handle);
        std::thread::sleep(Duration::from_millis(60));
        assert!(!ran.load(Ordering::Relaxed));
        sched.shutdown();
    }
}
