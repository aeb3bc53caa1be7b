//! Busy-loop realtime scheduler (§4.3): spins on a dedicated, named
//! consumer thread. Producers may be any number of threads; the queue
//! variant selected at construction absorbs the concurrency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{ActionError, ExecutionOutcome, SchedulerError};
use crate::event::{Event, EventHandle};
use crate::queue::{CombinedQueue, EventQueue, RingQueue, SplitRingQueue, SwitchingQueue};
use crate::time::TimeProvider;

use super::{execute_guarded, ListenerSet, RunState, Scheduler};

/// Which of the four queue variants (§4.2) backs the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueVariant {
    Combined,
    Switching,
    Ring,
    SplitRing,
}

/// Construction-time parameters (§6).
#[derive(Debug, Clone)]
pub struct BusyLoopSchedulerConfig {
    pub name: String,
    pub queue_variant: QueueVariant,
    /// `queueCapacity` (§6): bounds the ring channel(s) before events spill
    /// into the overflow list. Unused by `Combined`/`Switching`, which have
    /// no bounded ring to size.
    pub queue_capacity: usize,
    pub park_duration_nanos: u64,
    pub use_low_latency_loop: bool,
    pub heartbeat: bool,
}

impl Default for BusyLoopSchedulerConfig {
    fn default() -> Self {
        BusyLoopSchedulerConfig {
            name: "busy-loop-scheduler".to_string(),
            queue_variant: QueueVariant::Switching,
            queue_capacity: 1024,
            park_duration_nanos: 0,
            use_low_latency_loop: false,
            heartbeat: false,
        }
    }
}

type RecoverableListener = dyn Fn(&ActionError) + Send + Sync;
type FailureListener = dyn Fn(&ActionError) + Send + Sync;
type ShutdownHook = dyn Fn() + Send + Sync;

struct Shared {
    queue: Box<dyn EventQueue>,
    time: Arc<dyn TimeProvider>,
    should_stop: AtomicBool,
    state: Mutex<RunState>,
    recoverable_listeners: ListenerSet<RecoverableListener>,
    failure_listeners: ListenerSet<FailureListener>,
    shutdown_hooks: ListenerSet<ShutdownHook>,
    park_duration_nanos: u64,
    suppress_error_logging: AtomicBool,
}

pub struct BusyLoopScheduler {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BusyLoopScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusyLoopScheduler")
            .field("queued", &self.shared.queue.len())
            .field("run_state", &*self.shared.state.lock().unwrap())
            .field("should_stop", &self.shared.should_stop.load(Ordering::Relaxed))
            .finish()
    }
}

fn build_queue(variant: QueueVariant, queue_capacity: usize) -> Box<dyn EventQueue> {
    match variant {
        QueueVariant::Combined => Box::new(CombinedQueue::new()),
        QueueVariant::Switching => Box::new(SwitchingQueue::new()),
        QueueVariant::Ring => Box::new(RingQueue::with_capacity(queue_capacity)),
        QueueVariant::SplitRing => Box::new(SplitRingQueue::with_capacity(queue_capacity)),
    }
}

impl BusyLoopScheduler {
    pub fn start(config: BusyLoopSchedulerConfig, time: Arc<dyn TimeProvider>) -> Self {
        let shared = Arc::new(Shared {
            queue: build_queue(config.queue_variant, config.queue_capacity),
            time,
            should_stop: AtomicBool::new(false),
            state: Mutex::new(RunState::Idle),
            recoverable_listeners: ListenerSet::new(),
            failure_listeners: ListenerSet::new(),
            shutdown_hooks: ListenerSet::new(),
            park_duration_nanos: config.park_duration_nanos,
            suppress_error_logging: AtomicBool::new(false),
        });

        let loop_shared = Arc::clone(&shared);
        let low_latency = config.use_low_latency_loop;
        let thread = std::thread::Builder::new()
            .name(config.name.clone())
            .spawn(move || {
                if low_latency {
                    run_low_latency_loop(&loop_shared);
                } else {
                    run_throughput_loop(&loop_shared);
                }
            })
            .expect("failed to spawn busy-loop scheduler consumer thread");

        let scheduler = BusyLoopScheduler {
            shared,
            consumer: Mutex::new(Some(thread)),
        };

        if config.heartbeat {
            scheduler.schedule_heartbeat();
        }

        scheduler
    }

    pub fn suppress_error_logging(&self, suppress: bool) {
        self.shared
            .suppress_error_logging
            .store(suppress, Ordering::Relaxed);
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

    fn schedule_heartbeat(&self) {
        let shared = Arc::clone(&self.shared);
        let start = shared.time.now();
        let last_beat = Arc::new(AtomicU64::new(start.to_bits()));
        let _ = self.do_at(
            start + 1000.0,
            "heartbeat",
            true,
            heartbeat_action(Arc::clone(&shared), last_beat),
        );
    }

    pub fn prepare_to_stop(&self) {
        // A no-op per §4.3's explicit design note; retained as a named
        // lifecycle hook for symmetry with the discrete scheduler.
    }

    pub fn join(&self) {
        if let Some(handle) = self.consumer.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn heartbeat_action(
    shared: Arc<Shared>,
    last_beat: Arc<AtomicU64>,
) -> Box<dyn FnMut() -> Result<(), ActionError> + Send> {
    Box::new(move || {
        let now = shared.time.now();
        let expected = f64::from_bits(last_beat.load(Ordering::Relaxed)) + 1000.0;
        tracing::debug!(actual = now, expected = expected, "busy-loop heartbeat");
        last_beat.store(now.to_bits(), Ordering::Relaxed);
        if !shared.should_stop.load(Ordering::Relaxed) {
            let next = Event::new(
                now + 1000.0,
                "heartbeat",
                true,
                heartbeat_action(Arc::clone(&shared), Arc::clone(&last_beat)),
            );
            shared.queue.add_scheduled(next);
        }
        Ok(())
    })
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
            if !shared.suppress_error_logging.load(Ordering::Relaxed) {
                tracing::error!(error = %err, "busy-loop scheduler: fatal event error");
            }
            for listener in shared.failure_listeners.snapshot() {
                listener(&err);
            }
            shared.should_stop.store(true, Ordering::Relaxed);
            *shared.state.lock().unwrap() = RunState::Stopping;
            for hook in shared.shutdown_hooks.snapshot() {
                hook();
            }
            *shared.state.lock().unwrap() = RunState::Stopped;
            false
        }
    }
}

fn run_throughput_loop(shared: &Arc<Shared>) {
    *shared.state.lock().unwrap() = RunState::Executing;
    while !shared.should_stop.load(Ordering::Relaxed) {
        match shared.queue.poll_next(shared.time.now()) {
            Some(mut event) => {
                if event.is_cancelled() {
                    continue;
                }
                if !handle_outcome(shared, execute_guarded(&mut event)) {
                    return;
                }
            }
            None => continue,
        }
    }
    finalize_stop(shared);
}

fn run_low_latency_loop(shared: &Arc<Shared>) {
    *shared.state.lock().unwrap() = RunState::Executing;
    while !shared.should_stop.load(Ordering::Relaxed) {
        loop {
            if shared.should_stop.load(Ordering::Relaxed) {
                break;
            }
            match shared.queue.poll_next_now() {
                Some(mut event) => {
                    if event.is_cancelled() {
                        continue;
                    }
                    if !handle_outcome(shared, execute_guarded(&mut event)) {
                        return;
                    }
                }
                None => break,
            }
        }
        while !shared.should_stop.load(Ordering::Relaxed) && shared.queue.is_empty_now() {
            let now = shared.time.now();
            match shared.queue.poll_next_scheduled(now) {
                Some(mut event) => {
                    if event.is_cancelled() {
                        continue;
                    }
                    if !handle_outcome(shared, execute_guarded(&mut event)) {
                        return;
                    }
                }
                None => {
                    if shared.park_duration_nanos > 0 {
                        std::thread::park_timeout(Duration::from_nanos(shared.park_duration_nanos));
                    }
                }
            }
        }
    }
    finalize_stop(shared);
}

fn finalize_stop(shared: &Arc<Shared>) {
    let mut state = shared.state.lock().unwrap();
    if *state != RunState::Stopped {
        *state = RunState::Stopped;
    }
}

impl Scheduler for BusyLoopScheduler {
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
        self.shared.queue.add_now(event);
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
        self.shared.queue.add_scheduled(event);
        Ok(handle)
    }

    fn run_state(&self) -> RunState {
        *self.shared.state.lock().unwrap()
    }

    fn now(&self) -> f64 {
        self.shared.time.now()
    }

    fn stop(&self) {
        tracing::info!(name = "busy-loop-scheduler", "stop requested");
        self.shared.should_stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemTimeProvider;
    use std::sync::atomic::AtomicUsize;

    fn start(config: BusyLoopSchedulerConfig) -> BusyLoopScheduler {
        BusyLoopScheduler::start(config, Arc::new(SystemTimeProvider::new()))
    }

    #[test]
    fn s3_now_wins_over_a_far_future_scheduled_event() {
        let sched = start(BusyLoopSchedulerConfig {
            use_low_latency_loop: true,
            park_duration_nanos: 0,
            ..Default::default()
        });
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = Arc::clone(&order);
        sched
            .do_at(
                100_000.0,
                "A",
                true,
                Box::new(move || {
                    order_a.lock().unwrap().push("A");
                    Ok(())
                }),
            )
            .unwrap();

        let order_b = Arc::clone(&order);
        sched
            .do_now(
                "B",
                false,
                Box::new(move || {
                    order_b.lock().unwrap().push("B");
                    Ok(())
                }),
            )
            .unwrap();

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(order.lock().unwrap().first().cloned(), Some("B"));
        sched.stop();
        sched.join();
    }

    #[test]
    fn configured_queue_capacity_still_drains_every_submission() {
        let sched = start(BusyLoopSchedulerConfig {
            queue_variant: QueueVariant::Ring,
            queue_capacity: 2,
            ..Default::default()
        });
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let count = Arc::clone(&count);
            sched
                .do_now(
                    "work",
                    false,
                    Box::new(move || {
                        count.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }),
                )
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::Relaxed), 10);
        sched.stop();
        sched.join();
    }

    #[test]
    fn throughput_loop_runs_submitted_work() {
        let sched = start(BusyLoopSchedulerConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let count = Arc::clone(&count);
            sched
                .do_now(
                    "work",
                    false,
                    Box::new(move || {
                        count.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }),
                )
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::Relaxed), 10);
        sched.stop();
        sched.join();
    }

    #[test]
    fn fatal_error_stops_the_consumer_loop() {
        #[derive(Debug, thiserror::Error)]
        #[error("boom")]
        struct Boom;

        let sched = start(BusyLoopSchedulerConfig::default());
        sched.suppress_error_logging(true);
        sched
            .do_now("boom", false, Box::new(|| Err(Box::new(Boom) as ActionError)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sched.run_state(), RunState::Stopped);
        sched.join();
    }

    #[test]
    fn cancelled_event_is_skipped() {
        let sched = start(BusyLoopSchedulerConfig::default());
        let ran = Arc::new(AtomicBool::new(false));
        let ran_in_closure = Arc::clone(&ran);
        let handle = sched
            .do_now(
                "x",
                false,
                Box::new(move || {
                    ran_in_closure.store(true, Ordering::Relaxed);
                    Ok(())
                }),
            )
            .unwrap();
        handle.cancel();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!ran.load(Ordering::Relaxed));
        sched.stop();
        sched.join();
    }
}
