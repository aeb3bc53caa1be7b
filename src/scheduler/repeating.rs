//! Repeating task helper (§4.6), built on top of any [`Scheduler`].
//!
//! A single record captures `(time, period, action, fixed_delay?,
//! cancelled)`. The first tick is scheduled at construction; each
//! subsequent execution re-schedules the next one before returning,
//! computing `next = now + period` (fixed-delay) or `time + period`
//! (fixed-rate). The returned [`RepeatingTaskHandle`] shares a
//! cancellation flag with the in-flight ticks so cancelling it stops
//! future re-scheduling without needing to touch the queue (§4.6:
//! "cancellation does not remove from the queue").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{ActionError, SchedulerError};
use crate::event::EventHandle;

use super::Scheduler;

#[derive(Clone)]
pub struct RepeatingTaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl RepeatingTaskHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Schedule `action` to run repeatedly starting at `start_time`, every
/// `period` time units, on `scheduler`.
///
/// `fixed_delay`: if true, the next tick is `now_of_this_tick + period`
/// (so a slow action pushes later ticks back); if false (fixed-rate), the
/// next tick is `this_tick's_scheduled_time + period` regardless of how
/// long the action took.
pub fn schedule_repeating<S>(
    scheduler: Arc<S>,
    start_time: f64,
    period: f64,
    daemon: bool,
    fixed_delay: bool,
    mut action: Box<dyn FnMut() -> Result<(), ActionError> + Send>,
) -> Result<RepeatingTaskHandle, SchedulerError>
where
    S: Scheduler + Send + Sync + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let handle = RepeatingTaskHandle {
        cancelled: Arc::clone(&cancelled),
    };

    schedule_tick(scheduler, start_time, period, daemon, fixed_delay, cancelled, {
        let tick = Arc::new(Mutex::new(move || action()));
        move || {
            let mut guard = tick.lock().unwrap();
            (guard)()
        }
    })?;

    Ok(handle)
}

fn schedule_tick<S>(
    scheduler: Arc<S>,
    time: f64,
    period: f64,
    daemon: bool,
    fixed_delay: bool,
    cancelled: Arc<AtomicBool>,
    action: impl FnMut() -> Result<(), ActionError> + Send + Clone + 'static,
) -> Result<EventHandle, SchedulerError>
where
    S: Scheduler + Send + Sync + 'static,
{
    let scheduled_time = time;
    let scheduler_for_closure = Arc::clone(&scheduler);
    let cancelled_for_closure = Arc::clone(&cancelled);
    let mut action_for_closure = action.clone();

    scheduler.do_at(
        time,
        "repeating-task-tick",
        daemon,
        Box::new(move || {
            if cancelled_for_closure.load(Ordering::Relaxed) {
                return Ok(());
            }
            let result = (action_for_closure)();
            if cancelled_for_closure.load(Ordering::Relaxed) {
                return result;
            }
            let next = if fixed_delay {
                scheduler_for_closure.now() + period
            } else {
                scheduled_time + period
            };
            let _ = schedule_tick(
                Arc::clone(&scheduler_for_closure),
                next,
                period,
                daemon,
                fixed_delay,
                Arc::clone(&cancelled_for_closure),
                action.clone(),
            );
            result
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::discrete::{DiscreteScheduler, DiscreteSchedulerConfig};
    use crate::time::VirtualTimeProvider;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn s7_fixed_rate_produces_arithmetic_progression() {
        let sched = Arc::new(DiscreteScheduler::new(
            DiscreteSchedulerConfig::default(),
            Arc::new(VirtualTimeProvider::new(0.0)),
        ));
        sched.pause().unwrap();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let ticks_clone = Arc::clone(&ticks);
        let sched_for_action = Arc::clone(&sched);

        schedule_repeating(
            Arc::clone(&sched),
            10.0,
            5.0,
            false,
            false,
            Box::new(move || {
                ticks_clone.lock().unwrap().push(sched_for_action.now());
                Ok(())
            }),
        )
        .unwrap();

        // A fixed-rate task reschedules itself indefinitely, so it must be
        // driven through a bounded run rather than raw `run_pending`.
        sched.run_until_time(25.0).unwrap();

        let recorded = ticks.lock().unwrap().clone();
        assert_eq!(recorded, vec![10.0, 15.0, 20.0, 25.0]);
    }

    #[test]
    fn cancelling_stops_future_ticks() {
        let sched = Arc::new(DiscreteScheduler::new(
            DiscreteSchedulerConfig::default(),
            Arc::new(VirtualTimeProvider::new(0.0)),
        ));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let handle = schedule_repeating(
            Arc::clone(&sched),
            10.0,
            5.0,
            false,
            false,
            Box::new(move || {
                count_clone.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
        )
        .unwrap();

        sched.run_pending();
        handle.cancel();
        sched.run_pending();
        sched.run_pending();

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
