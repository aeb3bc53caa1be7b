//! The scheduled unit of work (§3, §4.1).
//!
//! `Event` carries its own ordering `(time, id)` and a shared cancellation
//! flag so that any thread can cancel it in O(1) without touching the queue
//! it may currently be sitting in. The source design lets the owning
//! scheduler thread write the cancelled flag non-atomically and routes
//! foreign-thread cancellation through a "cancel me" task instead; that
//! split doesn't translate cleanly to Rust, since a plain `Cell<bool>` would
//! make `Event` neither `Send` nor `Sync` and events must move from producer
//! threads onto the consumer queue. We use one `Arc<AtomicBool>` with
//! `Relaxed` ordering for both paths — as cheap as a plain load/store on
//! every mainstream target, and it keeps `EventHandle::cancel` callable from
//! any thread without scheduling a follow-up task.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::ActionError;

/// Process-global, monotonically increasing event id. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        EventId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Action run by an event. Boxed and `FnMut` since most actions are either
/// one-shot closures or a repeating-task's re-schedule body (§4.6), and
/// `Send` so an event may be constructed on one thread and executed on the
/// scheduler's consumer thread.
pub type Action = Box<dyn FnMut() -> Result<(), ActionError> + Send>;

/// A cancellable unit of deferred work (§3).
///
/// Ordering is `(time, id)` only — the action closure carries no `Ord` impl
/// and must never participate in comparisons, so ties are impossible (two
/// distinct events never share an id).
pub struct Event {
    id: EventId,
    time: f64,
    description: String,
    action: Action,
    daemon: bool,
    cancelled: Arc<AtomicBool>,
}

impl Event {
    pub fn new(time: f64, description: impl Into<String>, daemon: bool, action: Action) -> Self {
        Event {
            id: EventId::next(),
            time,
            description: description.into(),
            action,
            daemon,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Overrides the event's sort time in place. Used by queue variants
    /// that fold "do now" submissions into the same ordered structure as
    /// scheduled ones by forcing `time = 0.0` (§4.2, Combined priority).
    pub(crate) fn set_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Cancel this event. Idempotent; callable from the owning scheduler
    /// thread or any other thread (§4.1) — the shared atomic makes both
    /// paths identical in this implementation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// A cheap, `Clone`, thread-safe handle that can cancel this event
    /// without holding a reference to the event itself (needed once the
    /// event has been handed off to a queue).
    pub fn handle(&self) -> EventHandle {
        EventHandle {
            id: self.id,
            time: self.time,
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Run the action exactly once unless cancelled (§4.1). Returns `Ok(())`
    /// without invoking the action if cancelled — cancellation of an
    /// already-executed event is a no-op by construction, since `execute`
    /// is only ever called once per event by a well-behaved scheduler loop.
    pub fn execute(&mut self) -> Result<(), ActionError> {
        if self.is_cancelled() {
            return Ok(());
        }
        (self.action)()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("time", &self.time)
            .field("description", &self.description)
            .field("daemon", &self.daemon)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.time
            .partial_cmp(&other.time)
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Lightweight handle to an outstanding event, safe to hold and cancel from
/// any thread after the event itself has been moved into a queue.
#[derive(Clone, Debug)]
pub struct EventHandle {
    id: EventId,
    time: f64,
    cancelled: Arc<AtomicBool>,
}

impl EventHandle {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

/// Wraps an `Event` to give it the reverse of its natural `Ord`, for use in
/// `BinaryHeap` (a max-heap) where the queue variants need min-heap-by
/// `(time, id)` semantics.
pub struct MinOrder(pub Event);

impl PartialEq for MinOrder {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for MinOrder {}

impl PartialOrd for MinOrder {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for MinOrder {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.0.cmp(&self.0)
    }
}
