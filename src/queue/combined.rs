//! Combined priority queue (§4.2): lowest throughput, used for debugging.
//! A single mutex guards one ordered priority structure keyed on
//! `(time, id)`; `add_now` enqueues with `time = 0.0` so "now" events always
//! sort ahead of any timed event.

use std::collections::{BinaryHeap, HashSet};
use std::sync::Mutex;

use crate::event::{Event, EventHandle, EventId, MinOrder};

use super::EventQueue;

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<MinOrder>,
    tombstones: HashSet<EventId>,
    daemon_count: usize,
}

pub struct CombinedQueue {
    inner: Mutex<Inner>,
}

impl CombinedQueue {
    pub fn new() -> Self {
        CombinedQueue {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn push(inner: &mut Inner, event: Event) {
        if event.is_daemon() {
            inner.daemon_count += 1;
        }
        inner.heap.push(MinOrder(event));
    }

    /// Pop the next non-tombstoned event, discarding tombstoned ones along
    /// the way.
    fn pop_live(inner: &mut Inner) -> Option<Event> {
        loop {
            let MinOrder(event) = inner.heap.pop()?;
            if inner.tombstones.remove(&event.id()) {
                if event.is_daemon() {
                    inner.daemon_count = inner.daemon_count.saturating_sub(1);
                }
                continue;
            }
            if event.is_daemon() {
                inner.daemon_count = inner.daemon_count.saturating_sub(1);
            }
            return Some(event);
        }
    }
}

impl Default for CombinedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue for CombinedQueue {
    fn add_now(&self, mut event: Event) {
        event.set_time(0.0);
        let mut inner = self.inner.lock().unwrap();
        Self::push(&mut inner, event);
    }

    fn add_scheduled(&self, event: Event) {
        let mut inner = self.inner.lock().unwrap();
        Self::push(&mut inner, event);
    }

    fn remove(&self, handle: &EventHandle) {
        let mut inner = self.inner.lock().unwrap();
        inner.tombstones.insert(handle.id());
    }

    fn poll_next(&self, now: f64) -> Option<Event> {
        let mut inner = self.inner.lock().unwrap();
        if inner.heap.peek().map(|MinOrder(e)| e.time() <= now) == Some(true) {
            Self::pop_live(&mut inner)
        } else {
            None
        }
    }

    fn poll_next_now(&self) -> Option<Event> {
        let mut inner = self.inner.lock().unwrap();
        if inner.heap.peek().map(|MinOrder(e)| e.time()) == Some(0.0) {
            Self::pop_live(&mut inner)
        } else {
            None
        }
    }

    fn poll_next_scheduled(&self, now: f64) -> Option<Event> {
        let mut inner = self.inner.lock().unwrap();
        if inner.heap.peek().map(|MinOrder(e)| e.time() <= now) == Some(true) {
            Self::pop_live(&mut inner)
        } else {
            None
        }
    }

    fn is_empty_now(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        !matches!(inner.heap.peek(), Some(MinOrder(e)) if e.time() == 0.0)
    }

    fn has_only_daemons(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.heap.len() == inner.daemon_count
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }
}
