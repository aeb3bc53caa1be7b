//! Split ring-buffer queue (§4.2): lowest latency for "now" events. Two
//! independent bounded channels — one for "now", one for scheduled — with
//! "now" always winning when both have something ready.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::event::{Event, EventHandle, EventId};

use super::EventQueue;

const DEFAULT_RING_CAPACITY: usize = 1024;

pub struct SplitRingQueue {
    now_tx: Sender<Event>,
    now_rx: Receiver<Event>,
    now_daemon_count: AtomicUsize,
    scheduled_tx: Sender<Event>,
    scheduled_rx: Receiver<Event>,
    scheduled_daemon_count: AtomicUsize,
    /// Overflow for either ring once its bounded capacity is exceeded —
    /// kept as an unbounded spillover list rather than growing the ring, to
    /// preserve the bounded low-latency property of the hot path.
    overflow: Mutex<Vec<Event>>,
    tombstones: Mutex<HashSet<EventId>>,
}

impl SplitRingQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    /// `queueCapacity` (§6): bounds each of the two independent rings
    /// before events spill into the shared overflow list.
    pub fn with_capacity(capacity: usize) -> Self {
        let (now_tx, now_rx) = bounded(capacity);
        let (scheduled_tx, scheduled_rx) = bounded(capacity);
        SplitRingQueue {
            now_tx,
            now_rx,
            now_daemon_count: AtomicUsize::new(0),
            scheduled_tx,
            scheduled_rx,
            scheduled_daemon_count: AtomicUsize::new(0),
            overflow: Mutex::new(Vec::new()),
            tombstones: Mutex::new(HashSet::new()),
        }
    }

    fn is_tombstoned(&self, id: EventId) -> bool {
        self.tombstones.lock().unwrap().remove(&id)
    }

    fn pop_live_now(&self) -> Option<Event> {
        loop {
            match self.now_rx.try_recv() {
                Ok(event) => {
                    if event.is_daemon() {
                        self.now_daemon_count.fetch_sub(1, Ordering::Relaxed);
                    }
                    if self.is_tombstoned(event.id()) {
                        continue;
                    }
                    return Some(event);
                }
                Err(_) => return None,
            }
        }
    }

    fn pop_live_scheduled(&self, now: f64) -> Option<Event> {
        loop {
            let next = {
                let mut overflow = self.overflow.lock().unwrap();
                if let Some(pos) = overflow
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.time() <= now)
                    .min_by(|(_, a), (_, b)| a.cmp(b))
                    .map(|(i, _)| i)
                {
                    Some(overflow.swap_remove(pos))
                } else {
                    None
                }
            };
            if let Some(event) = next {
                if self.is_tombstoned(event.id()) {
                    continue;
                }
                return Some(event);
            }
            match self.scheduled_rx.try_recv() {
                Ok(event) if event.time() <= now => {
                    if event.is_daemon() {
                        self.scheduled_daemon_count.fetch_sub(1, Ordering::Relaxed);
                    }
                    if self.is_tombstoned(event.id()) {
                        continue;
                    }
                    return Some(event);
                }
                Ok(event) => {
                    // Not due yet; stash it since the channel has no
                    // peek-without-removing operation.
                    self.overflow.lock().unwrap().push(event);
                    return None;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }
}

impl Default for SplitRingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue for SplitRingQueue {
    fn add_now(&self, event: Event) {
        let daemon = event.is_daemon();
        match self.now_tx.try_send(event) {
            Ok(()) => {
                if daemon {
                    self.now_daemon_count.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => self.overflow.lock().unwrap().push(err.into_inner()),
        }
    }

    fn add_scheduled(&self, event: Event) {
        let daemon = event.is_daemon();
        match self.scheduled_tx.try_send(event) {
            Ok(()) => {
                if daemon {
                    self.scheduled_daemon_count.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => self.overflow.lock().unwrap().push(err.into_inner()),
        }
    }

    fn remove(&self, handle: &EventHandle) {
        self.tombstones.lock().unwrap().insert(handle.id());
    }

    fn poll_next(&self, now: f64) -> Option<Event> {
        if let Some(event) = self.pop_live_now() {
            return Some(event);
        }
        self.pop_live_scheduled(now)
    }

    fn poll_next_now(&self) -> Option<Event> {
        self.pop_live_now()
    }

    fn poll_next_scheduled(&self, now: f64) -> Option<Event> {
        self.pop_live_scheduled(now)
    }

    fn is_empty_now(&self) -> bool {
        self.now_rx.is_empty()
    }

    fn has_only_daemons(&self) -> bool {
        let total = self.len();
        let overflow = self.overflow.lock().unwrap();
        let overflow_daemons = overflow.iter().filter(|e| e.is_daemon()).count();
        let daemons = self.now_daemon_count.load(Ordering::Relaxed)
            + self.scheduled_daemon_count.load(Ordering::Relaxed)
            + overflow_daemons;
        total == daemons
    }

    fn len(&self) -> usize {
        self.now_rx.len() + self.scheduled_rx.len() + self.overflow.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(time: f64, daemon: bool) -> Event {
        Event::new(time, "t", daemon, Box::new(|| Ok(())))
    }

    #[test]
    fn now_wins_when_both_rings_are_ready() {
        let q = SplitRingQueue::new();
        q.add_scheduled(ev(0.0, false));
        let now_event = ev(0.0, false);
        let now_id = now_event.id();
        q.add_now(now_event);
        let first = q.poll_next(0.0).unwrap();
        assert_eq!(first.id(), now_id);
    }

    #[test]
    fn scheduled_not_due_is_withheld() {
        let q = SplitRingQueue::new();
        q.add_scheduled(ev(100.0, false));
        assert!(q.poll_next(10.0).is_none());
        assert!(q.poll_next(100.0).is_some());
    }

    #[test]
    fn configured_capacity_governs_when_overflow_kicks_in() {
        let q = SplitRingQueue::with_capacity(4);
        for _ in 0..4 {
            q.add_now(ev(0.0, false));
        }
        assert!(q.overflow.lock().unwrap().is_empty());
        q.add_now(ev(0.0, false));
        assert_eq!(q.overflow.lock().unwrap().len(), 1);
    }

    #[test]
    fn remove_is_tombstoned() {
        let q = SplitRingQueue::new();
        let event = ev(1.0, false);
        let handle = event.handle();
        q.add_scheduled(event);
        q.remove(&handle);
        assert!(q.poll_next_scheduled(5.0).is_none());
    }
}
