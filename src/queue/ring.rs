//! Ring-buffer queue (§4.2): maximum throughput, single physical queue for
//! "now" events. Built on a bounded `crossbeam-channel` (the multi-producer
//! single-consumer primitive this crate already depends on, grounded in the
//! teacher runtime's `mailbox.rs` wrapper around the same channel) standing
//! in for a dedicated sequence-barrier ring buffer — a hand-rolled unsafe
//! ring was deliberately not pursued (see DESIGN.md). Overflow beyond the
//! channel's bounded capacity falls back to a monitor-guarded list; once the
//! channel drains completely its overflow contents are folded into the
//! scheduled priority structure so they are not lost. `remove` is modelled
//! as a tombstone consulted on drain.

use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::event::{Event, EventHandle, EventId, MinOrder};

use super::EventQueue;

const DEFAULT_RING_CAPACITY: usize = 1024;

struct Scheduled {
    heap: BinaryHeap<MinOrder>,
    daemon_count: usize,
}

pub struct RingQueue {
    now_tx: Sender<Event>,
    now_rx: Receiver<Event>,
    now_daemon_count: AtomicUsize,
    now_len: AtomicUsize,
    overflow: Mutex<VecDeque<Event>>,
    scheduled: Mutex<Scheduled>,
    tombstones: Mutex<HashSet<EventId>>,
}

impl RingQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RING_CAPACITY)
    }

    /// `queueCapacity` (§6): bounds the "now" channel before events spill
    /// into the overflow list.
    pub fn with_capacity(capacity: usize) -> Self {
        let (now_tx, now_rx) = bounded(capacity);
        RingQueue {
            now_tx,
            now_rx,
            now_daemon_count: AtomicUsize::new(0),
            now_len: AtomicUsize::new(0),
            overflow: Mutex::new(VecDeque::new()),
            scheduled: Mutex::new(Scheduled {
                heap: BinaryHeap::new(),
                daemon_count: 0,
            }),
            tombstones: Mutex::new(HashSet::new()),
        }
    }

    fn is_tombstoned(&self, id: EventId) -> bool {
        self.tombstones.lock().unwrap().remove(&id)
    }

    /// Once the ring channel is observed empty, move any overflowed "now"
    /// events into the scheduled priority structure so they are never lost,
    /// per the documented overflow fallback.
    fn drain_overflow_into_scheduled(&self) {
        let mut overflow = self.overflow.lock().unwrap();
        if overflow.is_empty() {
            return;
        }
        let mut scheduled = self.scheduled.lock().unwrap();
        for event in overflow.drain(..) {
            if event.is_daemon() {
                scheduled.daemon_count += 1;
            }
            scheduled.heap.push(MinOrder(event));
        }
    }

    fn pop_live_scheduled(&self, now: f64) -> Option<Event> {
        let mut scheduled = self.scheduled.lock().unwrap();
        loop {
            let ready = matches!(scheduled.heap.peek(), Some(MinOrder(e)) if e.time() <= now);
            if !ready {
                return None;
            }
            let MinOrder(event) = scheduled.heap.pop()?;
            if event.is_daemon() {
                scheduled.daemon_count = scheduled.daemon_count.saturating_sub(1);
            }
            if self.is_tombstoned(event.id()) {
                continue;
            }
            return Some(event);
        }
    }

    fn pop_live_now(&self) -> Option<Event> {
        loop {
            match self.now_rx.try_recv() {
                Ok(event) => {
                    self.now_len.fetch_sub(1, Ordering::Relaxed);
                    if event.is_daemon() {
                        self.now_daemon_count.fetch_sub(1, Ordering::Relaxed);
                    }
                    if self.is_tombstoned(event.id()) {
                        continue;
                    }
                    return Some(event);
                }
                Err(TryRecvError::Empty) => {
                    self.drain_overflow_into_scheduled();
                    return None;
                }
                Err(TryRecvError::Disconnected) => return None,
            }
        }
    }
}

impl Default for RingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue for RingQueue {
    fn add_now(&self, event: Event) {
        let daemon = event.is_daemon();
        match self.now_tx.try_send(event) {
            Ok(()) => {
                self.now_len.fetch_add(1, Ordering::Relaxed);
                if daemon {
                    self.now_daemon_count.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(err) => {
                self.overflow.lock().unwrap().push_back(err.into_inner());
            }
        }
    }

    fn add_scheduled(&self, event: Event) {
        let mut scheduled = self.scheduled.lock().unwrap();
        if event.is_daemon() {
            scheduled.daemon_count += 1;
        }
        scheduled.heap.push(MinOrder(event));
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
        self.now_rx.is_empty() && self.overflow.lock().unwrap().is_empty()
    }

    fn has_only_daemons(&self) -> bool {
        let total = self.len();
        let overflow = self.overflow.lock().unwrap();
        let overflow_daemons = overflow.iter().filter(|e| e.is_daemon()).count();
        let daemons = self.now_daemon_count.load(Ordering::Relaxed)
            + overflow_daemons
            + self.scheduled.lock().unwrap().daemon_count;
        total == daemons
    }

    fn len(&self) -> usize {
        self.now_rx.len()
            + self.overflow.lock().unwrap().len()
            + self.scheduled.lock().unwrap().heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(time: f64, daemon: bool) -> Event {
        Event::new(time, "t", daemon, Box::new(|| Ok(())))
    }

    #[test]
    fn now_events_drain_before_scheduled() {
        let q = RingQueue::new();
        q.add_scheduled(ev(0.0, false));
        q.add_now(ev(0.0, false));
        assert!(q.poll_next_now().is_some());
    }

    #[test]
    fn overflow_beyond_capacity_is_not_lost() {
        let q = RingQueue::new();
        for _ in 0..(DEFAULT_RING_CAPACITY + 10) {
            q.add_now(ev(0.0, false));
        }
        assert_eq!(q.len(), DEFAULT_RING_CAPACITY + 10);
        let mut drained = 0;
        while q.poll_next(0.0).is_some() {
            drained += 1;
            if drained > DEFAULT_RING_CAPACITY + 10 {
                break;
            }
        }
        assert_eq!(drained, DEFAULT_RING_CAPACITY + 10);
    }

    #[test]
    fn configured_capacity_governs_when_overflow_kicks_in() {
        let q = RingQueue::with_capacity(4);
        for _ in 0..4 {
            q.add_now(ev(0.0, false));
        }
        assert!(q.overflow.lock().unwrap().is_empty());
        q.add_now(ev(0.0, false));
        assert_eq!(q.overflow.lock().unwrap().len(), 1);
    }

    #[test]
    fn remove_is_tombstoned() {
        let q = RingQueue::new();
        let event = ev(1.0, false);
        let handle = event.handle();
        q.add_scheduled(event);
        q.remove(&handle);
        assert!(q.poll_next_scheduled(5.0).is_none());
    }
}
