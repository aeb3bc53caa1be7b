//! Monotonic id generation (§6: "Id supplier (consumed)").
//!
//! The core never synthesises ids itself beyond [`crate::event::EventId`].
//! [`AtomicIdSupplier`] is supplied as a standalone default so the crate is
//! usable without wiring up an external id service, grounded in the
//! `ProcessId::next()` static-counter pattern used for process ids in the
//! teacher runtime's structured-concurrency module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// External id-supplier contract (§6). One counter per entity "kind" so
/// different record families don't share an id space.
pub trait IdSupplier: Send + Sync {
    fn next_id(&self, kind: &str) -> u64;
}

/// A monotonic, per-kind 64-bit counter. Ids start at 1 (0 is reserved as a
/// sentinel "no id" value by convention).
#[derive(Debug, Default)]
pub struct AtomicIdSupplier {
    counters: Mutex<HashMap<String, AtomicU64>>,
}

impl AtomicIdSupplier {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Reset a single kind's counter back to its initial state. Exposed for
    /// deterministic tests only.
    pub fn reset(&self, kind: &str) {
        self.counters.lock().unwrap().remove(kind);
    }
}

impl IdSupplier for AtomicIdSupplier {
    fn next_id(&self, kind: &str) -> u64 {
        let mut guard = self.counters.lock().unwrap();
        let counter = guard
            .entry(kind.to_string())
            .or_insert_with(|| AtomicU64::new(1));
        counter.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_within_a_kind() {
        let supplier = AtomicIdSupplier::new();
        let a = supplier.next_id("widget");
        let b = supplier.next_id("widget");
        let c = supplier.next_id("widget");
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn kinds_are_independent() {
        let supplier = AtomicIdSupplier::new();
        let w1 = supplier.next_id("widget");
        let g1 = supplier.next_id("gadget");
        let w2 = supplier.next_id("widget");
        assert_eq!(w1 + 1, w2);
        assert_eq!(g1, w1);
    }

    #[test]
    fn reset_restarts_counter() {
        let supplier = AtomicIdSupplier::new();
        supplier.next_id("widget");
        supplier.next_id("widget");
        supplier.reset("widget");
        let after = supplier.next_id("widget");
        assert_eq!(after, 1);
    }
}
