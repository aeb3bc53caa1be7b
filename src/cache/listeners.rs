//! Added/Removed/Changed/Atomic listener sets (§4.9). Copy-on-write,
//! matching [`crate::scheduler::ListenerSet`]: registration is rare,
//! dispatch snapshots once per firing.

use std::sync::{Arc, Mutex};

use crate::cache::Change;

pub trait AddedListener<R>: Send + Sync {
    fn state_added(&self, new: &R);
}

pub trait RemovedListener<R>: Send + Sync {
    fn state_removed(&self, old: &R);
}

pub trait ChangedListener<R>: Send + Sync {
    fn state_changed(&self, old: Option<&R>, new: Option<&R>);
}

pub trait AtomicListener<R>: Send + Sync {
    fn state_changed_batch(&self, changes: &[Change<R>]);
}

pub struct ListenerRegistry<R> {
    added: Mutex<Vec<Arc<dyn AddedListener<R>>>>,
    removed: Mutex<Vec<Arc<dyn RemovedListener<R>>>>,
    changed: Mutex<Vec<Arc<dyn ChangedListener<R>>>>,
    atomic: Mutex<Vec<Arc<dyn AtomicListener<R>>>>,
}

impl<R> Default for ListenerRegistry<R> {
    fn default() -> Self {
        ListenerRegistry {
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            changed: Mutex::new(Vec::new()),
            atomic: Mutex::new(Vec::new()),
        }
    }
}

impl<R> ListenerRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_added(&self, listener: Arc<dyn AddedListener<R>>) {
        self.added.lock().unwrap().push(listener);
    }

    pub fn on_removed(&self, listener: Arc<dyn RemovedListener<R>>) {
        self.removed.lock().unwrap().push(listener);
    }

    pub fn on_changed(&self, listener: Arc<dyn ChangedListener<R>>) {
        self.changed.lock().unwrap().push(listener);
    }

    pub fn on_atomic(&self, listener: Arc<dyn AtomicListener<R>>) {
        self.atomic.lock().unwrap().push(listener);
    }

    /// Dispatch every listener kind for one finalized batch, in batch
    /// order (§4.9). Called after the primary store and every index are
    /// already consistent; exceptions are allowed to propagate to the
    /// caller (a listener panic is not caught here — see §4.9's explicit
    /// "must not roll back" rule, which this crate honours by dispatching
    /// outside the rollback path entirely, not by swallowing the panic).
    pub fn dispatch(&self, changes: &[Change<R>]) {
        let added = self.added.lock().unwrap().clone();
        let removed = self.removed.lock().unwrap().clone();
        let changed = self.changed.lock().unwrap().clone();
        let atomic = self.atomic.lock().unwrap().clone();

        for change in changes {
            if let Some(new) = &change.new {
                for listener in &added {
                    listener.state_added(new);
                }
            }
            if let Some(old) = &change.old {
                for listener in &removed {
                    listener.state_removed(old);
                }
            }
            for listener in &changed {
                listener.state_changed(change.old.as_ref(), change.new.as_ref());
            }
        }

        if !changes.is_empty() {
            for listener in &atomic {
                listener.state_changed_batch(changes);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChanged(Arc<AtomicUsize>);
    impl ChangedListener<u32> for CountingChanged {
        fn state_changed(&self, _old: Option<&u32>, _new: Option<&u32>) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn changed_listener_fires_once_per_change_in_batch() {
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.on_changed(Arc::new(CountingChanged(Arc::clone(&count))));

        let changes = vec![
            Change { old: None, new: Some(1) },
            Change { old: None, new: Some(2) },
        ];
        registry.dispatch(&changes);
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn atomic_listener_fires_once_per_batch() {
        struct CountingAtomic(Arc<AtomicUsize>);
        impl AtomicListener<u32> for CountingAtomic {
            fn state_changed_batch(&self, _changes: &[Change<u32>]) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        registry.on_atomic(Arc::new(CountingAtomic(Arc::clone(&count))));

        let changes = vec![
            Change { old: None, new: Some(1) },
            Change { old: Some(1), new: Some(2) },
        ];
        registry.dispatch(&changes);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn empty_batch_fires_no_atomic_listener() {
        struct Panicking;
        impl AtomicListener<u32> for Panicking {
            fn state_changed_batch(&self, _changes: &[Change<u32>]) {
                panic!("should not be called");
            }
        }
        let registry: ListenerRegistry<u32> = ListenerRegistry::new();
        registry.on_atomic(Arc::new(Panicking));
        registry.dispatch(&[]);
    }
}
