//! The transactional indexed immutable object cache (§3, §4.7, §4.9).
//!
//! `Cache<R>` owns the primary `id -> record` map plus an ordered list of
//! attached indices; every mutation either commits to all of them or rolls
//! every one of them back to its pre-batch state (§4.7's transaction
//! rules). A single [`MutationSentinel`] enforces the concurrency model:
//! one active mutator thread at a time, same-thread reads allowed during
//! its own mutation, everything else fails fast (§5).

pub mod listeners;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::ThreadId;

use crate::error::{CacheUpdateError, ConcurrentMutationError, StoreError};
use crate::index::Index;
use listeners::ListenerRegistry;

/// Records are immutable and identity-based (§3): every record exposes a
/// stable id, and equality/hashing for cache purposes is entirely in terms
/// of that id plus full-value equality for optimistic-update checks.
pub trait Identified {
    type Id: Eq + Hash + Clone + Send + Sync + std::fmt::Debug;
    fn id(&self) -> Self::Id;
}

/// One before/after pair in a batch (§4.7, §4.9). `old = None` models an
/// add; `new = None` models a delete; both `Some` models an update; both
/// `None` is invalid and rejected before anything is touched.
#[derive(Debug, Clone)]
pub struct Change<R> {
    pub old: Option<R>,
    pub new: Option<R>,
}

impl<R> Change<R> {
    pub fn add(new: R) -> Self {
        Change { old: None, new: Some(new) }
    }

    pub fn remove(old: R) -> Self {
        Change { old: Some(old), new: None }
    }

    pub fn update(old: R, new: R) -> Self {
        Change { old: Some(old), new: Some(new) }
    }
}

/// Reverses a whole committed batch for rollback (§4.7): swap each change's
/// old/new and reverse the list order, so replaying it through the same
/// `update_all` path exactly undoes the forward batch.
fn reverse_changes<R: Clone>(changes: &[Change<R>]) -> Vec<Change<R>> {
    changes
        .iter()
        .rev()
        .map(|c| Change {
            old: c.new.clone(),
            new: c.old.clone(),
        })
        .collect()
}

/// Tracks which thread, if any, is currently inside a mutating cache
/// operation (§4.7, §5). A second *write* attempt — even from the same
/// thread, e.g. a listener trying to mutate — fails; same-thread *reads*
/// during its own mutation are permitted; any access from a different
/// thread fails.
pub struct MutationSentinel {
    active: Mutex<Option<(ThreadId, String)>>,
}

impl Default for MutationSentinel {
    fn default() -> Self {
        MutationSentinel {
            active: Mutex::new(None),
        }
    }
}

impl MutationSentinel {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_thread_label() -> String {
        std::thread::current()
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", std::thread::current().id()))
    }

    pub fn check_read(&self) -> Result<(), ConcurrentMutationError> {
        let guard = self.active.lock().unwrap();
        if let Some((id, name)) = &*guard {
            if *id != std::thread::current().id() {
                return Err(ConcurrentMutationError {
                    active_thread: name.clone(),
                    offending_thread: Self::current_thread_label(),
                });
            }
        }
        Ok(())
    }

    fn acquire_write(&self) -> Result<(), ConcurrentMutationError> {
        let mut guard = self.active.lock().unwrap();
        if let Some((_, name)) = &*guard {
            return Err(ConcurrentMutationError {
                active_thread: name.clone(),
                offending_thread: Self::current_thread_label(),
            });
        }
        *guard = Some((std::thread::current().id(), Self::current_thread_label()));
        Ok(())
    }

    fn release(&self) {
        *self.active.lock().unwrap() = None;
    }
}

/// RAII guard releasing the sentinel on drop — including during panic
/// unwinding, so a listener panic (which must propagate, per §4.9, not
/// roll back) still leaves the cache mutable afterwards.
struct WriteGuard<'a> {
    sentinel: &'a MutationSentinel,
}

impl<'a> Drop for WriteGuard<'a> {
    fn drop(&mut self) {
        self.sentinel.release();
    }
}

/// Simple in-process counters (§B: "Metrics counters") — ambient
/// observability, not an exported metrics pipeline.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub adds: AtomicU64,
    pub removes: AtomicU64,
    pub rollbacks: AtomicU64,
    pub listener_exceptions: AtomicU64,
}

pub struct Cache<R>
where
    R: Identified + Clone,
{
    store: RwLock<HashMap<R::Id, R>>,
    indices: Vec<Box<dyn Index<R>>>,
    sentinel: MutationSentinel,
    listeners: ListenerRegistry<R>,
    snapshot_memo: Mutex<Option<Arc<HashMap<R::Id, R>>>>,
    stats: CacheStats,
}

impl<R> std::fmt::Debug for Cache<R>
where
    R: Identified + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("records", &self.store.read().unwrap().len())
            .field("indices", &self.indices.iter().map(|idx| idx.name()).collect::<Vec<_>>())
            .field("adds", &self.stats.adds.load(Ordering::Relaxed))
            .field("removes", &self.stats.removes.load(Ordering::Relaxed))
            .field("rollbacks", &self.stats.rollbacks.load(Ordering::Relaxed))
            .finish()
    }
}

impl<R> Cache<R>
where
    R: Identified + Clone + PartialEq,
{
    pub fn new(indices: Vec<Box<dyn Index<R>>>) -> Self {
        Cache {
            store: RwLock::new(HashMap::new()),
            indices,
            sentinel: MutationSentinel::new(),
            listeners: ListenerRegistry::new(),
            snapshot_memo: Mutex::new(None),
            stats: CacheStats::default(),
        }
    }

    pub fn listeners(&self) -> &ListenerRegistry<R> {
        &self.listeners
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn get(&self, id: &R::Id) -> Result<Option<R>, ConcurrentMutationError> {
        self.sentinel.check_read()?;
        Ok(self.store.read().unwrap().get(id).cloned())
    }

    pub fn contains_id(&self, id: &R::Id) -> Result<bool, ConcurrentMutationError> {
        self.sentinel.check_read()?;
        Ok(self.store.read().unwrap().contains_key(id))
    }

    pub fn size(&self) -> Result<usize, ConcurrentMutationError> {
        self.sentinel.check_read()?;
        Ok(self.store.read().unwrap().len())
    }

    pub fn for_each(&self, mut f: impl FnMut(&R)) -> Result<(), ConcurrentMutationError> {
        self.sentinel.check_read()?;
        for record in self.store.read().unwrap().values() {
            f(record);
        }
        Ok(())
    }

    /// Returns an immutable map of current contents, memoised (§4.7,
    /// §8-invariant-8): repeated calls between successful mutations return
    /// the same `Arc` allocation.
    pub fn snapshot(&self) -> Result<Arc<HashMap<R::Id, R>>, ConcurrentMutationError> {
        self.sentinel.check_read()?;
        let mut memo = self.snapshot_memo.lock().unwrap();
        if let Some(existing) = memo.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let snapshot = Arc::new(self.store.read().unwrap().clone());
        *memo = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    pub fn add(&self, record: R) -> Result<(), CacheUpdateError> {
        self.update_all(vec![Change::add(record)])
    }

    pub fn add_all(&self, records: Vec<R>) -> Result<(), CacheUpdateError> {
        self.update_all(records.into_iter().map(Change::add).collect())
    }

    pub fn delete(&self, id: &R::Id) -> Result<(), CacheUpdateError> {
        let existing = self
            .store
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: format!("{:?}", id) })?;
        self.update_all(vec![Change::remove(existing)])
    }

    pub fn delete_all(&self, ids: &[R::Id]) -> Result<(), CacheUpdateError> {
        let store = self.store.read().unwrap();
        let mut changes = Vec::with_capacity(ids.len());
        for id in ids {
            let existing = store
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound { id: format!("{:?}", id) })?;
            changes.push(Change::remove(existing));
        }
        drop(store);
        self.update_all(changes)
    }

    pub fn update(&self, old: R, new: R) -> Result<(), CacheUpdateError> {
        self.update_all(vec![Change::update(old, new)])
    }

    pub fn clear(&self) -> Result<(), CacheUpdateError> {
        let changes: Vec<Change<R>> = self
            .store
            .read()
            .unwrap()
            .values()
            .cloned()
            .map(Change::remove)
            .collect();
        self.update_all(changes)
    }

    /// Apply a batch atomically (§4.7): either every sub-change applies to
    /// the store and every index, or the whole cache is restored exactly
    /// to its pre-batch contents.
    pub fn update_all(&self, changes: Vec<Change<R>>) -> Result<(), CacheUpdateError> {
        self.sentinel.acquire_write()?;
        let _guard = WriteGuard {
            sentinel: &self.sentinel,
        };

        let mut applied: Vec<Change<R>> = Vec::with_capacity(changes.len());
        {
            let mut store = self.store.write().unwrap();
            for change in &changes {
                if let Err(err) = apply_store_change(&mut store, change) {
                    rollback_store(&mut store, &applied);
                    self.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
                    return Err(err.into());
                }
                applied.push(change.clone());
            }
        }

        for (touched, index) in self.indices.iter().enumerate() {
            if let Err(err) = index.update_all(&changes) {
                for prior in &self.indices[..touched] {
                    prior
                        .update_all(&reverse_changes(&changes))
                        .expect("index rollback must not fail — invariant violation");
                }
                let mut store = self.store.write().unwrap();
                rollback_store(&mut store, &applied);
                self.stats.rollbacks.fetch_add(1, Ordering::Relaxed);
                return Err(CacheUpdateError::from_index(err));
            }
        }

        *self.snapshot_memo.lock().unwrap() = None;
        for change in &changes {
            if change.new.is_some() {
                self.stats.adds.fetch_add(1, Ordering::Relaxed);
            }
            if change.old.is_some() {
                self.stats.removes.fetch_add(1, Ordering::Relaxed);
            }
        }

        // A listener panic must still propagate to the caller (§4.9) — it is
        // counted here, then re-raised with `resume_unwind` rather than
        // swallowed, so `WriteGuard`'s `Drop` still runs during the unwind.
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.listeners.dispatch(&changes);
        })) {
            self.stats.listener_exceptions.fetch_add(1, Ordering::Relaxed);
            std::panic::resume_unwind(payload);
        }
        Ok(())
    }
}

fn apply_store_change<R>(store: &mut HashMap<R::Id, R>, change: &Change<R>) -> Result<(), StoreError>
where
    R: Identified + Clone + PartialEq,
{
    match (&change.old, &change.new) {
        (None, None) => Err(StoreError::EmptyChange),
        (None, Some(new)) => {
            if store.contains_key(&new.id()) {
                return Err(StoreError::AlreadyPresent {
                    id: format!("{:?}", new.id()),
                });
            }
            store.insert(new.id(), new.clone());
            Ok(())
        }
        (Some(old), None) => match store.get(&old.id()) {
            Some(current) if current == old => {
                store.remove(&old.id());
                Ok(())
            }
            Some(_) => Err(StoreError::IdentityMismatch {
                id: format!("{:?}", old.id()),
            }),
            None => Err(StoreError::NotFound {
                id: format!("{:?}", old.id()),
            }),
        },
        (Some(old), Some(new)) => match store.get(&old.id()) {
            Some(current) if current == old => {
                store.remove(&old.id());
                store.insert(new.id(), new.clone());
                Ok(())
            }
            Some(_) => Err(StoreError::IdentityMismatch {
                id: format!("{:?}", old.id()),
            }),
            None => Err(StoreError::NotFound {
                id: format!("{:?}", old.id()),
            }),
        },
    }
}

fn rollback_store<R>(store: &mut HashMap<R::Id, R>, applied: &[Change<R>])
where
    R: Identified + Clone,
{
    for change in applied.iter().rev() {
        match (&change.old, &change.new) {
            (None, Some(new)) => {
                store.remove(&new.id());
            }
            (Some(old), None) => {
                store.insert(old.id(), old.clone());
            }
            (Some(old), Some(new)) => {
                store.remove(&new.id());
                store.insert(old.id(), old.clone());
            }
            (None, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::one_to_one::OneToOneIndex;

    #[derive(Debug, Clone, PartialEq)]
    struct Widget {
        id: u64,
        color: String,
    }

    impl Identified for Widget {
        type Id = u64;
        fn id(&self) -> u64 {
            self.id
        }
    }

    fn widget(id: u64, color: &str) -> Widget {
        Widget { id, color: color.to_string() }
    }

    #[test]
    fn invariant_1_add_then_delete_round_trips() {
        let cache: Cache<Widget> = Cache::new(vec![]);
        cache.add(widget(1, "red")).unwrap();
        cache.delete(&1).unwrap();
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn s4_one_to_one_collision_rolls_back_and_names_index() {
        let index = Box::new(OneToOneIndex::new("by_color", |w: &Widget| Some(w.color.clone())));
        let cache: Cache<Widget> = Cache::new(vec![index]);
        cache.add(widget(1, "red")).unwrap();
        let err = cache.add(widget(2, "red"));
        assert!(err.is_err());
        assert_eq!(cache.size().unwrap(), 1);
        assert_eq!(cache.get(&1).unwrap().unwrap().color, "red");
        assert!(cache.get(&2).unwrap().is_none());
    }

    #[test]
    fn s5_many_index_batch_rolls_back_on_mid_batch_failure() {
        let index = Box::new(OneToOneIndex::new("by_color", |w: &Widget| Some(w.color.clone())));
        let cache: Cache<Widget> = Cache::new(vec![index]);
        cache.add(widget(1, "red")).unwrap();
        cache.add(widget(2, "blue")).unwrap();
        cache.add(widget(3, "green")).unwrap();

        let batch = vec![
            Change::update(widget(1, "red"), widget(1, "red")),
            Change::update(widget(2, "blue"), widget(2, "green")),
        ];
        let err = cache.update_all(batch);
        assert!(err.is_err());

        assert_eq!(cache.get(&1).unwrap().unwrap().color, "red");
        assert_eq!(cache.get(&2).unwrap().unwrap().color, "blue");
        assert_eq!(cache.get(&3).unwrap().unwrap().color, "green");
    }

    #[test]
    fn s6_listener_list_unchanged_after_rolled_back_batch() {
        struct Recorder(Mutex<Vec<(Option<Widget>, Option<Widget>)>>);
        impl listeners::ChangedListener<Widget> for Recorder {
            fn state_changed(&self, old: Option<&Widget>, new: Option<&Widget>) {
                self.0.lock().unwrap().push((old.cloned(), new.cloned()));
            }
        }

        let index = Box::new(OneToOneIndex::new("by_color", |w: &Widget| Some(w.color.clone())));
        let cache: Cache<Widget> = Cache::new(vec![index]);
        cache.add(widget(1, "red")).unwrap();
        cache.add(widget(2, "blue")).unwrap();

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        cache.listeners().on_changed(Arc::clone(&recorder) as Arc<dyn listeners::ChangedListener<Widget>>);

        let batch = vec![
            Change::update(widget(1, "red"), widget(1, "purple")),
            Change::update(widget(2, "blue"), widget(2, "purple")),
        ];
        assert!(cache.update_all(batch).is_err());
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn snapshot_is_memoised_between_mutations() {
        let cache: Cache<Widget> = Cache::new(vec![]);
        cache.add(widget(1, "red")).unwrap();
        let a = cache.snapshot().unwrap();
        let b = cache.snapshot().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cache.add(widget(2, "blue")).unwrap();
        let c = cache.snapshot().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn failed_batch_keeps_snapshot_memo_live() {
        let index = Box::new(OneToOneIndex::new("by_color", |w: &Widget| Some(w.color.clone())));
        let cache: Cache<Widget> = Cache::new(vec![index]);
        cache.add(widget(1, "red")).unwrap();
        let a = cache.snapshot().unwrap();
        assert!(cache.add(widget(2, "red")).is_err());
        let b = cache.snapshot().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn s7_concurrent_mutation_from_another_thread_is_rejected() {
        use std::sync::Barrier;

        let cache = Arc::new(Cache::<Widget>::new(vec![]));
        let barrier = Arc::new(Barrier::new(2));

        let cache_for_mutator = Arc::clone(&cache);
        let barrier_for_mutator = Arc::clone(&barrier);
        let (tx, rx) = std::sync::mpsc::channel();
        let mutator = std::thread::Builder::new()
            .name("T1".to_string())
            .spawn(move || {
                cache_for_mutator.sentinel.acquire_write().unwrap();
                tx.send(()).unwrap();
                barrier_for_mutator.wait();
                cache_for_mutator.sentinel.release();
            })
            .unwrap();

        rx.recv().unwrap();
        let result = std::thread::Builder::new()
            .name("T2".to_string())
            .spawn({
                let cache = Arc::clone(&cache);
                move || cache.get(&1)
            })
            .unwrap()
            .join()
            .unwrap();

        barrier.wait();
        mutator.join().unwrap();

        let err = result.unwrap_err();
        assert_eq!(err.active_thread, "T1");
        assert_eq!(err.offending_thread, "T2");
    }

    #[test]
    fn a_panicking_listener_is_counted_and_still_propagates_and_releases_the_sentinel() {
        struct Panicking;
        impl listeners::ChangedListener<Widget> for Panicking {
            fn state_changed(&self, _old: Option<&Widget>, _new: Option<&Widget>) {
                panic!("boom");
            }
        }

        let cache: Cache<Widget> = Cache::new(vec![]);
        cache.listeners().on_changed(Arc::new(Panicking));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cache.add(widget(1, "red")).unwrap();
        }));
        assert!(result.is_err());

        assert_eq!(cache.stats().listener_exceptions.load(Ordering::Relaxed), 1);
        // the sentinel was released by `WriteGuard::drop` during the unwind
        cache.get(&1).unwrap();
    }
}
