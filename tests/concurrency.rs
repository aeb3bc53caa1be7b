//! End-to-end coverage of the cache's single-writer concurrency sentinel
//! (§4.7, §5), driven through the public API: a slow `AtomicListener` held
//! open by one thread, probed from another.

use std::sync::{Arc, Barrier};

use kairos_rt::cache::listeners::AtomicListener;
use kairos_rt::cache::{Cache, Change, Identified};

#[derive(Debug, Clone, PartialEq)]
struct Widget {
    id: u64,
}

impl Identified for Widget {
    type Id = u64;
    fn id(&self) -> u64 {
        self.id
    }
}

struct BarrierListener(Arc<Barrier>);

impl AtomicListener<Widget> for BarrierListener {
    fn state_changed_batch(&self, _changes: &[Change<Widget>]) {
        self.0.wait();
    }
}

#[test]
fn a_read_from_another_thread_is_rejected_while_a_mutation_is_in_flight() {
    let cache = Arc::new(Cache::<Widget>::new(vec![]));
    let barrier = Arc::new(Barrier::new(2));
    cache
        .listeners()
        .on_atomic(Arc::new(BarrierListener(Arc::clone(&barrier))));

    let mutator_cache = Arc::clone(&cache);
    let mutator = std::thread::Builder::new()
        .name("mutator".to_string())
        .spawn(move || {
            mutator_cache.add(Widget { id: 1 }).unwrap();
        })
        .unwrap();

    // The listener blocks on the barrier mid-dispatch, so the mutation is
    // still "in flight" (sentinel held) from the reader's point of view.
    let reader_cache = Arc::clone(&cache);
    let reader = std::thread::Builder::new()
        .name("reader".to_string())
        .spawn(move || {
            // Busy-poll briefly for the mutator to reach the barrier wait.
            for _ in 0..10_000 {
                if reader_cache.get(&1).is_err() {
                    return true;
                }
                std::thread::yield_now();
            }
            false
        })
        .unwrap();

    let rejected = reader.join().unwrap();
    barrier.wait();
    mutator.join().unwrap();

    assert!(rejected, "reader never observed the in-flight mutation");
    assert_eq!(cache.get(&1).unwrap().unwrap().id, 1);
}

#[test]
fn after_a_mutation_completes_reads_from_any_thread_succeed() {
    let cache = Arc::new(Cache::<Widget>::new(vec![]));
    cache.add(Widget { id: 7 }).unwrap();

    let reader_cache = Arc::clone(&cache);
    let found = std::thread::spawn(move || reader_cache.get(&7).unwrap())
        .join()
        .unwrap();
    assert_eq!(found, Some(Widget { id: 7 }));
}
