//! Cached global sort (§4.8): a derived total order over every record in
//! the cache, maintained as a single sorted `Vec` rather than per-key
//! buckets. Ties (comparator returning `Equal` for two distinct records)
//! are rejected, same as [`crate::index::sorted`].

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use crate::cache::Change;
use crate::error::IndexUpdateError;

use super::{Index, IndexHint};

pub struct CachedSort<R> {
    name: String,
    hint: IndexHint,
    comparator: Box<dyn Fn(&R, &R) -> Ordering + Send + Sync>,
    sorted: Mutex<Vec<R>>,
    snapshot_memo: Mutex<Option<Arc<Vec<R>>>>,
}

impl<R> std::fmt::Debug for CachedSort<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSort")
            .field("name", &self.name)
            .field("len", &self.sorted.lock().unwrap().len())
            .finish()
    }
}

impl<R> CachedSort<R>
where
    R: Clone + PartialEq + Send + Sync,
{
    pub fn new(name: impl Into<String>, comparator: impl Fn(&R, &R) -> Ordering + Send + Sync + 'static) -> Self {
        CachedSort {
            name: name.into(),
            hint: IndexHint::default(),
            comparator: Box::new(comparator),
            sorted: Mutex::new(Vec::new()),
            snapshot_memo: Mutex::new(None),
        }
    }

    pub fn with_hint(mut self, hint: IndexHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn hint(&self) -> IndexHint {
        self.hint
    }

    /// Memoised (§4.8): returns the same `Arc` across repeated calls until
    /// the next successful mutation invalidates it.
    pub fn snapshot(&self) -> Arc<Vec<R>> {
        let mut memo = self.snapshot_memo.lock().unwrap();
        if let Some(existing) = memo.as_ref() {
            return Arc::clone(existing);
        }
        let snapshot = Arc::new(self.sorted.lock().unwrap().clone());
        *memo = Some(Arc::clone(&snapshot));
        snapshot
    }

    fn insert_sorted(&self, list: &mut Vec<R>, record: R) -> Result<(), IndexUpdateError> {
        let mut low = 0usize;
        let mut high = list.len();
        while low < high {
            let mid = (low + high) / 2;
            match (self.comparator)(&list[mid], &record) {
                Ordering::Equal => {
                    return Err(IndexUpdateError::ComparatorTie {
                        index: self.name.clone(),
                    })
                }
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
            }
        }
        list.insert(low, record);
        Ok(())
    }
}

impl<R> Index<R> for CachedSort<R>
where
    R: Clone + PartialEq + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn update_all(&self, changes: &[Change<R>]) -> Result<(), IndexUpdateError> {
        let mut list = self.sorted.lock().unwrap();
        let mut removed: Vec<R> = Vec::new();

        for change in changes {
            if let Some(old) = &change.old {
                if let Some(pos) = list.iter().position(|r| r == old) {
                    removed.push(list.remove(pos));
                }
            }
        }

        let mut added: Vec<R> = Vec::new();
        for change in changes {
            if let Some(new) = &change.new {
                if let Err(err) = self.insert_sorted(&mut list, new.clone()) {
                    for r in added.iter().rev() {
                        if let Some(pos) = list.iter().position(|x| x == r) {
                            list.remove(pos);
                        }
                    }
                    for r in removed.into_iter() {
                        let _ = self.insert_sorted(&mut list, r);
                    }
                    return Err(err);
                }
                added.push(new.clone());
            }
        }

        *self.snapshot_memo.lock().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    struct W {
        id: u64,
        rank: i64,
    }

    #[test]
    fn snapshot_is_globally_sorted() {
        let idx: CachedSort<W> = CachedSort::new("by_rank", |a, b| a.rank.cmp(&b.rank));
        idx.update_all(&[
            Change::add(W { id: 1, rank: 3 }),
            Change::add(W { id: 2, rank: 1 }),
            Change::add(W { id: 3, rank: 2 }),
        ])
        .unwrap();
        let ids: Vec<u64> = idx.snapshot().iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn tie_rejects_the_whole_batch() {
        let idx: CachedSort<W> = CachedSort::new("by_rank", |a, b| a.rank.cmp(&b.rank));
        idx.update_all(&[Change::add(W { id: 1, rank: 5 })]).unwrap();
        let err = idx.update_all(&[Change::add(W { id: 2, rank: 5 })]).unwrap_err();
        assert!(matches!(err, IndexUpdateError::ComparatorTie { .. }));
        assert_eq!(idx.snapshot().len(), 1);
    }

    #[test]
    fn snapshot_is_memoised_between_mutations() {
        let idx: CachedSort<W> = CachedSort::new("by_rank", |a, b| a.rank.cmp(&b.rank));
        idx.update_all(&[Change::add(W { id: 1, rank: 3 })]).unwrap();
        let a = idx.snapshot();
        let b = idx.snapshot();
        assert!(Arc::ptr_eq(&a, &b));
        idx.update_all(&[Change::add(W { id: 2, rank: 1 })]).unwrap();
        let c = idx.snapshot();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn rejected_batch_keeps_snapshot_memo_live() {
        let idx: CachedSort<W> = CachedSort::new("by_rank", |a, b| a.rank.cmp(&b.rank));
        idx.update_all(&[Change::add(W { id: 1, rank: 5 })]).unwrap();
        let a = idx.snapshot();
        assert!(idx.update_all(&[Change::add(W { id: 2, rank: 5 })]).is_err());
        let b = idx.snapshot();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
