//! Sorted one-to-many/many-to-many index (§4.8): each key buckets records
//! in an order maintained by a caller-supplied comparator rather than
//! insertion order. The comparator must be a strict total order over
//! records sharing a key — returning `Equal` for two distinct records is
//! rejected as a tie.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::cache::Change;
use crate::error::IndexUpdateError;

use super::{Index, IndexHint};

pub struct SortedIndex<R, K> {
    name: String,
    hint: IndexHint,
    keys_fn: Box<dyn Fn(&R) -> Vec<K> + Send + Sync>,
    comparator: Box<dyn Fn(&R, &R) -> Ordering + Send + Sync>,
    buckets: Mutex<HashMap<K, Vec<R>>>,
}

impl<R, K> std::fmt::Debug for SortedIndex<R, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedIndex")
            .field("name", &self.name)
            .field("buckets", &self.buckets.lock().unwrap().len())
            .finish()
    }
}

impl<R, K> SortedIndex<R, K>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Clone + PartialEq + Send + Sync,
{
    /// One-to-many sorted index: each record contributes a single key.
    pub fn one_to_many(
        name: impl Into<String>,
        key_fn: impl Fn(&R) -> K + Send + Sync + 'static,
        comparator: impl Fn(&R, &R) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        Self::many_to_many(name, move |r| vec![key_fn(r)], comparator)
    }

    /// Many-to-many sorted index: each record may contribute several keys.
    pub fn many_to_many(
        name: impl Into<String>,
        keys_fn: impl Fn(&R) -> Vec<K> + Send + Sync + 'static,
        comparator: impl Fn(&R, &R) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        SortedIndex {
            name: name.into(),
            hint: IndexHint::default(),
            keys_fn: Box::new(keys_fn),
            comparator: Box::new(comparator),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_hint(mut self, hint: IndexHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn hint(&self) -> IndexHint {
        self.hint
    }

    pub fn bucket(&self, key: &K) -> Vec<R> {
        self.buckets.lock().unwrap().get(key).cloned().unwrap_or_default()
    }

    fn insert_sorted(&self, bucket: &mut Vec<R>, record: R) -> Result<(), IndexUpdateError> {
        let mut low = 0usize;
        let mut high = bucket.len();
        while low < high {
            let mid = (low + high) / 2;
            match (self.comparator)(&bucket[mid], &record) {
                Ordering::Equal => {
                    return Err(IndexUpdateError::ComparatorTie {
                        index: self.name.clone(),
                    })
                }
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
            }
        }
        bucket.insert(low, record);
        Ok(())
    }
}

impl<R, K> Index<R> for SortedIndex<R, K>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Clone + PartialEq + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn update_all(&self, changes: &[Change<R>]) -> Result<(), IndexUpdateError> {
        let mut buckets = self.buckets.lock().unwrap();
        let mut removed: Vec<(K, R)> = Vec::new();

        for change in changes {
            if let Some(old) = &change.old {
                for key in (self.keys_fn)(old) {
                    if let Some(bucket) = buckets.get_mut(&key) {
                        if let Some(pos) = bucket.iter().position(|r| r == old) {
                            removed.push((key.clone(), bucket.remove(pos)));
                        }
                        if bucket.is_empty() {
                            buckets.remove(&key);
                        }
                    }
                }
            }
        }

        let mut added: Vec<(K, R)> = Vec::new();
        for change in changes {
            if let Some(new) = &change.new {
                for key in (self.keys_fn)(new) {
                    let bucket = buckets.entry(key.clone()).or_default();
                    if let Err(err) = self.insert_sorted(bucket, new.clone()) {
                        for (k, r) in added.iter().rev() {
                            if let Some(bucket) = buckets.get_mut(k) {
                                if let Some(pos) = bucket.iter().position(|x| x == r) {
                                    bucket.remove(pos);
                                }
                            }
                        }
                        for (k, r) in removed.into_iter() {
                            let bucket = buckets.entry(k).or_default();
                            let _ = self.insert_sorted(bucket, r);
                        }
                        return Err(err);
                    }
                    added.push((key, new.clone()));
                }
            }
        }

        Ok(())
    }
}
