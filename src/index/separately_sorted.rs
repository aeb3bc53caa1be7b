//! Separately-sorted index (§4.8): like [`crate::index::sorted`], but the
//! comparator is produced per-key by a factory rather than shared across
//! every bucket — the factory is only ever called with keys that already
//! have a bucket, and the comparator it returns is only ever invoked on
//! records sharing that one key.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::cache::Change;
use crate::error::IndexUpdateError;

use super::{Index, IndexHint};

type Comparator<R> = Box<dyn Fn(&R, &R) -> Ordering + Send + Sync>;

pub struct SeparatelySortedIndex<R, K> {
    name: String,
    hint: IndexHint,
    key_fn: Box<dyn Fn(&R) -> K + Send + Sync>,
    comparator_factory: Box<dyn Fn(&K) -> Comparator<R> + Send + Sync>,
    buckets: Mutex<HashMap<K, Vec<R>>>,
}

impl<R, K> std::fmt::Debug for SeparatelySortedIndex<R, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeparatelySortedIndex")
            .field("name", &self.name)
            .field("buckets", &self.buckets.lock().unwrap().len())
            .finish()
    }
}

impl<R, K> SeparatelySortedIndex<R, K>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Clone + PartialEq + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        key_fn: impl Fn(&R) -> K + Send + Sync + 'static,
        comparator_factory: impl Fn(&K) -> Comparator<R> + Send + Sync + 'static,
    ) -> Self {
        SeparatelySortedIndex {
            name: name.into(),
            hint: IndexHint::default(),
            key_fn: Box::new(key_fn),
            comparator_factory: Box::new(comparator_factory),
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

    fn insert_sorted(&self, key: &K, bucket: &mut Vec<R>, record: R) -> Result<(), IndexUpdateError> {
        let comparator = (self.comparator_factory)(key);
        let mut low = 0usize;
        let mut high = bucket.len();
        while low < high {
            let mid = (low + high) / 2;
            match comparator(&bucket[mid], &record) {
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

impl<R, K> Index<R> for SeparatelySortedIndex<R, K>
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
                let key = (self.key_fn)(old);
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

        let mut added: Vec<(K, R)> = Vec::new();
        for change in changes {
            if let Some(new) = &change.new {
                let key = (self.key_fn)(new);
                let bucket = buckets.entry(key.clone()).or_default();
                if let Err(err) = self.insert_sorted(&key, bucket, new.clone()) {
                    for (k, r) in added.iter().rev() {
                        if let Some(bucket) = buckets.get_mut(k) {
                            if let Some(pos) = bucket.iter().position(|x| x == r) {
                                bucket.remove(pos);
                            }
                        }
                    }
                    for (k, r) in removed.into_iter() {
                        let bucket = buckets.entry(k.clone()).or_default();
                        let _ = self.insert_sorted(&k, bucket, r);
                    }
                    return Err(err);
                }
                added.push((key, new.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    struct W {
        id: u64,
        team: String,
        score: i64,
    }

    #[test]
    fn each_key_sorts_by_its_own_comparator() {
        let idx: SeparatelySortedIndex<W, String> = SeparatelySortedIndex::new(
            "by_team",
            |w| w.team.clone(),
            |key: &String| -> Comparator<W> {
                if key == "red" {
                    Box::new(|a, b| a.score.cmp(&b.score))
                } else {
                    Box::new(|a, b| b.score.cmp(&a.score))
                }
            },
        );
        idx.update_all(&[
            Change::add(W { id: 1, team: "red".into(), score: 1 }),
            Change::add(W { id: 2, team: "red".into(), score: 3 }),
            Change::add(W { id: 3, team: "blue".into(), score: 1 }),
            Change::add(W { id: 4, team: "blue".into(), score: 3 }),
        ])
        .unwrap();
        assert_eq!(
            idx.bucket(&"red".to_string()).iter().map(|w| w.id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(
            idx.bucket(&"blue".to_string()).iter().map(|w| w.id).collect::<Vec<_>>(),
            vec![4, 3]
        );
    }
}
