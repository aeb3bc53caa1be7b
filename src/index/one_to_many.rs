//! One-to-many index (§4.8): each key buckets zero or more records in
//! insertion order. Never fails on duplicates — any number of records may
//! share a key.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::cache::Change;
use crate::error::IndexUpdateError;

use super::{Index, IndexHint};

pub struct OneToManyIndex<R, K> {
    name: String,
    hint: IndexHint,
    key_fn: Box<dyn Fn(&R) -> Option<K> + Send + Sync>,
    buckets: Mutex<HashMap<K, Vec<R>>>,
}

impl<R, K> std::fmt::Debug for OneToManyIndex<R, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneToManyIndex")
            .field("name", &self.name)
            .field("buckets", &self.buckets.lock().unwrap().len())
            .finish()
    }
}

impl<R, K> OneToManyIndex<R, K>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Clone + PartialEq + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        key_fn: impl Fn(&R) -> Option<K> + Send + Sync + 'static,
    ) -> Self {
        Self::with_hint(name, IndexHint::default(), key_fn)
    }

    pub fn with_hint(
        name: impl Into<String>,
        hint: IndexHint,
        key_fn: impl Fn(&R) -> Option<K> + Send + Sync + 'static,
    ) -> Self {
        OneToManyIndex {
            name: name.into(),
            hint,
            key_fn: Box::new(key_fn),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn hint(&self) -> IndexHint {
        self.hint
    }

    pub fn bucket(&self, key: &K) -> Vec<R> {
        self.buckets.lock().unwrap().get(key).cloned().unwrap_or_default()
    }
}

impl<R, K> Index<R> for OneToManyIndex<R, K>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Clone + PartialEq + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn update_all(&self, changes: &[Change<R>]) -> Result<(), IndexUpdateError> {
        let mut buckets = self.buckets.lock().unwrap();

        for change in changes {
            if let Some(old) = &change.old {
                if let Some(key) = (self.key_fn)(old) {
                    if let Some(bucket) = buckets.get_mut(&key) {
                        bucket.retain(|r| r != old);
                        if bucket.is_empty() {
                            buckets.remove(&key);
                        }
                    }
                }
            }
        }

        for change in changes {
            if let Some(new) = &change.new {
                if let Some(key) = (self.key_fn)(new) {
                    buckets.entry(key).or_default().push(new.clone());
                }
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
    }

    #[test]
    fn duplicates_share_a_bucket_in_insertion_order() {
        let idx: OneToManyIndex<W, String> = OneToManyIndex::new("by_team", |w| Some(w.team.clone()));
        idx.update_all(&[
            Change::add(W { id: 1, team: "red".into() }),
            Change::add(W { id: 2, team: "red".into() }),
        ])
        .unwrap();
        let bucket = idx.bucket(&"red".to_string());
        assert_eq!(bucket.iter().map(|w| w.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn remove_drops_just_that_record() {
        let idx: OneToManyIndex<W, String> = OneToManyIndex::new("by_team", |w| Some(w.team.clone()));
        let w1 = W { id: 1, team: "red".into() };
        let w2 = W { id: 2, team: "red".into() };
        idx.update_all(&[Change::add(w1.clone()), Change::add(w2.clone())])
            .unwrap();
        idx.update_all(&[Change::remove(w1)]).unwrap();
        let bucket = idx.bucket(&"red".to_string());
        assert_eq!(bucket.iter().map(|w| w.id).collect::<Vec<_>>(), vec![2]);
    }
}
