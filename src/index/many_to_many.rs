//! Many-to-many index (§4.8): each record contributes a set of keys, and
//! each key buckets zero or more records. Never fails on duplicates.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::cache::Change;
use crate::error::IndexUpdateError;

use super::{Index, IndexHint};

pub struct ManyToManyIndex<R, K> {
    name: String,
    hint: IndexHint,
    keys_fn: Box<dyn Fn(&R) -> Vec<K> + Send + Sync>,
    buckets: Mutex<HashMap<K, Vec<R>>>,
}

impl<R, K> std::fmt::Debug for ManyToManyIndex<R, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManyToManyIndex")
            .field("name", &self.name)
            .field("buckets", &self.buckets.lock().unwrap().len())
            .finish()
    }
}

impl<R, K> ManyToManyIndex<R, K>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Clone + PartialEq + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        keys_fn: impl Fn(&R) -> Vec<K> + Send + Sync + 'static,
    ) -> Self {
        Self::with_hint(name, IndexHint::default(), keys_fn)
    }

    pub fn with_hint(
        name: impl Into<String>,
        hint: IndexHint,
        keys_fn: impl Fn(&R) -> Vec<K> + Send + Sync + 'static,
    ) -> Self {
        ManyToManyIndex {
            name: name.into(),
            hint,
            keys_fn: Box::new(keys_fn),
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

impl<R, K> Index<R> for ManyToManyIndex<R, K>
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
                for key in (self.keys_fn)(old) {
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
                for key in (self.keys_fn)(new) {
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
        tags: Vec<String>,
    }

    #[test]
    fn a_record_appears_in_every_tag_bucket() {
        let idx: ManyToManyIndex<W, String> = ManyToManyIndex::new("by_tag", |w| w.tags.clone());
        idx.update_all(&[Change::add(W {
            id: 1,
            tags: vec!["x".into(), "y".into()],
        })])
        .unwrap();
        assert_eq!(idx.bucket(&"x".to_string()).len(), 1);
        assert_eq!(idx.bucket(&"y".to_string()).len(), 1);
    }

    #[test]
    fn duplicate_tag_claims_never_fail() {
        let idx: ManyToManyIndex<W, String> = ManyToManyIndex::new("by_tag", |w| w.tags.clone());
        idx.update_all(&[
            Change::add(W { id: 1, tags: vec!["x".into()] }),
            Change::add(W { id: 2, tags: vec!["x".into()] }),
        ])
        .unwrap();
        assert_eq!(idx.bucket(&"x".to_string()).len(), 2);
    }
}
