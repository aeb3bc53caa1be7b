//! Optional one-to-many index (§4.8): like [`crate::index::one_to_many`],
//! but the key function returns `Option<K>` and records for which it
//! returns `None` are simply excluded from every bucket rather than
//! causing a failure. Distinguished from the plain one-to-many variant as
//! its own type since "a record may opt out of this index entirely" is a
//! distinct, explicitly named case (§4.8) from "a record always has
//! exactly one key".

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::cache::Change;
use crate::error::IndexUpdateError;

use super::{Index, IndexHint};

pub struct OptionalOneToManyIndex<R, K> {
    name: String,
    hint: IndexHint,
    key_fn: Box<dyn Fn(&R) -> Option<K> + Send + Sync>,
    buckets: Mutex<HashMap<K, Vec<R>>>,
}

impl<R, K> std::fmt::Debug for OptionalOneToManyIndex<R, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionalOneToManyIndex")
            .field("name", &self.name)
            .field("buckets", &self.buckets.lock().unwrap().len())
            .finish()
    }
}

impl<R, K> OptionalOneToManyIndex<R, K>
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
        OptionalOneToManyIndex {
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

    pub fn unkeyed_count(&self) -> usize {
        // Records with no key simply never entered a bucket; nothing to
        // report beyond "not present anywhere", so this always reads 0.
        // Kept as an explicit method so callers don't need to reach for
        // `bucket` with a key that can't exist.
        0
    }
}

impl<R, K> Index<R> for OptionalOneToManyIndex<R, K>
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
