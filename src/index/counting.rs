//! Optional one-to-many count index (§4.8): maintains `map<K, i64>` counts
//! without materialising the bucket contents, for keys that just need a
//! population count (`OptionalOneToManyCount`). The key function returns
//! `Option<K>`; records mapping to `None` never affect any count.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::cache::Change;
use crate::error::IndexUpdateError;

use super::{Index, IndexHint};

pub struct OptionalOneToManyCount<R, K> {
    name: String,
    hint: IndexHint,
    key_fn: Box<dyn Fn(&R) -> Option<K> + Send + Sync>,
    counts: Mutex<HashMap<K, i64>>,
}

impl<R, K> std::fmt::Debug for OptionalOneToManyCount<R, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionalOneToManyCount")
            .field("name", &self.name)
            .field("keys", &self.counts.lock().unwrap().len())
            .finish()
    }
}

impl<R, K> OptionalOneToManyCount<R, K>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        key_fn: impl Fn(&R) -> Option<K> + Send + Sync + 'static,
    ) -> Self {
        OptionalOneToManyCount {
            name: name.into(),
            hint: IndexHint::default(),
            key_fn: Box::new(key_fn),
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_hint(mut self, hint: IndexHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn hint(&self) -> IndexHint {
        self.hint
    }

    pub fn count(&self, key: &K) -> i64 {
        self.counts.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

impl<R, K> Index<R> for OptionalOneToManyCount<R, K>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn update_all(&self, changes: &[Change<R>]) -> Result<(), IndexUpdateError> {
        let mut counts = self.counts.lock().unwrap();

        for change in changes {
            if let Some(old) = &change.old {
                if let Some(key) = (self.key_fn)(old) {
                    if let Some(count) = counts.get_mut(&key) {
                        *count -= 1;
                        if *count <= 0 {
                            counts.remove(&key);
                        }
                    }
                }
            }
            if let Some(new) = &change.new {
                if let Some(key) = (self.key_fn)(new) {
                    *counts.entry(key).or_insert(0) += 1;
                }
            }
        }

        Ok(())
    }
}
