//! One-to-one index (§4.8): each key maps to at most one record, and each
//! record contributes at most one key. A second record mapping to an
//! already-occupied key is rejected and the whole batch rolls itself back.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::cache::Change;
use crate::error::IndexUpdateError;

use super::{Index, IndexHint};

pub struct OneToOneIndex<R, K> {
    name: String,
    hint: IndexHint,
    key_fn: Box<dyn Fn(&R) -> Option<K> + Send + Sync>,
    map: Mutex<HashMap<K, R>>,
}

impl<R, K> std::fmt::Debug for OneToOneIndex<R, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneToOneIndex")
            .field("name", &self.name)
            .field("len", &self.map.lock().unwrap().len())
            .finish()
    }
}

impl<R, K> OneToOneIndex<R, K>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Clone + Send + Sync,
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
        OneToOneIndex {
            name: name.into(),
            hint,
            key_fn: Box::new(key_fn),
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn hint(&self) -> IndexHint {
        self.hint
    }

    pub fn get(&self, key: &K) -> Option<R> {
        self.map.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R, K> Index<R> for OneToOneIndex<R, K>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn update_all(&self, changes: &[Change<R>]) -> Result<(), IndexUpdateError> {
        let mut map = self.map.lock().unwrap();
        let mut removed: Vec<(K, R)> = Vec::new();

        for change in changes {
            if let Some(old) = &change.old {
                if let Some(key) = (self.key_fn)(old) {
                    if let Some(existing) = map.remove(&key) {
                        removed.push((key, existing));
                    }
                }
            }
        }

        let mut added: Vec<K> = Vec::new();
        for change in changes {
            if let Some(new) = &change.new {
                if let Some(key) = (self.key_fn)(new) {
                    if map.contains_key(&key) {
                        for k in added.iter().rev() {
                            map.remove(k);
                        }
                        for (k, r) in removed.into_iter() {
                            map.insert(k, r);
                        }
                        return Err(IndexUpdateError::KeyCollision {
                            index: self.name.clone(),
                        });
                    }
                    map.insert(key.clone(), new.clone());
                    added.push(key);
                }
            }
        }

        Ok(())
    }
}
