//! Many-to-one index (§4.8): each record contributes a *set* of keys, but
//! each key may still map to only one record — a second record mapping to
//! an already-occupied key (via any of its keys) is rejected.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::cache::Change;
use crate::error::IndexUpdateError;

use super::{Index, IndexHint};

pub struct ManyToOneIndex<R, K> {
    name: String,
    hint: IndexHint,
    keys_fn: Box<dyn Fn(&R) -> Vec<K> + Send + Sync>,
    map: Mutex<HashMap<K, R>>,
}

impl<R, K> std::fmt::Debug for ManyToOneIndex<R, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManyToOneIndex")
            .field("name", &self.name)
            .field("keys", &self.map.lock().unwrap().len())
            .finish()
    }
}

impl<R, K> ManyToOneIndex<R, K>
where
    K: Eq + Hash + Clone + Send + Sync,
    R: Clone + Send + Sync,
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
        ManyToOneIndex {
            name: name.into(),
            hint,
            keys_fn: Box::new(keys_fn),
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn hint(&self) -> IndexHint {
        self.hint
    }

    pub fn get(&self, key: &K) -> Option<R> {
        self.map.lock().unwrap().get(key).cloned()
    }
}

impl<R, K> Index<R> for ManyToOneIndex<R, K>
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
                for key in (self.keys_fn)(old) {
                    if let Some(existing) = map.remove(&key) {
                        removed.push((key, existing));
                    }
                }
            }
        }

        let mut added: Vec<K> = Vec::new();
        for change in changes {
            if let Some(new) = &change.new {
                for key in (self.keys_fn)(new) {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Debug)]
    struct W {
        id: u64,
        aliases: Vec<String>,
    }

    #[test]
    fn every_alias_resolves_to_the_same_record() {
        let idx: ManyToOneIndex<W, String> =
            ManyToOneIndex::new("by_alias", |w| w.aliases.clone());
        idx.update_all(&[Change::add(W {
            id: 1,
            aliases: vec!["a".into(), "b".into()],
        })])
        .unwrap();
        assert_eq!(idx.get(&"a".to_string()).unwrap().id, 1);
        assert_eq!(idx.get(&"b".to_string()).unwrap().id, 1);
    }

    #[test]
    fn second_record_claiming_an_occupied_alias_is_rejected() {
        let idx: ManyToOneIndex<W, String> =
            ManyToOneIndex::new("by_alias", |w| w.aliases.clone());
        idx.update_all(&[Change::add(W { id: 1, aliases: vec!["a".into()] })])
            .unwrap();
        let err = idx
            .update_all(&[Change::add(W { id: 2, aliases: vec!["a".into()] })])
            .unwrap_err();
        assert!(matches!(err, IndexUpdateError::KeyCollision { .. }));
    }
}
