//! Predicate index (§4.8): partitions records into "matches" and
//! "doesn't match" a caller-supplied predicate, re-evaluated on every add.
//! Three flavours share this file because they differ only in what the
//! matching side looks like: an unordered set, a comparator-sorted list,
//! or a one-to-one map keyed by a projection of the matching record.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::cache::Change;
use crate::error::IndexUpdateError;

use super::{Index, IndexHint};

/// Matching records kept in arbitrary (here: insertion) order.
pub struct PredicateIndex<R> {
    name: String,
    hint: IndexHint,
    predicate: Box<dyn Fn(&R) -> bool + Send + Sync>,
    matches: Mutex<Vec<R>>,
}

impl<R> std::fmt::Debug for PredicateIndex<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateIndex")
            .field("name", &self.name)
            .field("matches", &self.matches.lock().unwrap().len())
            .finish()
    }
}

impl<R> PredicateIndex<R>
where
    R: Clone + PartialEq + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        PredicateIndex {
            name: name.into(),
            hint: IndexHint::default(),
            predicate: Box::new(predicate),
            matches: Mutex::new(Vec::new()),
        }
    }

    pub fn with_hint(mut self, hint: IndexHint) -> Self {
        self.hint = hint;
        self
    }

    pub fn hint(&self) -> IndexHint {
        self.hint
    }

    pub fn matches(&self) -> Vec<R> {
        self.matches.lock().unwrap().clone()
    }
}

impl<R> Index<R> for PredicateIndex<R>
where
    R: Clone + PartialEq + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn update_all(&self, changes: &[Change<R>]) -> Result<(), IndexUpdateError> {
        let mut matches = self.matches.lock().unwrap();
        for change in changes {
            if let Some(old) = &change.old {
                matches.retain(|r| r != old);
            }
            if let Some(new) = &change.new {
                if (self.predicate)(new) {
                    matches.push(new.clone());
                }
            }
        }
        Ok(())
    }
}

/// Matching records kept sorted by a comparator; ties are rejected the
/// same way [`crate::index::sorted::SortedIndex`] rejects them.
pub struct SortedPredicateIndex<R> {
    name: String,
    hint: IndexHint,
    predicate: Box<dyn Fn(&R) -> bool + Send + Sync>,
    comparator: Box<dyn Fn(&R, &R) -> Ordering + Send + Sync>,
    matches: Mutex<Vec<R>>,
}

impl<R> std::fmt::Debug for SortedPredicateIndex<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedPredicateIndex")
            .field("name", &self.name)
            .field("matches", &self.matches.lock().unwrap().len())
            .finish()
    }
}

impl<R> SortedPredicateIndex<R>
where
    R: Clone + PartialEq + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&R) -> bool + Send + Sync + 'static,
        comparator: impl Fn(&R, &R) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        SortedPredicateIndex {
            name: name.into(),
            hint: IndexHint::default(),
            predicate: Box::new(predicate),
            comparator: Box::new(comparator),
            matches: Mutex::new(Vec::new()),
        }
    }

    pub fn matches(&self) -> Vec<R> {
        self.matches.lock().unwrap().clone()
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

impl<R> Index<R> for SortedPredicateIndex<R>
where
    R: Clone + PartialEq + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn update_all(&self, changes: &[Change<R>]) -> Result<(), IndexUpdateError> {
        let mut matches = self.matches.lock().unwrap();
        let mut removed: Vec<R> = Vec::new();
        for change in changes {
            if let Some(old) = &change.old {
                if let Some(pos) = matches.iter().position(|r| r == old) {
                    removed.push(matches.remove(pos));
                }
            }
        }

        let mut added: Vec<R> = Vec::new();
        for change in changes {
            if let Some(new) = &change.new {
                if (self.predicate)(new) {
                    if let Err(err) = self.insert_sorted(&mut matches, new.clone()) {
                        for r in added.iter().rev() {
                            if let Some(pos) = matches.iter().position(|x| x == r) {
                                matches.remove(pos);
                            }
                        }
                        for r in removed.into_iter() {
                            let _ = self.insert_sorted(&mut matches, r);
                        }
                        return Err(err);
                    }
                    added.push(new.clone());
                }
            }
        }
        Ok(())
    }
}

/// Matching records are projected through `map_fn` into a one-to-one key
/// space; two distinct matching records projecting to the same key is a
/// mapping collision.
pub struct MappedPredicateIndex<R, M> {
    name: String,
    hint: IndexHint,
    predicate: Box<dyn Fn(&R) -> bool + Send + Sync>,
    map_fn: Box<dyn Fn(&R) -> M + Send + Sync>,
    map: Mutex<HashMap<M, R>>,
}

impl<R, M> std::fmt::Debug for MappedPredicateIndex<R, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedPredicateIndex")
            .field("name", &self.name)
            .field("len", &self.map.lock().unwrap().len())
            .finish()
    }
}

impl<R, M> MappedPredicateIndex<R, M>
where
    M: Eq + Hash + Clone + Send + Sync,
    R: Clone + PartialEq + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&R) -> bool + Send + Sync + 'static,
        map_fn: impl Fn(&R) -> M + Send + Sync + 'static,
    ) -> Self {
        MappedPredicateIndex {
            name: name.into(),
            hint: IndexHint::default(),
            predicate: Box::new(predicate),
            map_fn: Box::new(map_fn),
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &M) -> Option<R> {
        self.map.lock().unwrap().get(key).cloned()
    }
}

impl<R, M> Index<R> for MappedPredicateIndex<R, M>
where
    M: Eq + Hash + Clone + Send + Sync,
    R: Clone + PartialEq + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn update_all(&self, changes: &[Change<R>]) -> Result<(), IndexUpdateError> {
        let mut map = self.map.lock().unwrap();
        let mut removed: Vec<(M, R)> = Vec::new();

        for change in changes {
            if let Some(old) = &change.old {
                if (self.predicate)(old) {
                    let key = (self.map_fn)(old);
                    if let Some(existing) = map.remove(&key) {
                        removed.push((key, existing));
                    }
                }
            }
        }

        let mut added: Vec<M> = Vec::new();
        for change in changes {
            if let Some(new) = &change.new {
                if (self.predicate)(new) {
                    let key = (self.map_fn)(new);
                    if map.contains_key(&key) {
                        for k in added.iter().rev() {
                            map.remove(k);
                        }
                        for (k, r) in removed.into_iter() {
                            map.insert(k, r);
                        }
                        return Err(IndexUpdateError::MappingCollision {
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
