//! Index family (§4.8): derived lookup structures maintained alongside the
//! cache, each preserving its own invariants and rolling itself back on a
//! failed batch before returning an error to the cache.
//!
//! Every variant is a sealed, independently-testable struct implementing
//! the shared [`Index`] trait — the Rust rendering of the source design's
//! "duck-typed index families registered by key function" (§9): rather
//! than a single polymorphic dispatch enum, the cache holds a
//! `Vec<Box<dyn Index<R>>>` and calls through the trait object uniformly.

pub mod cached_sort;
pub mod counting;
pub mod group_by;
pub mod many_to_many;
pub mod many_to_one;
pub mod one_to_many;
pub mod one_to_one;
pub mod optional;
pub mod predicate;
pub mod separately_sorted;
pub mod sorted;

use crate::cache::Change;
use crate::error::IndexUpdateError;

/// Build-time hints (§6, §4.8): select internal structure only, never
/// observable semantics. This crate's indices all use the same
/// mutex-guarded structures regardless of hint — a `Vec`/`HashMap` swap
/// keyed on this enum would be an internal-only optimisation with no
/// behavioural difference, so it is recorded but not dispatched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexHint {
    OptimiseForUpdate,
    OptimiseForQuery,
    OptimiseForInfrequentChanges,
}

impl Default for IndexHint {
    fn default() -> Self {
        IndexHint::OptimiseForQuery
    }
}

/// Shared contract every index variant implements (§4.8). `update_all` is
/// the one true atomic primitive; `add`/`remove`/`update` are convenience
/// wrappers default-implemented on top of it, matching the source design's
/// "default: remove(old) then add(new), wrapped with rollback" note for
/// `update`.
pub trait Index<R>: Send + Sync {
    fn name(&self) -> &str;

    /// Apply a whole batch: every sub-change in `changes` that touches
    /// this index either all apply or none do. Implementations must
    /// process removes before adds and roll themselves back internally on
    /// failure (§4.8) — the cache only needs to know whether the call as
    /// a whole succeeded.
    fn update_all(&self, changes: &[Change<R>]) -> Result<(), IndexUpdateError>;

    fn add(&self, record: &R) -> Result<(), IndexUpdateError>
    where
        R: Clone,
    {
        self.update_all(&[Change::add(record.clone())])
    }

    fn remove(&self, record: &R) -> Result<(), IndexUpdateError>
    where
        R: Clone,
    {
        self.update_all(&[Change::remove(record.clone())])
    }

    fn update(&self, old: &R, new: &R) -> Result<(), IndexUpdateError>
    where
        R: Clone,
    {
        self.update_all(&[Change::update(old.clone(), new.clone())])
    }
}
