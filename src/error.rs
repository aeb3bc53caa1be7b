//! Error taxonomy for the scheduler and cache subsystems (§7 of the spec).
//!
//! Every fallible operation in this crate returns one of the enums below.
//! Recoverable-vs-fatal classification (used by the realtime schedulers) is
//! done by walking the `source()` chain looking for a [`RecoverableTag`]
//! rather than by matching concrete error types, mirroring how the source
//! design walks a Java throwable's cause chain for a marker class.

use std::fmt;
use thiserror::Error;

/// Raised for construction-time / scheduling-time misconfiguration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("time-unit-aware API requires a TimeProvider that implements UnitTimeProvider")]
    UnitProviderRequired,

    #[error("scheduling time {requested} is in the past under strict ordering (now={now})")]
    PastTimeUnderStrictOrdering { now: f64, requested: f64 },

    #[error("negative delay {delay} is not permitted")]
    NegativeDuration { delay: f64 },

    #[error("{0}")]
    Other(String),
}

/// Raised by an individual index when it cannot accept a change.
#[derive(Debug, Error)]
pub enum IndexUpdateError {
    #[error("index '{index}': key collision (record would overwrite an existing mapping)")]
    KeyCollision { index: String },

    #[error("index '{index}': comparator returned Equal for two distinct records")]
    ComparatorTie { index: String },

    #[error("index '{index}': mapped key collision")]
    MappingCollision { index: String },

    #[error("index '{index}': {message}")]
    Other { index: String, message: String },
}

impl IndexUpdateError {
    pub fn index_name(&self) -> &str {
        match self {
            IndexUpdateError::KeyCollision { index } => index,
            IndexUpdateError::ComparatorTie { index } => index,
            IndexUpdateError::MappingCollision { index } => index,
            IndexUpdateError::Other { index, .. } => index,
        }
    }
}

/// Raised by a primary object-store operation (`add`/`update`/`delete`)
/// before any index is consulted.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("id {id} is already present")]
    AlreadyPresent { id: String },

    #[error("id {id} is not present")]
    NotFound { id: String },

    #[error("update's old value is not identity-equal to the current record for id {id}")]
    IdentityMismatch { id: String },

    #[error("change with both old and new absent is not a valid operation")]
    EmptyChange,
}

/// The outer failure surfaced by [`crate::cache::Cache`] operations.
///
/// Wraps either a primary-store violation or the [`IndexUpdateError`] raised
/// by whichever index rejected the batch, naming it so the caller can react.
#[derive(Debug, Error)]
pub enum CacheUpdateError {
    #[error("cache store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache index '{index}' rejected the update: {source}")]
    Index {
        index: String,
        #[source]
        source: IndexUpdateError,
    },
}

impl CacheUpdateError {
    pub fn from_index(source: IndexUpdateError) -> Self {
        CacheUpdateError::Index {
            index: source.index_name().to_string(),
            source,
        }
    }
}

/// Raised by the concurrent-access sentinel (§4.7, §5) when a second thread
/// attempts to read or write while another thread's mutation is in flight,
/// naming both threads as the spec requires.
#[derive(Debug, Error, Clone)]
#[error("concurrent modification: thread '{offending_thread}' attempted access while thread '{active_thread}' was mutating")]
pub struct ConcurrentMutationError {
    pub active_thread: String,
    pub offending_thread: String,
}

/// Marker wrapper identifying an error (and everything it wraps) as
/// recoverable. Scheduler execution wrappers walk the `source()` chain
/// looking for this wrapper; if found anywhere in the chain the error is
/// routed to the recoverable-listener path instead of shutting the
/// scheduler down.
#[derive(Debug)]
pub struct RecoverableTag {
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl RecoverableTag {
    pub fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        RecoverableTag {
            source: Box::new(source),
        }
    }

    pub fn boxed(source: Box<dyn std::error::Error + Send + Sync>) -> Self {
        RecoverableTag { source }
    }
}

impl fmt::Display for RecoverableTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "recoverable: {}", self.source)
    }
}

impl std::error::Error for RecoverableTag {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Walk `err`'s cause chain (inclusive of `err` itself) looking for a
/// [`RecoverableTag`]. Mirrors the source spec's "walk the cause chain for a
/// well-known marker class" rule (§7, DESIGN NOTES).
pub fn is_recoverable(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<RecoverableTag>().is_some() {
            return true;
        }
        current = e.source();
    }
    false
}

/// The error an event action can fail with. A plain `Err` participates in
/// recoverable/fatal classification via [`is_recoverable`]; an action panic
/// is always treated as fatal (see `scheduler::execute_guarded`).
pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

/// Failure surfaced by a scheduler's submission API (`do_now`/`do_at`/...).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Concurrent(#[from] ConcurrentMutationError),

    #[error("scheduler has already stopped")]
    Stopped,

    #[error("this scheduler only accepts submissions from its owning thread")]
    ForeignThreadNotAllowed,
}

/// What the execution wrapper decided about a failed event action, used to
/// drive the scheduler's recoverable-vs-fatal branch (§4.3, §4.4, §4.5).
#[derive(Debug)]
pub enum ExecutionOutcome {
    Ok,
    Recoverable(ActionError),
    Fatal(ActionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn recoverable_tag_found_at_top() {
        let err = RecoverableTag::new(Boom);
        assert!(is_recoverable(&err));
    }

    #[test]
    fn recoverable_tag_found_deeper_in_chain() {
        #[derive(Debug)]
        struct Wrapper(RecoverableTag);
        impl fmt::Display for Wrapper {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "wrapper")
            }
        }
        impl std::error::Error for Wrapper {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                Some(&self.0)
            }
        }

        let err = Wrapper(RecoverableTag::new(Boom));
        assert!(is_recoverable(&err));
    }

    #[test]
    fn plain_error_is_not_recoverable() {
        assert!(!is_recoverable(&Boom));
    }

    #[test]
    fn cache_update_error_names_index() {
        let e = CacheUpdateError::from_index(IndexUpdateError::KeyCollision {
            index: "by_color".into(),
        });
        match e {
            CacheUpdateError::Index { index, .. } => assert_eq!(index, "by_color"),
            _ => panic!("expected Index variant"),
        }
    }

    #[test]
    fn concurrent_mutation_error_message_names_both_threads() {
        let e = ConcurrentMutationError {
            active_thread: "T1".into(),
            offending_thread: "T2".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("T1"));
        assert!(msg.contains("T2"));
    }
}
