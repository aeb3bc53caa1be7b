//! Kairos RT — a discrete-event scheduler family paired with a
//! transactional, indexed, immutable object cache.
//!
//! Three scheduler disciplines share one execution and error model: a
//! single-threaded virtual-time [`scheduler::discrete::DiscreteScheduler`]
//! for deterministic simulation and testing, a realtime
//! [`scheduler::busy_loop::BusyLoopScheduler`] with four interchangeable
//! queue backends for throughput-sensitive workloads, and a
//! condvar-timed [`scheduler::executor::ExecutorScheduler`] for
//! low-volume precise-timing work. [`cache::Cache`] is independent of the
//! scheduler family: an in-memory object store with pluggable
//! [`index::Index`] implementations, atomic multi-record updates, and a
//! single-writer concurrency sentinel.
#![warn(clippy::all)]

pub mod cache;
pub mod error;
pub mod event;
pub mod id;
pub mod index;
pub mod queue;
pub mod scheduler;
pub mod time;
