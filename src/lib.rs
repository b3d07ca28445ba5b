//! A sharded worker pool for fire-and-forget task execution.
//!
//! Callers submit opaque tasks; the pool hands each task to exactly one
//! long-lived worker over a private rendezvous channel, re-using workers
//! across tasks to amortize their creation cost and retiring workers that
//! stay idle past a configured lifetime. The idle-worker pool is split into
//! shards, each fronted by lock-free single-slot caches, so acquisition
//! scales with producer parallelism instead of degenerating to a global
//! lock.
//!
//! Tasks return nothing and no ordering is preserved across workers; within
//! a single worker, tasks run in the order they were handed over.
//!
//! # Examples
//!
//! ```
//! use shardpool::WorkerPool;
//!
//! let pool = WorkerPool::new(|n: u32| {
//!     let _ = n * 2;
//! });
//!
//! pool.start();
//! pool.submit(21).unwrap();
//! pool.stop();
//! ```

mod cache;
mod error;
mod pool;
mod shard;
mod slot;
mod spin;
mod worker;

pub use crate::{
    error::{SubmitError, SubmitErrorKind},
    pool::{Builder, WorkerPool},
};
