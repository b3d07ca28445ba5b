use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::worker::Worker;

/// Upper bound on retired worker objects kept around for reuse.
const CACHE_CAPACITY: usize = 1024;

/// A thread-safe free list of interchangeable workers.
///
/// Any recycled worker is equivalent to a fresh one: `put` clears the
/// shutdown mark and the shard binding, and the rendezvous channel is empty
/// once the owning thread has exited. The list is bounded; returning a
/// worker to a full list simply drops it.
pub(crate) struct WorkerCache<T: Send + 'static> {
    free: ArrayQueue<Arc<Worker<T>>>,
}

impl<T: Send + 'static> WorkerCache<T> {
    pub(crate) fn new() -> Self {
        Self {
            free: ArrayQueue::new(CACHE_CAPACITY),
        }
    }

    /// Return a previously retired worker, or construct one with a fresh
    /// rendezvous channel.
    pub(crate) fn get(&self) -> Arc<Worker<T>> {
        self.free.pop().unwrap_or_else(|| Arc::new(Worker::new()))
    }

    /// Make a worker available for later `get` calls.
    pub(crate) fn put(&self, worker: Arc<Worker<T>>) {
        worker.reset();
        let _ = self.free.push(worker);
    }
}
