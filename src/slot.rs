use std::{
    ptr,
    sync::{
        atomic::{AtomicPtr, Ordering},
        Arc,
    },
};

use crate::worker::Worker;

/// A cache holding at most one idle worker, contended without any lock.
///
/// The slot is either null (empty) or a pointer obtained from
/// `Arc::into_raw`; the strong count that pointer represents transfers
/// through the slot on every successful swap.
pub(crate) struct WorkerSlot<T: Send + 'static> {
    ptr: AtomicPtr<Worker<T>>,
}

impl<T: Send + 'static> WorkerSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Take the cached worker, if any.
    ///
    /// Makes a single attempt; losing the race to another taker is treated
    /// the same as an empty slot.
    pub(crate) fn take(&self) -> Option<Arc<Worker<T>>> {
        let current = self.ptr.load(Ordering::Relaxed);

        if current.is_null() {
            return None;
        }

        // Acquire on success pairs with the Release in `put` so the worker's
        // shard binding and idle timestamp are visible to the new holder.
        if self
            .ptr
            .compare_exchange(current, ptr::null_mut(), Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            // SAFETY: every non-null pointer in the slot came from
            // `Arc::into_raw` in `put`, and the swap to null means no other
            // thread can reconstitute this pointer again.
            Some(unsafe { Arc::from_raw(current) })
        } else {
            None
        }
    }

    /// Offer a worker to the slot.
    ///
    /// Fails when the slot is occupied or a race was lost, handing the
    /// worker back to the caller.
    pub(crate) fn put(&self, worker: Arc<Worker<T>>) -> Result<(), Arc<Worker<T>>> {
        if !self.ptr.load(Ordering::Relaxed).is_null() {
            return Err(worker);
        }

        let raw = Arc::into_raw(worker) as *mut Worker<T>;

        // Release on success publishes the worker's fields to whichever
        // thread takes it next.
        match self
            .ptr
            .compare_exchange(ptr::null_mut(), raw, Ordering::Release, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            // SAFETY: the CAS failed, so the pointer never became reachable
            // through the slot; this thread still owns its strong count.
            Err(_) => Err(unsafe { Arc::from_raw(raw) }),
        }
    }
}

impl<T: Send + 'static> Drop for WorkerSlot<T> {
    fn drop(&mut self) {
        let raw = *self.ptr.get_mut();

        if !raw.is_null() {
            // SAFETY: exclusive access during drop; the pointer came from
            // `Arc::into_raw`.
            drop(unsafe { Arc::from_raw(raw) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_from_empty_slot() {
        let slot = WorkerSlot::<u32>::new();

        assert!(slot.take().is_none());
    }

    #[test]
    fn put_then_take_round_trips() {
        let slot = WorkerSlot::new();
        let worker = Arc::new(Worker::<u32>::new());

        assert!(slot.put(Arc::clone(&worker)).is_ok());

        let taken = slot.take().unwrap();
        assert!(Arc::ptr_eq(&worker, &taken));
        assert!(slot.take().is_none());
    }

    #[test]
    fn put_into_occupied_slot_fails() {
        let slot = WorkerSlot::new();

        assert!(slot.put(Arc::new(Worker::<u32>::new())).is_ok());

        let second = Arc::new(Worker::new());
        let returned = slot.put(Arc::clone(&second)).unwrap_err();
        assert!(Arc::ptr_eq(&second, &returned));
    }

    #[test]
    fn drop_releases_cached_worker() {
        let worker = Arc::new(Worker::<u32>::new());

        {
            let slot = WorkerSlot::new();
            slot.put(Arc::clone(&worker)).ok();
        }

        assert_eq!(Arc::strong_count(&worker), 1);
    }
}
