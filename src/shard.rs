use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    pool::PoolInner,
    slot::WorkerSlot,
    spin::SpinLock,
    worker::{self, Worker},
};

/// Idle-list length beyond which the reaper bisects before its linear scan.
const BISECT_THRESHOLD: usize = 400;

/// Shard state mutated only under the shard lock.
struct Idle<T: Send + 'static> {
    /// Second single-slot cache, refilled while the lock is already held.
    fast_b: Option<Arc<Worker<T>>>,
    /// Idle workers beyond the fast slots. A LIFO stack with the
    /// newest-idle worker at the tail, so acquisition favors warm workers
    /// and the reaper cuts stale ones from the head.
    list: Vec<Arc<Worker<T>>>,
}

/// One partition of the idle-worker pool, independently lockable.
///
/// Acquisition walks the tiers hottest-first: the lock-free shard slot, the
/// lock-free pool-wide slot, then the locked slot and list. Release fills
/// them in the same order, so the hottest worker lives in the
/// contention-free slot and overflow spills through progressively colder
/// tiers.
pub(crate) struct Shard<T: Send + 'static> {
    index: usize,
    /// First single-slot cache, contended without the lock.
    fast_a: WorkerSlot<T>,
    idle: SpinLock<Idle<T>>,
    /// Written only while `idle` is locked; readable without it.
    stopped: AtomicBool,
}

impl<T: Send + 'static> Shard<T> {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            fast_a: WorkerSlot::new(),
            idle: SpinLock::new(Idle {
                fast_b: None,
                list: Vec::with_capacity(1000),
            }),
            stopped: AtomicBool::new(false),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Return a worker ready to receive a task, spawning a fresh one if no
    /// idle worker can be found. `None` once the shard has stopped.
    pub(crate) fn acquire_worker(&self, pool: &Arc<PoolInner<T>>) -> Option<Arc<Worker<T>>> {
        if self.is_stopped() {
            return None;
        }

        if let Some(worker) = self.fast_a.take() {
            return Some(worker);
        }

        if let Some(worker) = pool.global_fast.take() {
            return Some(worker);
        }

        {
            let mut idle = self.idle.lock();

            if self.is_stopped() {
                return None;
            }

            if let Some(worker) = idle.fast_b.take() {
                return Some(worker);
            }

            // Draw two per lock acquisition when possible: one for the
            // caller, one to refill the locked fast slot for the next.
            if let Some(worker) = idle.list.pop() {
                idle.fast_b = idle.list.pop();
                return Some(worker);
            }
        }

        let worker = pool.cache.get();
        worker.bind(self.index);
        worker::spawn(pool, Arc::clone(&worker));

        Some(worker)
    }

    /// Make `worker` available for reuse. Returns `false` once the shard has
    /// stopped; the calling worker then exits its loop.
    pub(crate) fn release_worker(&self, pool: &PoolInner<T>, worker: &Arc<Worker<T>>) -> bool {
        if self.is_stopped() {
            return false;
        }

        worker.touch(pool.epoch);

        let token = match self.fast_a.put(Arc::clone(worker)) {
            Ok(()) => return true,
            Err(token) => token,
        };

        let token = match pool.global_fast.put(token) {
            Ok(()) => return true,
            Err(token) => token,
        };

        let mut idle = self.idle.lock();

        if self.is_stopped() {
            return false;
        }

        if idle.fast_b.is_none() {
            idle.fast_b = Some(token);
        } else {
            idle.list.push(token);
        }

        true
    }

    /// Collect every worker of this shard idle since before
    /// `now - lifetime` for retirement: the stale prefix of the idle list
    /// plus stale occupants of the two fast slots.
    ///
    /// Releases stamp the timestamp and then append, so the list is
    /// age-ordered oldest-first and a single prefix cut suffices.
    pub(crate) fn reap(&self, now_micros: u64, lifetime_micros: u64) -> Vec<Arc<Worker<T>>> {
        let stale = |worker: &Arc<Worker<T>>| {
            now_micros.saturating_sub(worker.last_used_micros()) >= lifetime_micros
        };

        let mut idle = self.idle.lock();

        // A stopped shard has already been drained; touching the slots here
        // could re-park a worker behind the stop sweep.
        if self.is_stopped() {
            return Vec::new();
        }

        let cut = stale_prefix(&idle.list, &stale);
        let mut retired: Vec<_> = idle.list.drain(..cut).collect();

        // The fast slots hold the most recently used workers, but one parked
        // there across a whole quiet interval is just as stale as the list.
        if let Some(worker) = idle.fast_b.take() {
            if stale(&worker) {
                retired.push(worker);
            } else {
                idle.fast_b = Some(worker);
            }
        }

        if let Some(worker) = self.fast_a.take() {
            if stale(&worker) {
                retired.push(worker);
            } else if let Err(worker) = self.fast_a.put(worker) {
                // The slot was refilled behind the probe; keep the worker
                // idle in the locked tier instead.
                idle.list.push(worker);
            }
        }

        retired
    }

    /// Park a worker back into the locked tier without re-stamping its idle
    /// time. Fails once the shard has stopped.
    pub(crate) fn park(&self, worker: Arc<Worker<T>>) -> Result<(), Arc<Worker<T>>> {
        let mut idle = self.idle.lock();

        if self.is_stopped() {
            return Err(worker);
        }

        if idle.fast_b.is_none() {
            idle.fast_b = Some(worker);
        } else {
            idle.list.push(worker);
        }

        Ok(())
    }

    /// Mark the shard stopped and strip every idle worker out of its tiers.
    /// The caller sends the shutdown sentinel once no locks are held.
    pub(crate) fn stop(&self) -> Vec<Arc<Worker<T>>> {
        let mut drained = {
            let mut idle = self.idle.lock();

            self.stopped.store(true, Ordering::Release);

            let mut drained: Vec<_> = idle.list.drain(..).collect();
            drained.extend(idle.fast_b.take());
            drained
        };

        // The lock-free slot is swept after the stopped flag is published.
        drained.extend(self.fast_a.take());

        drained
    }
}

/// Index of the first fresh worker in an age-ordered idle list, i.e. the
/// number of leading stale entries to retire.
///
/// Long lists are probed by halving first: under steady load the list is
/// mostly fresh, and the probe either lands inside the stale prefix (the
/// linear confirmation then finds the exact cut) or reaches the head and
/// reports the list clean.
fn stale_prefix<T: Send + 'static>(
    list: &[Arc<Worker<T>>],
    stale: &impl Fn(&Arc<Worker<T>>) -> bool,
) -> usize {
    let len = list.len();
    let mut cut = 0;

    if len > BISECT_THRESHOLD {
        let mut probe = (len - 1) / 2;

        while probe > 0 && !stale(&list[probe]) {
            probe /= 2;
        }

        if probe == 0 {
            return 0;
        }

        cut = probe;
    }

    while cut < len && stale(&list[cut]) {
        cut += 1;
    }

    cut
}
