use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, trace, warn};
use once_cell::sync::OnceCell;

use crate::{
    cache::WorkerCache, error::SubmitError, shard::Shard, slot::WorkerSlot, spin::SpinLock,
};

/// Idle time after which a worker becomes eligible for retirement.
const DEFAULT_IDLE_LIFETIME: Duration = Duration::from_secs(1);

/// Hard ceiling on the shard count.
const MAX_SHARDS: usize = 128;

/// A builder for constructing a customized worker pool.
#[derive(Debug)]
pub struct Builder {
    shards: Option<usize>,
    idle_lifetime: Duration,
    name: Option<String>,
    stack_size: Option<usize>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            shards: None,
            idle_lifetime: DEFAULT_IDLE_LIFETIME,
            name: None,
            stack_size: None,
        }
    }
}

impl Builder {
    /// Set the number of shards the idle-worker pool is split into.
    ///
    /// Values are clamped to `[1, 128]`. If not set, one shard per available
    /// CPU is used.
    pub fn shards(mut self, shards: usize) -> Self {
        self.shards = Some(shards.clamp(1, MAX_SHARDS));
        self
    }

    /// Set the time after which idle workers are shut down.
    ///
    /// # Panics
    ///
    /// Panics if the lifetime is zero.
    pub fn idle_lifetime(mut self, lifetime: Duration) -> Self {
        if lifetime.is_zero() {
            panic!("idle worker lifetime must be non-zero");
        }

        self.idle_lifetime = lifetime;
        self
    }

    /// Set a custom thread name for workers spawned by this pool.
    ///
    /// # Panics
    ///
    /// Panics if the name contains null bytes (`\0`).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        let name = name.into();

        if name.as_bytes().contains(&0) {
            panic!("worker pool name must not contain null bytes");
        }

        self.name = Some(name);
        self
    }

    /// Set the size of the stack (in bytes) for worker threads.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Create an unstarted pool that hands every submitted task to
    /// `handler`.
    ///
    /// The handler may run concurrently on many workers; its thread safety
    /// is the caller's responsibility to uphold, which the `Sync` bound
    /// enforces.
    pub fn build<T, F>(self, handler: F) -> WorkerPool<T>
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let config = Config {
            shards: self
                .shards
                .unwrap_or_else(|| num_cpus::get().clamp(1, MAX_SHARDS)),
            idle_lifetime: self.idle_lifetime,
            name: self.name,
            stack_size: self.stack_size,
        };

        WorkerPool {
            inner: Arc::new(PoolInner {
                handler: Box::new(handler),
                epoch: Instant::now(),
                config: SpinLock::new(config),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                shards: OnceCell::new(),
                global_fast: WorkerSlot::new(),
                cache: WorkerCache::new(),
                rr_counter: AtomicUsize::new(0),
                spawned: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }
}

/// Configuration frozen at `start`.
struct Config {
    shards: usize,
    idle_lifetime: Duration,
    name: Option<String>,
    stack_size: Option<usize>,
}

/// Pool state shared with the worker threads and the reaper.
pub(crate) struct PoolInner<T: Send + 'static> {
    pub(crate) handler: Box<dyn Fn(T) + Send + Sync>,
    /// Base instant for worker idle timestamps.
    pub(crate) epoch: Instant,
    config: SpinLock<Config>,
    /// Lifecycle flags, written only while `config` is locked.
    started: AtomicBool,
    stopped: AtomicBool,
    /// Shard table, allocated on the first `start`.
    shards: OnceCell<Box<[Shard<T>]>>,
    /// Pool-wide single-slot cache, the last-resort fast tier shared across
    /// shards.
    pub(crate) global_fast: WorkerSlot<T>,
    pub(crate) cache: WorkerCache<T>,
    rr_counter: AtomicUsize,
    /// Count of currently live worker execution contexts.
    pub(crate) spawned: AtomicU64,
    /// Count of tasks whose handler has returned.
    pub(crate) completed: AtomicU64,
}

impl<T: Send + 'static> PoolInner<T> {
    pub(crate) fn shard(&self, index: usize) -> &Shard<T> {
        &self.shards.get().expect("pool not started")[index]
    }

    pub(crate) fn worker_thread_name(&self) -> Option<String> {
        self.config
            .lock()
            .name
            .as_ref()
            .map(|name| format!("{name}-worker"))
    }

    pub(crate) fn worker_stack_size(&self) -> Option<usize> {
        self.config.lock().stack_size
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// A sharded pool of recycled workers for fire-and-forget task execution.
///
/// Submitted tasks are handed to exactly one worker over that worker's
/// rendezvous channel. Workers are re-used across tasks to amortize their
/// creation cost, and a background reaper retires workers idle past the
/// configured lifetime so the resident worker count follows the offered
/// load.
///
/// Dropping the pool stops it: no further tasks are accepted, idle workers
/// are retired, and workers mid-task finish their current task first.
///
/// # Examples
///
/// ```
/// use shardpool::WorkerPool;
///
/// let pool = WorkerPool::new(|n: u32| {
///     let _ = n * 2;
/// });
///
/// pool.start();
/// pool.submit(21).unwrap();
/// pool.stop();
/// ```
pub struct WorkerPool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl WorkerPool<()> {
    /// Get a builder for creating a customized pool.
    pub fn builder() -> Builder {
        Builder::default()
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create an unstarted pool with the default configuration.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Builder::default().build(handler)
    }

    /// Set the number of shards the idle-worker pool is split into, clamped
    /// to `[1, 128]`.
    ///
    /// Must be called before [`start`](Self::start); later calls are
    /// ignored.
    pub fn set_shards(&self, shards: usize) {
        let mut config = self.inner.config.lock();

        if self.inner.started.load(Ordering::Relaxed) {
            warn!("set_shards ignored: pool already started");
            return;
        }

        config.shards = shards.clamp(1, MAX_SHARDS);
    }

    /// Set the time after which idle workers are shut down.
    ///
    /// Must be called before [`start`](Self::start); later calls are
    /// ignored.
    ///
    /// # Panics
    ///
    /// Panics if the lifetime is zero.
    pub fn set_idle_lifetime(&self, lifetime: Duration) {
        if lifetime.is_zero() {
            panic!("idle worker lifetime must be non-zero");
        }

        let mut config = self.inner.config.lock();

        if self.inner.started.load(Ordering::Relaxed) {
            warn!("set_idle_lifetime ignored: pool already started");
            return;
        }

        config.idle_lifetime = lifetime;
    }

    /// Get the effective shard count.
    pub fn shards(&self) -> usize {
        self.inner.config.lock().shards
    }

    /// Get the number of currently live workers.
    pub fn spawned_count(&self) -> u64 {
        self.inner.spawned.load(Ordering::SeqCst)
    }

    /// Get the number of tasks whose handler has returned since the pool
    /// was created.
    pub fn completed_tasks(&self) -> u64 {
        self.inner.completed.load(Ordering::SeqCst)
    }

    /// Start the pool: allocate the shard table and launch the reaper.
    ///
    /// Idempotent; only the first call has any effect. A stopped pool
    /// cannot be restarted.
    pub fn start(&self) {
        let config = self.inner.config.lock();

        if self.inner.started.load(Ordering::Relaxed) {
            return;
        }

        let _ = self
            .inner
            .shards
            .set((0..config.shards).map(Shard::new).collect());
        self.inner.started.store(true, Ordering::Release);

        debug!("worker pool started with {} shards", config.shards);

        let reaper_name = format!("{}-reaper", config.name.as_deref().unwrap_or("shardpool"));
        let idle_lifetime = config.idle_lifetime;

        drop(config);

        let pool = Arc::clone(&self.inner);

        thread::Builder::new()
            .name(reaper_name)
            .spawn(move || reap_loop(pool, idle_lifetime))
            .expect("failed to spawn reaper thread");
    }

    /// Submit a task for execution on some worker.
    ///
    /// The task is bound to an idle worker of a round-robin-selected shard,
    /// or to a freshly spawned worker when nothing is idle. The call blocks
    /// only for the rendezvous handoff: immediately for a fresh worker, and
    /// as soon as the worker reaches its next receive for a recycled one.
    ///
    /// # Errors
    ///
    /// Fails, handing the task back, if the pool was never started or has
    /// been stopped.
    pub fn submit(&self, task: T) -> Result<(), SubmitError<T>> {
        let shards = match self.inner.shards.get() {
            Some(shards) => shards,
            None => return Err(SubmitError::not_started(task)),
        };

        let index = self.inner.rr_counter.fetch_add(1, Ordering::Relaxed) % shards.len();

        let worker = match shards[index].acquire_worker(&self.inner) {
            Some(worker) => worker,
            None => return Err(SubmitError::stopped(task)),
        };

        worker.send_task(task);

        Ok(())
    }

    /// Stop the pool.
    ///
    /// Idle workers are told to shut down; workers mid-task finish their
    /// current task, then observe the stop and exit. Does not wait for
    /// in-flight tasks. A no-op before `start` and after the first `stop`.
    pub fn stop(&self) {
        let retired = {
            let _config = self.inner.config.lock();

            if !self.inner.started.load(Ordering::Relaxed) || self.inner.is_stopped() {
                return;
            }

            let shards = self.inner.shards.get().expect("started implies shards");
            let mut retired = Vec::new();

            for shard in shards.iter() {
                retired.extend(shard.stop());
            }

            // Workers parked in the pool-wide slot belong to no shard sweep.
            retired.extend(self.inner.global_fast.take());

            self.inner.stopped.store(true, Ordering::Release);

            retired
        };

        debug!("worker pool stopping; retiring {} idle workers", retired.len());

        // Sentinels go out with no lock held: each send must rendezvous with
        // its worker's receive.
        for worker in retired {
            worker.send_shutdown();
        }
    }
}

impl<T: Send + 'static> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Send + 'static> fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("shards", &self.shards())
            .field("spawned_workers", &self.spawned_count())
            .field("completed_tasks", &self.completed_tasks())
            .finish()
    }
}

/// Background loop retiring workers idle past `idle_lifetime`.
fn reap_loop<T: Send + 'static>(pool: Arc<PoolInner<T>>, idle_lifetime: Duration) {
    let lifetime_micros = idle_lifetime.as_micros() as u64;

    loop {
        thread::sleep(idle_lifetime);

        if pool.is_stopped() {
            debug!("reaper exiting: pool stopped");
            return;
        }

        let now_micros = pool.epoch.elapsed().as_micros() as u64;
        let shards = pool.shards.get().expect("reaper runs only after start");

        for shard in shards.iter() {
            let retired = shard.reap(now_micros, lifetime_micros);

            if retired.is_empty() {
                continue;
            }

            trace!(
                "retiring {} idle workers from shard {}",
                retired.len(),
                shard.index()
            );

            for worker in retired {
                worker.send_shutdown();
            }
        }

        // The pool-wide slot sits outside every shard sweep. A stale
        // occupant is retired; a fresh one that cannot be put back (the
        // slot was refilled) is parked on its own shard instead.
        if let Some(worker) = pool.global_fast.take() {
            if pool.is_stopped()
                || now_micros.saturating_sub(worker.last_used_micros()) >= lifetime_micros
            {
                worker.send_shutdown();
            } else if let Err(worker) = pool.global_fast.put(worker) {
                if let Err(worker) = pool.shard(worker.shard()).park(worker) {
                    worker.send_shutdown();
                }
            }
        }
    }
}
