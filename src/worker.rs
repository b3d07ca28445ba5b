use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Instant,
};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::pool::PoolInner;

/// A value moving through a worker's rendezvous channel: a task to run, or
/// the sentinel telling the worker to exit its loop.
pub(crate) enum Signal<T> {
    Task(T),
    Shutdown,
}

/// Shard index of a worker not currently bound to any shard.
const UNBOUND: usize = usize::MAX;

/// A long-lived execution context that serially runs tasks handed to it
/// through a private rendezvous channel.
///
/// The thread side holds one `Arc` clone for its whole life; a second clone
/// circulates through the idle tiers as the token granting the right to send
/// the next task. A send and its receive complete together, so a producer
/// that acquired a worker keeps it pinned until the handoff.
pub(crate) struct Worker<T: Send + 'static> {
    task_tx: Sender<Signal<T>>,
    task_rx: Receiver<Signal<T>>,
    /// Index of the owning shard. Stable from spawn until the worker is
    /// returned to the allocator.
    shard: AtomicUsize,
    /// Microseconds past the pool epoch at which this worker last finished
    /// a task.
    last_used: AtomicU64,
    /// Set once the worker has been told to shut down, so the stop path and
    /// the reaper cannot sentinel it twice.
    deleted: AtomicBool,
}

impl<T: Send + 'static> Worker<T> {
    pub(crate) fn new() -> Self {
        let (task_tx, task_rx) = bounded(0);

        Self {
            task_tx,
            task_rx,
            shard: AtomicUsize::new(UNBOUND),
            last_used: AtomicU64::new(0),
            deleted: AtomicBool::new(false),
        }
    }

    pub(crate) fn bind(&self, shard: usize) {
        self.shard.store(shard, Ordering::Relaxed);
    }

    pub(crate) fn shard(&self) -> usize {
        let shard = self.shard.load(Ordering::Relaxed);
        debug_assert_ne!(shard, UNBOUND);
        shard
    }

    /// Make the worker indistinguishable from a freshly constructed one.
    /// The channel is kept; it is empty once the owning thread has exited.
    pub(crate) fn reset(&self) {
        self.deleted.store(false, Ordering::Relaxed);
        self.shard.store(UNBOUND, Ordering::Relaxed);
    }

    /// Hand a task to the worker, blocking until its loop receives it.
    pub(crate) fn send_task(&self, task: T) {
        self.task_tx
            .send(Signal::Task(task))
            .expect("worker channel cannot disconnect while the worker is alive");
    }

    /// Send the shutdown sentinel, at most once per spawn. Blocks until the
    /// parked worker receives it.
    pub(crate) fn send_shutdown(&self) {
        if !self.deleted.swap(true, Ordering::AcqRel) {
            self.task_tx
                .send(Signal::Shutdown)
                .expect("worker channel cannot disconnect while the worker is alive");
        }
    }

    fn recv(&self) -> Option<Signal<T>> {
        self.task_rx.recv().ok()
    }

    /// Stamp the idle timestamp.
    pub(crate) fn touch(&self, epoch: Instant) {
        self.last_used
            .store(epoch.elapsed().as_micros() as u64, Ordering::Release);
    }

    pub(crate) fn last_used_micros(&self) -> u64 {
        self.last_used.load(Ordering::Acquire)
    }
}

/// Launch the execution context for `worker` on a fresh thread. The worker
/// must already be bound to a shard.
pub(crate) fn spawn<T: Send + 'static>(pool: &Arc<PoolInner<T>>, worker: Arc<Worker<T>>) {
    let mut builder = thread::Builder::new();

    if let Some(name) = pool.worker_thread_name() {
        builder = builder.name(name);
    }

    if let Some(size) = pool.worker_stack_size() {
        builder = builder.stack_size(size);
    }

    let pool = Arc::clone(pool);

    builder
        .spawn(move || run(pool, worker))
        .expect("failed to spawn worker thread");
}

/// Main worker loop: receive until the sentinel arrives or the shard refuses
/// the release, then return the worker to the allocator.
fn run<T: Send + 'static>(pool: Arc<PoolInner<T>>, worker: Arc<Worker<T>>) {
    pool.spawned.fetch_add(1, Ordering::SeqCst);

    // Decrements the live-worker count and recycles the worker even if the
    // handler unwinds.
    struct Retire<T: Send + 'static> {
        pool: Arc<PoolInner<T>>,
        worker: Arc<Worker<T>>,
    }

    impl<T: Send + 'static> Drop for Retire<T> {
        fn drop(&mut self) {
            self.pool.spawned.fetch_sub(1, Ordering::SeqCst);
            self.pool.cache.put(Arc::clone(&self.worker));
        }
    }

    let retire = Retire { pool, worker };
    let pool = &retire.pool;
    let worker = &retire.worker;
    let shard = pool.shard(worker.shard());

    loop {
        match worker.recv() {
            Some(Signal::Task(task)) => {
                (pool.handler)(task);
                pool.completed.fetch_add(1, Ordering::SeqCst);

                if !shard.release_worker(pool, worker) {
                    break;
                }
            }
            Some(Signal::Shutdown) | None => break,
        }
    }
}
