//! Cooperative worker pool and the resumable contract.
//!
//! Actors that are not thread-mapped are multiplexed onto a pool of OS
//! worker threads. Each worker owns a local Chase-Lev deque; when idle,
//! workers steal from peers (random victim selection) or from the shared
//! injector queue, then park on a per-worker condvar with a periodic
//! shutdown recheck.
//!
//! The pool knows nothing about actors: it drives [`Resumable`] jobs,
//! re-queueing those that report [`ResumeResult::ResumeLater`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use tracing::trace;

/// Workers recheck the shutdown flag at this interval while parked.
const PARK_TIMEOUT: Duration = Duration::from_millis(10);

// ── Resumable contract ──────────────────────────────────────────────────

/// Result of driving a resumable once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeResult {
    /// Throughput cap hit with more work available; reschedule.
    ResumeLater,
    /// Out of work; the job re-enters the pool when new input arrives.
    Awaiting,
    /// Terminal; never reschedule.
    Done,
}

/// A unit of work the pool can drive repeatedly.
///
/// This is the seam between actors and execution units: the same
/// abstract actor runs on a private thread or multiplexed on the pool,
/// and the pool only sees this interface.
pub trait Resumable: Send + Sync {
    /// Process up to `max_throughput` messages and report what to do
    /// next.
    fn resume(&self, max_throughput: usize) -> ResumeResult;
}

type Job = Arc<dyn Resumable>;

// ── Pool ────────────────────────────────────────────────────────────────

/// Per-worker parking primitive. Each worker parks on its own pair to
/// avoid contention on a single global lock.
struct Parker {
    mutex: Mutex<()>,
    cond: Condvar,
}

/// Minimal xorshift64 PRNG for victim selection, one per worker.
struct Xorshift64(u64);

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Self(if seed == 0 { 1 } else { seed })
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

/// The worker pool: shared injector, per-worker stealers, parkers, and
/// observability counters.
pub(crate) struct SchedulerCore {
    injector: Injector<Job>,
    stealers: Vec<Stealer<Job>>,
    parkers: Vec<Parker>,
    shutdown: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    throughput: usize,
    wake_counter: AtomicU64,
    pub(crate) jobs_scheduled: AtomicU64,
    pub(crate) jobs_completed: AtomicU64,
    pub(crate) steals: AtomicU64,
}

impl SchedulerCore {
    /// Create the pool and start its worker threads.
    ///
    /// All deques and stealers exist before any thread runs, since
    /// workers steal from each other from the first iteration.
    pub(crate) fn start(worker_count: usize, throughput: usize) -> Arc<Self> {
        let worker_count = worker_count.max(1);
        let locals: Vec<Worker<Job>> = (0..worker_count).map(|_| Worker::new_lifo()).collect();
        let stealers = locals.iter().map(Worker::stealer).collect();
        let parkers = (0..worker_count)
            .map(|_| Parker {
                mutex: Mutex::new(()),
                cond: Condvar::new(),
            })
            .collect();

        let core = Arc::new(Self {
            injector: Injector::new(),
            stealers,
            parkers,
            shutdown: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
            worker_count,
            throughput,
            wake_counter: AtomicU64::new(0),
            jobs_scheduled: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            steals: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(worker_count);
        for (id, local) in locals.into_iter().enumerate() {
            let core = Arc::clone(&core);
            let Ok(handle) = thread::Builder::new()
                .name(format!("weft-worker-{id}"))
                .spawn(move || worker_loop(&core, id, &local))
            else {
                continue;
            };
            handles.push(handle);
        }
        *core
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = handles;
        core
    }

    /// Submit a job and wake one parked worker.
    pub(crate) fn schedule(&self, job: Job) {
        self.jobs_scheduled.fetch_add(1, Ordering::Relaxed);
        self.injector.push(job);
        self.try_wake();
    }

    /// Wake one parked worker, round-robin so wake-ups spread across the
    /// pool.
    fn try_wake(&self) {
        let idx =
            (self.wake_counter.fetch_add(1, Ordering::Relaxed) % self.worker_count as u64) as usize;
        self.parkers[idx].cond.notify_one();
    }

    /// Signal shutdown, wake everyone, join the workers, and drop any
    /// jobs still queued.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        for parker in &self.parkers {
            parker.cond.notify_one();
        }
        let mut handles = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        loop {
            match self.injector.steal() {
                Steal::Success(_) => {}
                Steal::Empty => break,
                Steal::Retry => {}
            }
        }
    }

    fn run(&self, job: Job, local: &Worker<Job>) {
        match job.resume(self.throughput) {
            ResumeResult::ResumeLater => local.push(job),
            ResumeResult::Awaiting | ResumeResult::Done => {}
        }
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    fn steal_from_peers(&self, self_id: usize, rng: &mut Xorshift64) -> Option<Job> {
        let n = self.worker_count;
        if n <= 1 {
            return None;
        }
        let start = (rng.next_u64() % n as u64) as usize;
        for i in 0..n {
            let victim = (start + i) % n;
            if victim == self_id {
                continue;
            }
            loop {
                match self.stealers[victim].steal() {
                    Steal::Success(job) => {
                        self.steals.fetch_add(1, Ordering::Relaxed);
                        return Some(job);
                    }
                    Steal::Empty => break,
                    Steal::Retry => {}
                }
            }
        }
        None
    }

    fn pop_global(&self, local: &Worker<Job>) -> Option<Job> {
        loop {
            match self.injector.steal_batch_and_pop(local) {
                Steal::Success(job) => return Some(job),
                Steal::Empty => return None,
                Steal::Retry => {}
            }
        }
    }
}

/// Main loop executed by each worker thread.
fn worker_loop(core: &Arc<SchedulerCore>, id: usize, local: &Worker<Job>) {
    let mut rng = Xorshift64::new(0x9E37_79B9_7F4A_7C15 ^ (id as u64 + 1));
    trace!(worker = id, "worker started");

    while !core.shutdown.load(Ordering::Acquire) {
        // 1. Local deque (LIFO, cache-friendly).
        if let Some(job) = local.pop() {
            core.run(job, local);
            continue;
        }
        // 2. Steal from a random peer.
        if let Some(job) = core.steal_from_peers(id, &mut rng) {
            core.run(job, local);
            continue;
        }
        // 3. Batch-steal from the injector into the local deque.
        if let Some(job) = core.pop_global(local) {
            core.run(job, local);
            continue;
        }
        // 4. Park until notified or timeout.
        let parker = &core.parkers[id];
        let guard = parker
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if core.shutdown.load(Ordering::Acquire) {
            break;
        }
        let _ = parker.cond.wait_timeout(guard, PARK_TIMEOUT);
    }
    trace!(worker = id, "worker stopped");
}

// ── Tests ───────────────────────────────────────────────────────────────
