//! Bounded worker pool with a priority task queue.
//!
//! A fixed set of long-lived threads drain a priority-ordered queue.
//! Submission never spawns a thread; it always returns a handle the caller
//! can wait on. Within a priority, order is FIFO. A panicking job logs and
//! fails its own handle — it never poisons the pool.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Relative priority of a submitted job. `Critical` drains before `High`,
/// which drains before `Normal`, which drains before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueuedJob {
    priority: Priority,
    seq: u64,
    job: Job,
    state: Arc<JobState>,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: higher priority first, then lower seq
        // (earlier submission) first within a priority band.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct JobState {
    done: Mutex<JobOutcome>,
    cond: Condvar,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum JobOutcome {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// Awaitable handle for a single submitted job.
pub struct JobHandle {
    state: Arc<JobState>,
}

impl JobHandle {
    /// Blocks until the job completes (successfully or not).
    pub fn wait(&self) -> Result<(), ()> {
        let mut guard = self.state.done.lock().unwrap();
        while *guard == JobOutcome::Pending {
            guard = self.state.cond.wait(guard).unwrap();
        }
        match *guard {
            JobOutcome::Completed => Ok(()),
            _ => Err(()),
        }
    }

    pub fn is_done(&self) -> bool {
        *self.state.done.lock().unwrap() != JobOutcome::Pending
    }
}

/// Awaitable handle for a batch of indexed jobs submitted together.
pub struct BatchHandle {
    handles: Vec<JobHandle>,
}

impl BatchHandle {
    /// Blocks until every item in the batch has completed. Returns the
    /// number of items that failed (0 means a clean batch).
    pub fn wait(&self) -> usize {
        let mut failed = 0;
        for h in &self.handles {
            if h.wait().is_err() {
                failed += 1;
            }
        }
        failed
    }
}

enum Signal {
    Job(QueuedJob),
    Shutdown,
}

struct Shared {
    queue: Mutex<BinaryHeap<QueuedJob>>,
    cond: Condvar,
    shutting_down: Mutex<bool>,
    seq: AtomicU64,
    active: AtomicUsize,
}

/// Fixed-size pool of worker threads processing a shared priority queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `thread_count` (>= 1) worker threads.
    pub fn new(thread_count: usize) -> Result<Self, String> {
        if thread_count == 0 {
            return Err("thread_count must be >= 1".to_string());
        }
        let shared = Arc::new(Shared {
            queue: Mutex::new(BinaryHeap::new()),
            cond: Condvar::new(),
            shutting_down: Mutex::new(false),
            seq: AtomicU64::new(0),
            active: AtomicUsize::new(0),
        });

        let mut threads = Vec::with_capacity(thread_count);
        for idx in 0..thread_count {
            let shared = shared.clone();
            let builder = std::thread::Builder::new().name(format!("sim-worker-{idx}"));
            let handle = builder
                .spawn(move || worker_loop(shared))
                .map_err(|e| e.to_string())?;
            threads.push(handle);
        }

        Ok(Self { shared, threads })
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Enqueues a single work item; returns a handle to await its result.
    pub fn submit<F>(&self, priority: Priority, work: F) -> JobHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(JobState::default());
        let handle = JobHandle {
            state: state.clone(),
        };
        let seq = self.shared.seq.fetch_add(1, AtomicOrdering::Relaxed);
        let queued = QueuedJob {
            priority,
            seq,
            job: Box::new(work),
            state,
        };
        {
            let mut q = self.shared.queue.lock().unwrap();
            q.push(queued);
        }
        self.shared.cond.notify_one();
        handle
    }

    /// Enqueues `n` indexed work items; the returned handle completes when
    /// all of them have.
    pub fn submit_batch<F>(&self, priority: Priority, n: usize, work: F) -> BatchHandle
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        let mut handles = Vec::with_capacity(n);
        for i in 0..n {
            let work = work.clone();
            handles.push(self.submit(priority, move || work(i)));
        }
        BatchHandle { handles }
    }

    /// Number of jobs currently being executed by a worker thread.
    pub fn active_count(&self) -> usize {
        self.shared.active.load(AtomicOrdering::Relaxed)
    }

    /// Number of jobs still waiting in the queue.
    pub fn queued_count(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Drains in-flight work, rejects further submissions, joins threads.
    pub fn shutdown(mut self) {
        {
            let mut flag = self.shared.shutting_down.lock().unwrap();
            *flag = true;
        }
        self.shared.cond.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let signal = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(job) = queue.pop() {
                    break Signal::Job(job);
                }
                if *shared.shutting_down.lock().unwrap() {
                    break Signal::Shutdown;
                }
                queue = shared.cond.wait(queue).unwrap();
            }
        };

        match signal {
            Signal::Shutdown => break,
            Signal::Job(queued) => {
                shared.active.fetch_add(1, AtomicOrdering::Relaxed);
                let outcome = run_catching(queued.job);
                shared.active.fetch_sub(1, AtomicOrdering::Relaxed);

                let mut done = queued.state.done.lock().unwrap();
                *done = outcome;
                queued.state.cond.notify_all();
            }
        }
    }
}

fn run_catching(job: Job) -> JobOutcome {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
        Ok(()) => JobOutcome::Completed,
        Err(_) => {
            tracing::warn!("worker pool job panicked; batch handle marked failed");
            JobOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn submit_and_wait_runs_job() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicI32::new(0));
        let c = counter.clone();
        let handle = pool.submit(Priority::Normal, move || {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        });
        handle.wait().unwrap();
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
        pool.shutdown();
    }

    #[test]
    fn batch_waits_for_all_items() {
        let pool = WorkerPool::new(4).unwrap();
        let counter = Arc::new(AtomicI32::new(0));
        let c = counter.clone();
        let batch = pool.submit_batch(Priority::Normal, 100, move |_i| {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        });
        let failed = batch.wait();
        assert_eq!(failed, 0);
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 100);
        pool.shutdown();
    }

    #[test]
    fn panicking_job_fails_its_handle_without_poisoning_pool() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool.submit(Priority::Normal, || panic!("boom"));
        assert!(handle.wait().is_err());

        // pool still works afterwards
        let counter = Arc::new(AtomicI32::new(0));
        let c = counter.clone();
        let handle2 = pool.submit(Priority::Normal, move || {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        });
        handle2.wait().unwrap();
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
        pool.shutdown();
    }

    #[test]
    fn higher_priority_drains_first() {
        let pool = WorkerPool::new(1).unwrap();
        // Block the single worker so jobs pile up in priority order.
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let gate2 = gate.clone();
        let block = pool.submit(Priority::Normal, move || {
            let (lock, cond) = &*gate2;
            let mut ready = lock.lock().unwrap();
            while !*ready {
                ready = cond.wait(ready).unwrap();
            }
        });

        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let _low = pool.submit(Priority::Low, move || o1.lock().unwrap().push("low"));
        let o2 = order.clone();
        let _crit = pool.submit(Priority::Critical, move || o2.lock().unwrap().push("critical"));
        let o3 = order.clone();
        let _normal = pool.submit(Priority::Normal, move || o3.lock().unwrap().push("normal"));

        {
            let (lock, cond) = &*gate;
            *lock.lock().unwrap() = true;
            cond.notify_all();
        }
        block.wait().ok();
        // give the pool a moment to drain the remaining three
        std::thread::sleep(std::time::Duration::from_millis(50));
        let recorded = order.lock().unwrap().clone();
        assert_eq!(recorded, vec!["critical", "normal", "low"]);
        pool.shutdown();
    }
}
