//! A fixed-size pool of worker threads executing scheduled jobs.
//!
//! Jobs are plain closures. Scheduling returns a [`JobHandle`] whose
//! [`wait`](JobHandle::wait) blocks the calling thread until the job has run
//! and hands back its result. Blocking on a handle (or on
//! [`JobSystem::wait_idle`], or on a [`JobGroup`]) is the only suspension
//! point; jobs never yield.
//!
//! # Example
//!
//! ```
//! use redgraph_core::jobs::JobSystem;
//!
//! let jobs = JobSystem::new(4);
//! let handles: Vec<_> = (0..4u32).map(|i| jobs.schedule(move || i * 10)).collect();
//! let results: Vec<u32> = handles.into_iter().map(|h| h.wait()).collect();
//! assert_eq!(results, vec![0, 10, 20, 30]);
//! ```

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    /// Jobs scheduled but not yet finished (queued + running).
    pending: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    work_available: Condvar,
    idle: Condvar,
}

impl Shared {
    fn finish_one(&self) {
        let mut state = self.state.lock();
        state.pending -= 1;
        if state.pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// Job system owning a fixed pool of worker threads.
///
/// Dropping the system drains every queued job and joins the workers.
pub struct JobSystem {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl JobSystem {
    /// Creates a job system with `thread_count` workers (at least one).
    pub fn new(thread_count: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                pending: 0,
                shutdown: false,
            }),
            work_available: Condvar::new(),
            idle: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(thread_count.max(1));
        for index in 0..thread_count.max(1) {
            let worker_shared = Arc::clone(&shared);
            match thread::Builder::new()
                .name(format!("redgraph-worker-{index}"))
                .spawn(move || worker_loop(worker_shared))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => log::error!("Failed to spawn job worker {}: {}", index, e),
            }
        }

        if workers.is_empty() {
            log::warn!("No job workers could be spawned, jobs will run inline");
        } else {
            log::info!("JobSystem started with {} workers", workers.len());
        }

        Self { shared, workers }
    }

    /// Creates a job system sized to the number of available CPU cores.
    pub fn default_threads() -> Self {
        Self::new(thread::available_parallelism().map_or(1, |n| n.get()))
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of jobs scheduled but not yet finished.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().pending
    }

    /// Schedules `f` on a worker thread.
    ///
    /// A panic inside the job is captured and re-raised from
    /// [`JobHandle::wait`].
    pub fn schedule<T, F>(&self, f: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let slot = Arc::new(JobSlot {
            result: Mutex::new(None),
            ready: Condvar::new(),
        });

        let job_slot = Arc::clone(&slot);
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            *job_slot.result.lock() = Some(result);
            job_slot.ready.notify_all();
        });

        if self.workers.is_empty() {
            job();
            return JobHandle { slot };
        }

        {
            let mut state = self.shared.state.lock();
            state.pending += 1;
            state.jobs.push_back(job);
        }
        self.shared.work_available.notify_one();

        JobHandle { slot }
    }

    /// Schedules `f` as a member of `group`.
    ///
    /// The job counts towards [`JobGroup::wait`] until it has finished, even
    /// if its handle is dropped or it panics.
    pub fn schedule_in<T, F>(&self, group: &Arc<JobGroup>, f: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let member = GroupMember::enter(group);
        self.schedule(move || {
            let _member = member;
            f()
        })
    }

    /// Blocks until every scheduled job has finished.
    ///
    /// This includes jobs of unrelated owners. Use a [`JobGroup`] to wait
    /// for a subset.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while state.pending > 0 {
            self.shared.idle.wait(&mut state);
        }
    }
}

impl Default for JobSystem {
    fn default() -> Self {
        Self::default_threads()
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.work_available.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("Job worker terminated with a panic");
            }
        }
    }
}

impl std::fmt::Debug for JobSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSystem")
            .field("threads", &self.workers.len())
            .field("pending", &self.pending())
            .finish()
    }
}

fn worker_loop(shared: Arc<Shared>) {
    crate::set_thread_name!("redgraph-worker");
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                if state.shutdown {
                    return;
                }
                shared.work_available.wait(&mut state);
            }
        };

        {
            crate::profile_scope!("job");
            job();
        }
        shared.finish_one();
    }
}

/// A set of jobs that can be waited for without waiting for the whole pool.
#[derive(Debug, Default)]
pub struct JobGroup {
    pending: Mutex<usize>,
    finished: Condvar,
}

impl JobGroup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of member jobs not yet finished.
    pub fn pending(&self) -> usize {
        *self.pending.lock()
    }

    /// Blocks until every member job has finished.
    pub fn wait(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.finished.wait(&mut pending);
        }
    }
}

/// Membership of one job in a [`JobGroup`], released on drop.
struct GroupMember(Arc<JobGroup>);

impl GroupMember {
    fn enter(group: &Arc<JobGroup>) -> Self {
        *group.pending.lock() += 1;
        Self(Arc::clone(group))
    }
}

impl Drop for GroupMember {
    fn drop(&mut self) {
        let mut pending = self.0.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            self.0.finished.notify_all();
        }
    }
}

struct JobSlot<T> {
    result: Mutex<Option<thread::Result<T>>>,
    ready: Condvar,
}

/// Handle to the result of a scheduled job.
pub struct JobHandle<T> {
    slot: Arc<JobSlot<T>>,
}

impl<T> JobHandle<T> {
    /// Whether the job has finished running.
    pub fn is_finished(&self) -> bool {
        self.slot.result.lock().is_some()
    }

    /// Blocks until the job has run and returns its result.
    ///
    /// # Panics
    ///
    /// Resumes the job's panic if the job panicked.
    pub fn wait(self) -> T {
        let mut result = self.slot.result.lock();
        loop {
            if let Some(result) = result.take() {
                match result {
                    Ok(value) => return value,
                    Err(payload) => panic::resume_unwind(payload),
                }
            }
            self.slot.ready.wait(&mut result);
        }
    }
}

impl<T> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_schedule_returns_value() {
        let jobs = JobSystem::new(2);
        let handle = jobs.schedule(|| 21 * 2);
        assert_eq!(handle.wait(), 42);
    }

    #[test]
    fn test_thread_count_at_least_one() {
        let jobs = JobSystem::new(0);
        assert_eq!(jobs.thread_count(), 1);
    }

    #[test]
    fn test_wait_idle_waits_for_all_jobs() {
        let jobs = JobSystem::new(3);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            // Handles are dropped; wait_idle must still account for the jobs.
            let _ = jobs.schedule(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        jobs.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
        assert_eq!(jobs.pending(), 0);
    }

    #[test]
    fn test_handles_joined_in_order() {
        let jobs = JobSystem::new(4);
        let handles: Vec<_> = (0..4u64)
            .map(|i| {
                jobs.schedule(move || {
                    thread::sleep(Duration::from_millis((3 - i) * 5));
                    i
                })
            })
            .collect();
        let results: Vec<u64> = handles.into_iter().map(JobHandle::wait).collect();
        assert_eq!(results, vec![0, 1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "job failed")]
    fn test_panic_is_resumed_on_wait() {
        let jobs = JobSystem::new(1);
        let handle = jobs.schedule(|| -> u32 { panic!("job failed") });
        handle.wait();
    }

    #[test]
    fn test_worker_survives_job_panic() {
        let jobs = JobSystem::new(1);
        let failed = jobs.schedule(|| -> u32 { panic!("boom") });
        let result = panic::catch_unwind(AssertUnwindSafe(|| failed.wait()));
        assert!(result.is_err());
        assert_eq!(jobs.schedule(|| 7).wait(), 7);
    }

    #[test]
    fn test_group_wait_ignores_other_jobs() {
        let jobs = JobSystem::new(2);
        let (release, blocked) = std::sync::mpsc::channel::<()>();
        let _ = jobs.schedule(move || {
            let _ = blocked.recv_timeout(Duration::from_secs(10));
        });

        let group = JobGroup::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            let _ = jobs.schedule_in(&group, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        group.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(group.pending(), 0);
        assert_eq!(jobs.pending(), 1);

        release.send(()).unwrap();
        jobs.wait_idle();
    }

    #[test]
    fn test_group_member_released_on_panic() {
        let jobs = JobSystem::new(1);
        let group = JobGroup::new();
        let failed = jobs.schedule_in(&group, || -> u32 { panic!("boom") });
        group.wait();
        assert_eq!(group.pending(), 0);
        assert!(panic::catch_unwind(AssertUnwindSafe(|| failed.wait())).is_err());
    }

    #[test]
    fn test_drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let jobs = JobSystem::new(1);
            for _ in 0..8 {
                let counter = Arc::clone(&counter);
                let _ = jobs.schedule(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
