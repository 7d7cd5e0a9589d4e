//! Single-consumer, in-order executor supporting front-of-queue submission.
//!
//! The focus manager needs both ordinary back-of-queue submission (for
//! `acquireChannel`/`releaseChannel`) and front-of-queue submission (for
//! `stopForegroundActivity`/`stopAllActivities`, which must preempt
//! already-queued acquires). A single double-ended queue behind one mutex
//! and one condition variable is sufficient for both.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
    thread,
};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    jobs: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    shutting_down: Mutex<bool>,
}

/// An in-order, single-consumer executor backed by one OS thread.
pub(crate) struct Executor {
    shared: Arc<Shared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Executor {
    /// Spawns the executor's worker thread.
    pub(crate) fn new(thread_name: impl Into<String>) -> Self {
        let shared = Arc::new(Shared {
            jobs: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutting_down: Mutex::new(false),
        });

        let worker_shared = shared.clone();
        let join = thread::Builder::new()
            .name(thread_name.into())
            .spawn(move || Self::run(worker_shared))
            .expect("failed to spawn focus executor worker thread");

        Self {
            shared,
            worker: Mutex::new(Some(join)),
        }
    }

    /// Enqueues `job` to run after every job already queued.
    pub(crate) fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.shared.jobs.lock().unwrap().push_back(Box::new(job));
        self.shared.condvar.notify_all();
    }

    /// Enqueues `job` to run before every job already queued, preempting
    /// them. Used by operations that must take effect ahead of anything
    /// already pending.
    pub(crate) fn submit_front(&self, job: impl FnOnce() + Send + 'static) {
        self.shared.jobs.lock().unwrap().push_front(Box::new(job));
        self.shared.condvar.notify_all();
    }

    /// Signals the worker to drain remaining jobs and exit, then joins it.
    pub(crate) fn shutdown(&self) {
        *self.shared.shutting_down.lock().unwrap() = true;
        self.shared.condvar.notify_all();
        if let Some(join) = self.worker.lock().unwrap().take() {
            let _ = join.join();
        }
    }

    fn run(shared: Arc<Shared>) {
        loop {
            let mut jobs = shared.jobs.lock().unwrap();
            while jobs.is_empty() && !*shared.shutting_down.lock().unwrap() {
                jobs = shared.condvar.wait(jobs).unwrap();
            }

            let job = jobs.pop_front();
            let is_shutting_down = *shared.shutting_down.lock().unwrap();
            drop(jobs);

            match job {
                Some(job) => job(),
                None if is_shutting_down => break,
                None => continue,
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
