//! Bounded-concurrency job queues.
//!
//! A queue pulls waiting jobs, dispatches up to `concurrency` of them
//! at a time to its single bound worker, and re-pushes failures until
//! the trial cap. Cycle-scheduled jobs waiting in the queue can be
//! bulk-cancelled; jobs already handed to the worker run to
//! completion and are reconciled by the scheduler instead.

mod job;
mod registry;

pub use job::{CompletedJob, CompletionHandler, Job, JobOutput, JobSpec, PageRef, ScrapeTarget};
pub use registry::{QueueRegistry, RegistryWorkers};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::stats::Stats;
use crate::workers::Worker;

struct Entry {
    job: Job,
    on_complete: Option<CompletionHandler>,
}

struct QueueCore {
    name: String,
    worker: Arc<dyn Worker>,
    max_trials: u32,
    stats: Arc<Stats>,
    semaphore: Arc<Semaphore>,
    waiting: Mutex<VecDeque<Entry>>,
    notify: Notify,
    running: AtomicUsize,
}

/// A named job queue bound to one worker.
#[derive(Clone)]
pub struct JobQueue {
    core: Arc<QueueCore>,
}

impl JobQueue {
    /// Create a queue. Call [`JobQueue::start`] to begin dispatching.
    pub fn new(
        name: &str,
        worker: Arc<dyn Worker>,
        concurrency: usize,
        max_trials: u32,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            core: Arc::new(QueueCore {
                name: name.to_string(),
                worker,
                max_trials,
                stats,
                semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
                waiting: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                running: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Jobs waiting to be dispatched.
    pub fn waiting(&self) -> usize {
        self.core.waiting.lock().unwrap().len()
    }

    /// Jobs currently executing.
    pub fn running(&self) -> usize {
        self.core.running.load(Ordering::SeqCst)
    }

    /// Enqueue a job. Assigns the job id on first push; the id is
    /// kept across retries.
    pub fn push(&self, job: Job, on_complete: Option<CompletionHandler>) {
        self.core.push(job, on_complete);
    }

    /// Drop all waiting jobs pushed by the cycle. On-demand jobs and
    /// jobs already dispatched are untouched.
    pub fn clear(&self) {
        let removed = {
            let mut waiting = self.core.waiting.lock().unwrap();
            let before = waiting.len();
            waiting.retain(|entry| !entry.job.scheduled);
            before - waiting.len()
        };
        if removed > 0 {
            warn!("queue({}): removed {} scheduled jobs", self.core.name, removed);
        }
    }

    /// Spawn the dispatch loop.
    pub fn start(&self) {
        let core = self.core.clone();
        tokio::spawn(async move {
            loop {
                let permit = core
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("queue semaphore closed");

                let entry = loop {
                    if let Some(entry) = core.waiting.lock().unwrap().pop_front() {
                        break entry;
                    }
                    core.notify.notified().await;
                };

                let core = core.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    core.run(entry).await;
                });
            }
        });
    }
}

impl QueueCore {
    fn push(self: &Arc<Self>, mut job: Job, on_complete: Option<CompletionHandler>) {
        if job.id.is_empty() {
            job.id = uuid::Uuid::new_v4().simple().to_string();
        }

        info!(
            queue = %self.name,
            job = %job.id,
            url = job.url().unwrap_or(""),
            scheduled = job.scheduled,
            trials = job.trials,
            "push job"
        );
        self.stats.job_pushed(job.trials);

        self.waiting
            .lock()
            .unwrap()
            .push_back(Entry { job, on_complete });
        self.notify.notify_one();
    }

    async fn run(self: Arc<Self>, entry: Entry) {
        let Entry { job, on_complete } = entry;

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let waiting = self.waiting.lock().unwrap().len();
        debug!(
            queue = %self.name,
            job = %job.id,
            running,
            waiting,
            "processing job"
        );
        self.stats.queue_jobs(&self.name, running, waiting);

        match self.worker.execute(&job).await {
            Ok(output) => {
                info!(queue = %self.name, job = %job.id, "done processing");
                self.stats.job_done(job.trials);
                if let Some(on_complete) = on_complete {
                    on_complete(CompletedJob { job, output });
                }
            }
            Err(err) => self.handle_failure(job, on_complete, err),
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
    }

    /// Failed jobs go to the back of the queue with an incremented
    /// trial count until they exceed the cap, then they are dropped
    /// for good.
    fn handle_failure(
        self: &Arc<Self>,
        mut job: Job,
        on_complete: Option<CompletionHandler>,
        err: crate::workers::WorkerError,
    ) {
        if job.trials == 0 {
            job.trials = 1;
        }

        warn!(
            queue = %self.name,
            job = %job.id,
            trials = job.trials,
            url = job.url().unwrap_or(""),
            "job failed: {}",
            err
        );
        self.stats.job_failed(job.url(), &self.name, job.trials);

        if job.trials > self.max_trials {
            warn!(queue = %self.name, job = %job.id, "job exceeded max trials");
            self.stats.job_exceeded_trials(job.url());
        } else {
            job.trials += 1;
            self.push(job, on_complete);
        }
    }
}
