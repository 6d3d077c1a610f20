//! Job and queue statistics.
//!
//! Process-lifetime counters over job outcomes, seeded from the last
//! persisted snapshot at startup and written back on a fixed period.
//! A one-line summary is logged at the end of every cycle; it goes
//! out at warn level so it survives production log filtering.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::now_ms;
use crate::store::{StatsStore, StoreError};

/// Gauge of one queue's depth at the last dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub running: usize,
    pub waiting: usize,
}

/// Serializable counter state, also the persisted snapshot format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub jobs_pushed: u64,
    /// First-trial pushes only; the denominator for the summary.
    pub jobs_pushed_unique: u64,
    pub jobs_done: u64,
    /// Jobs that succeeded after at least one failure.
    pub jobs_resolved: u64,
    pub jobs_failed: u64,
    /// First-trial failures only.
    pub jobs_failed_unique: u64,
    pub jobs_exceeded_trials: u64,
    pub jobs_delayed: u64,
    pub jobs_refreshed: u64,
    #[serde(default)]
    pub urls_failed: HashMap<String, u64>,
    #[serde(default)]
    pub urls_exceeded_trials: HashMap<String, u64>,
    #[serde(default)]
    pub queues_failed: HashMap<String, u64>,
    #[serde(default)]
    pub queues_jobs: HashMap<String, QueueDepth>,
    /// Filled in at persist time.
    #[serde(default)]
    pub success_pct: u32,
    #[serde(default)]
    pub error_pct: u32,
    /// Snapshot time (epoch ms), set at persist time.
    #[serde(default)]
    pub date: i64,
}

/// Success and error ratios over unique (first-trial) jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub success_pct: u32,
    pub error_pct: u32,
}

/// Process-lifetime statistics aggregator.
#[derive(Default)]
pub struct Stats {
    inner: Mutex<StatsSnapshot>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collector seeded from the latest stored snapshot so
    /// counters survive restarts.
    pub async fn load(store: &dyn StatsStore) -> Result<Self, StoreError> {
        let seed = store.load_latest().await?.unwrap_or_default();
        Ok(Self {
            inner: Mutex::new(seed),
        })
    }

    /// A job entered a queue. `trials == 0` means first push.
    pub fn job_pushed(&self, trials: u32) {
        let mut s = self.inner.lock().unwrap();
        if trials == 0 {
            s.jobs_pushed_unique += 1;
        }
        s.jobs_pushed += 1;
    }

    /// A job completed. `trials > 0` means it had failed before.
    pub fn job_done(&self, trials: u32) {
        let mut s = self.inner.lock().unwrap();
        if trials > 0 {
            s.jobs_resolved += 1;
        }
        s.jobs_done += 1;
    }

    /// A job execution failed.
    pub fn job_failed(&self, url: Option<&str>, queue: &str, trials: u32) {
        let mut s = self.inner.lock().unwrap();
        if let Some(url) = url {
            *s.urls_failed.entry(url.to_string()).or_default() += 1;
        }
        *s.queues_failed.entry(queue.to_string()).or_default() += 1;
        if trials == 1 {
            s.jobs_failed_unique += 1;
        }
        s.jobs_failed += 1;
    }

    /// A job ran out of trials and was dropped.
    pub fn job_exceeded_trials(&self, url: Option<&str>) {
        let mut s = self.inner.lock().unwrap();
        if let Some(url) = url {
            *s.urls_exceeded_trials.entry(url.to_string()).or_default() += 1;
        }
        s.jobs_exceeded_trials += 1;
    }

    /// Queue depth at dispatch time.
    pub fn queue_jobs(&self, queue: &str, running: usize, waiting: usize) {
        let mut s = self.inner.lock().unwrap();
        s.queues_jobs
            .insert(queue.to_string(), QueueDepth { running, waiting });
    }

    /// A result arrived after its cycle moved on and was discarded.
    pub fn job_delayed(&self) {
        self.inner.lock().unwrap().jobs_delayed += 1;
    }

    /// An on-demand refresh was requested.
    pub fn job_refreshed(&self) {
        self.inner.lock().unwrap().jobs_refreshed += 1;
    }

    /// Done/pushed and failed/pushed percentages over unique jobs.
    pub fn summary(&self) -> Summary {
        let s = self.inner.lock().unwrap();
        Self::summarize(&s)
    }

    fn summarize(s: &StatsSnapshot) -> Summary {
        if s.jobs_pushed_unique == 0 {
            return Summary {
                success_pct: 0,
                error_pct: 0,
            };
        }
        Summary {
            success_pct: (s.jobs_done * 100 / s.jobs_pushed_unique) as u32,
            error_pct: (s.jobs_failed_unique * 100 / s.jobs_pushed_unique) as u32,
        }
    }

    /// Current counters with the summary and timestamp filled in.
    pub fn snapshot(&self) -> StatsSnapshot {
        let s = self.inner.lock().unwrap();
        let summary = Self::summarize(&s);
        let mut snap = s.clone();
        snap.success_pct = summary.success_pct;
        snap.error_pct = summary.error_pct;
        snap.date = now_ms();
        snap
    }

    /// Per-cycle summary line.
    pub fn log(&self, shard: u32) {
        let summary = self.summary();
        let s = self.inner.lock().unwrap();
        warn!(
            shard,
            success_pct = summary.success_pct,
            error_pct = summary.error_pct,
            pushed = s.jobs_pushed,
            done = s.jobs_done,
            failed = s.jobs_failed,
            delayed = s.jobs_delayed,
            "stats"
        );
    }

    /// Write the current snapshot to the store.
    pub async fn persist(&self, store: &dyn StatsStore) {
        let snap = self.snapshot();
        if let Err(err) = store.save_snapshot(&snap).await {
            tracing::error!("stats: couldn't save snapshot: {}", err);
        }
    }
}
