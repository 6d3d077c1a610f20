//! Job envelope and payload types shared by queues and workers.

use std::sync::Arc;

use crate::models::{Filters, Link, Selectors, UserPage};

/// Which page a scrape result belongs to.
#[derive(Debug, Clone)]
pub enum PageRef {
    /// Cycle-scheduled: indices into the live cycle's user list.
    Cycle {
        user_index: usize,
        page_index: usize,
    },
    /// On-demand refresh: direct user id plus page slot.
    Direct { user_id: String, page_index: usize },
}

/// Everything a fetch worker needs to scrape one page.
#[derive(Debug, Clone)]
pub struct ScrapeTarget {
    /// Shard of the cycle that emitted the job; checked against the
    /// live cycle when the result comes back.
    pub shard: u32,
    pub page: PageRef,
    pub url: String,
    pub selectors: Arc<Selectors>,
    pub filters: Filters,
    /// Id of the most recent already-known link, bounding extraction.
    pub cursor: Option<String>,
}

/// Job payload, one variant per worker kind.
#[derive(Debug, Clone)]
pub enum JobSpec {
    Scrape(ScrapeTarget),
    Persist {
        user_id: String,
        pages: Vec<(usize, UserPage)>,
    },
    HarvestProxies,
}

/// A unit of work queued for one worker.
///
/// The id is assigned at first push and stays stable across retries
/// so log lines for one job correlate.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    /// 0 until the first failure; incremented on each retry push.
    pub trials: u32,
    /// Cycle-scheduled jobs are bulk-cancelable; on-demand jobs are not.
    pub scheduled: bool,
    pub spec: JobSpec,
}

impl Job {
    pub fn scrape(target: ScrapeTarget, scheduled: bool) -> Self {
        Self {
            id: String::new(),
            trials: 0,
            scheduled,
            spec: JobSpec::Scrape(target),
        }
    }

    pub fn persist(user_id: String, pages: Vec<(usize, UserPage)>, scheduled: bool) -> Self {
        Self {
            id: String::new(),
            trials: 0,
            scheduled,
            spec: JobSpec::Persist { user_id, pages },
        }
    }

    pub fn harvest_proxies() -> Self {
        Self {
            id: String::new(),
            trials: 0,
            scheduled: false,
            spec: JobSpec::HarvestProxies,
        }
    }

    /// Target URL, for failure tallies and logs.
    pub fn url(&self) -> Option<&str> {
        match &self.spec {
            JobSpec::Scrape(target) => Some(&target.url),
            _ => None,
        }
    }
}

/// What a worker produced.
#[derive(Debug, Clone)]
pub enum JobOutput {
    /// Extracted links, newest first.
    Links(Vec<Link>),
    /// Refreshed "host:port" proxy list.
    Proxies(Vec<String>),
    /// Page mutations written to storage.
    Persisted,
}

/// A successfully executed job handed back to its completion handler.
#[derive(Debug, Clone)]
pub struct CompletedJob {
    pub job: Job,
    pub output: JobOutput,
}

impl CompletedJob {
    /// Extracted links, or an empty slice for non-scrape outputs.
    pub fn links(&self) -> &[Link] {
        match &self.output {
            JobOutput::Links(links) => links,
            _ => &[],
        }
    }
}

/// Callback invoked when a job completes successfully.
pub type CompletionHandler = Arc<dyn Fn(CompletedJob) + Send + Sync>;
