//! Queue registry: one queue per worker kind, created at process
//! start and looked up by name.

use std::sync::Arc;

use crate::config::{LimitsConfig, QueueConfig};
use crate::stats::Stats;
use crate::workers::Worker;

use super::JobQueue;

/// Workers to bind, one per queue.
pub struct RegistryWorkers {
    pub static_scraper: Arc<dyn Worker>,
    pub dynamic_scraper: Arc<dyn Worker>,
    pub proxy_scraper: Arc<dyn Worker>,
    pub page: Arc<dyn Worker>,
}

/// Owns the four queues for the life of the process.
pub struct QueueRegistry {
    static_scraper: JobQueue,
    dynamic_scraper: JobQueue,
    proxy_scraper: JobQueue,
    page: JobQueue,
}

impl QueueRegistry {
    /// Build all queues and start their dispatch loops.
    pub fn new(
        queues: &QueueConfig,
        limits: &LimitsConfig,
        workers: RegistryWorkers,
        stats: Arc<Stats>,
    ) -> Self {
        let build = |name: &str, worker: Arc<dyn Worker>, concurrency: usize| {
            let queue = JobQueue::new(name, worker, concurrency, limits.max_trials, stats.clone());
            queue.start();
            queue
        };

        Self {
            static_scraper: build("static_scraper", workers.static_scraper, queues.static_scraper),
            dynamic_scraper: build(
                "dynamic_scraper",
                workers.dynamic_scraper,
                queues.dynamic_scraper,
            ),
            proxy_scraper: build("proxy_scraper", workers.proxy_scraper, queues.proxy_scraper),
            page: build("page", workers.page, queues.page),
        }
    }

    /// The scrape queue matching a template's `dynamic` flag.
    pub fn scraper(&self, dynamic: bool) -> &JobQueue {
        if dynamic {
            &self.dynamic_scraper
        } else {
            &self.static_scraper
        }
    }

    pub fn static_scraper(&self) -> &JobQueue {
        &self.static_scraper
    }

    pub fn dynamic_scraper(&self) -> &JobQueue {
        &self.dynamic_scraper
    }

    pub fn proxy_scraper(&self) -> &JobQueue {
        &self.proxy_scraper
    }

    pub fn page(&self) -> &JobQueue {
        &self.page
    }

    /// Lookup by queue name.
    pub fn get(&self, name: &str) -> Option<&JobQueue> {
        match name {
            "static_scraper" => Some(&self.static_scraper),
            "dynamic_scraper" => Some(&self.dynamic_scraper),
            "proxy_scraper" => Some(&self.proxy_scraper),
            "page" => Some(&self.page),
            _ => None,
        }
    }
}
