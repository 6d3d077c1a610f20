//! Workers: one capability, execute a job.
//!
//! Each queue binds exactly one worker. The four implementations are
//! the plain HTTP fetcher, the headless-browser fetcher, the
//! proxy-harvest fetcher, and the page persister. Shared concerns
//! (identity rotation, extraction, jitter) live in their own modules
//! rather than a base type, so each worker composes what it needs.

mod browser_fetch;
mod http_fetch;
mod persist;
mod proxy_harvest;

pub use browser_fetch::BrowserFetchWorker;
#[cfg(feature = "browser")]
pub use browser_fetch::TabPool;
pub use http_fetch::HttpFetchWorker;
pub use persist::PersistWorker;
pub use proxy_harvest::ProxyHarvestWorker;

use async_trait::async_trait;
use thiserror::Error;

use crate::queue::{Job, JobOutput};
use crate::store::StoreError;

/// Errors a worker can fail a job with. The queue treats them all as
/// retryable up to the trial cap.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("no browser tab available")]
    NoIdleTab,

    #[error("browser error: {0}")]
    Browser(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job kind not handled by this worker")]
    UnsupportedJob,
}

/// A queue's bound executor.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<JobOutput, WorkerError>;
}

/// Short random pre-fetch delay, up to `max_ms` milliseconds.
///
/// Desynchronizes concurrent requests so a burst of jobs doesn't hit
/// a target (or the rotation pointer) in lockstep.
pub(crate) async fn jitter(max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let ms = fastrand::u64(0..max_ms);
    tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
}
