//! Plain HTTP fetch worker for static templates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::extract::extract;
use crate::identity::IdentityRotator;
use crate::queue::{Job, JobOutput, JobSpec};

use super::{jitter, Worker, WorkerError};

/// Fetches a page over HTTP through one rotated proxy identity and
/// hands the body to the extraction engine.
pub struct HttpFetchWorker {
    rotator: Arc<IdentityRotator>,
    timeout: Duration,
    jitter_ms: u64,
}

impl HttpFetchWorker {
    pub fn new(rotator: Arc<IdentityRotator>, timeout: Duration, jitter_ms: u64) -> Self {
        Self {
            rotator,
            timeout,
            jitter_ms,
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, WorkerError> {
        // A fresh client per request so the proxy and user agent
        // rotate with the pool, not with the worker's lifetime.
        let mut builder = Client::builder()
            .user_agent(self.rotator.user_agent())
            .timeout(self.timeout)
            .gzip(true)
            .brotli(true);
        if let Some(proxy) = self.rotator.proxy() {
            builder = builder.proxy(reqwest::Proxy::all(&proxy)?);
        }
        let client = builder.build()?;

        let response = client
            .get(url)
            .header("Cache-Control", "no-cache")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(WorkerError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl Worker for HttpFetchWorker {
    async fn execute(&self, job: &Job) -> Result<JobOutput, WorkerError> {
        let target = match &job.spec {
            JobSpec::Scrape(target) => target,
            _ => return Err(WorkerError::UnsupportedJob),
        };

        jitter(self.jitter_ms).await;
        let html = self.fetch(&target.url).await?;

        Ok(JobOutput::Links(extract(
            &target.selectors,
            &target.filters,
            target.cursor.as_deref(),
            &html,
            &target.url,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_scrape_jobs() {
        let worker = HttpFetchWorker::new(
            Arc::new(IdentityRotator::default()),
            Duration::from_secs(20),
            0,
        );
        let err = worker
            .execute(&Job::harvest_proxies())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::UnsupportedJob));
    }
}
