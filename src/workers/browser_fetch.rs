//! Headless-browser fetch worker for dynamic templates.
//!
//! Each job gets a freshly launched browser with the next proxy and
//! user agent from the rotator baked into the process, so identity and
//! cookies never leak between jobs. A fixed-size tab pool bounds how
//! many browsers run at once; when every slot is busy the job fails
//! fast and rides the queue's retry path instead of blocking a worker.

#[cfg(feature = "browser")]
use std::sync::Arc;
#[cfg(feature = "browser")]
use std::time::Duration;

use async_trait::async_trait;

#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
#[cfg(feature = "browser")]
use tracing::{debug, info};

#[cfg(feature = "browser")]
use crate::extract::extract;
#[cfg(feature = "browser")]
use crate::identity::IdentityRotator;
use crate::queue::{Job, JobOutput};
#[cfg(feature = "browser")]
use crate::queue::{JobSpec, ScrapeTarget};

use super::{Worker, WorkerError};
#[cfg(feature = "browser")]
use super::jitter;

/// Bounds concurrent browser launches.
#[cfg(feature = "browser")]
pub struct TabPool {
    permits: Arc<Semaphore>,
}

#[cfg(feature = "browser")]
pub struct TabGuard {
    _permit: OwnedSemaphorePermit,
}

#[cfg(feature = "browser")]
impl TabPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Claim a tab slot without waiting.
    pub fn try_acquire(&self) -> Option<TabGuard> {
        self.permits
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| TabGuard { _permit: permit })
    }

    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(feature = "browser")]
pub struct BrowserFetchWorker {
    rotator: Arc<IdentityRotator>,
    tabs: TabPool,
    timeout: Duration,
    jitter_ms: u64,
}

#[cfg(feature = "browser")]
impl BrowserFetchWorker {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    pub fn new(
        rotator: Arc<IdentityRotator>,
        tabs: usize,
        timeout: Duration,
        jitter_ms: u64,
    ) -> Self {
        Self {
            rotator,
            tabs: TabPool::new(tabs),
            timeout,
            jitter_ms,
        }
    }

    fn find_chrome() -> Result<std::path::PathBuf, WorkerError> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }

        Err(WorkerError::Browser(
            "Chrome/Chromium not found; install chromium or google-chrome".into(),
        ))
    }

    async fn launch(&self) -> Result<Browser, WorkerError> {
        let chrome_path = Self::find_chrome()?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-software-rasterizer");

        if let Some(proxy) = self.rotator.proxy() {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }

        let config = builder.build().map_err(WorkerError::Browser)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| WorkerError::Browser(err.to_string()))?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(browser)
    }

    async fn render(&self, browser: &Browser, target: &ScrapeTarget) -> Result<String, WorkerError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|err| WorkerError::Browser(err.to_string()))?;
        page.set_user_agent(self.rotator.user_agent())
            .await
            .map_err(|err| WorkerError::Browser(err.to_string()))?;

        debug!(url = %target.url, "navigating");
        page.goto(&target.url)
            .await
            .map_err(|err| WorkerError::Browser(err.to_string()))?;

        // Dynamic pages fill in after load; poll for the readiness
        // selector (falling back to the list selector) before reading
        // the DOM.
        let wait_for = target
            .selectors
            .wait_for
            .as_deref()
            .unwrap_or(&target.selectors.list);
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            if page.find_element(wait_for).await.is_ok() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(WorkerError::Browser(format!(
                    "timed out waiting for {wait_for:?} on {}",
                    target.url
                )));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        page.content()
            .await
            .map_err(|err| WorkerError::Browser(err.to_string()))
    }

    async fn fetch(&self, target: &ScrapeTarget) -> Result<String, WorkerError> {
        let mut browser = self.launch().await?;
        let result = tokio::time::timeout(self.timeout * 2, self.render(&browser, target))
            .await
            .unwrap_or_else(|_| {
                Err(WorkerError::Browser(format!(
                    "navigation timed out for {}",
                    target.url
                )))
            });
        // The whole browser is discarded with the job; the next job
        // launches a clean one with an empty cookie jar.
        let _ = browser.close().await;
        let _ = browser.wait().await;
        result
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl Worker for BrowserFetchWorker {
    async fn execute(&self, job: &Job) -> Result<JobOutput, WorkerError> {
        let target = match &job.spec {
            JobSpec::Scrape(target) => target,
            _ => return Err(WorkerError::UnsupportedJob),
        };

        let _tab = self.tabs.try_acquire().ok_or(WorkerError::NoIdleTab)?;
        info!(url = %target.url, idle_tabs = self.tabs.idle(), "browser fetch");

        jitter(self.jitter_ms).await;
        let html = self.fetch(target).await?;

        Ok(JobOutput::Links(extract(
            &target.selectors,
            &target.filters,
            target.cursor.as_deref(),
            &html,
            &target.url,
        )))
    }
}

// Stub for when the browser feature is disabled.
#[cfg(not(feature = "browser"))]
pub struct BrowserFetchWorker;

#[cfg(not(feature = "browser"))]
impl BrowserFetchWorker {
    pub fn new(
        _rotator: std::sync::Arc<crate::identity::IdentityRotator>,
        _tabs: usize,
        _timeout: std::time::Duration,
        _jitter_ms: u64,
    ) -> Self {
        Self
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl Worker for BrowserFetchWorker {
    async fn execute(&self, _job: &Job) -> Result<JobOutput, WorkerError> {
        Err(WorkerError::Browser(
            "browser support not compiled; rebuild with --features browser".into(),
        ))
    }
}

#[cfg(all(test, feature = "browser"))]
mod tests {
    use super::*;

    #[test]
    fn test_tab_pool_exhaustion_and_release() {
        let pool = TabPool::new(2);
        let a = pool.try_acquire().unwrap();
        let _b = pool.try_acquire().unwrap();
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.idle(), 0);

        drop(a);
        assert!(pool.try_acquire().is_some());
    }
}
