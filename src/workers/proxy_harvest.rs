//! Proxy harvest worker: scrapes a public proxy listing and feeds the
//! fast entries into the identity rotator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::config::ProxyConfig;
use crate::identity::IdentityRotator;
use crate::queue::{Job, JobOutput, JobSpec};

use super::{jitter, Worker, WorkerError};

pub struct ProxyHarvestWorker {
    rotator: Arc<IdentityRotator>,
    config: ProxyConfig,
    timeout: Duration,
    jitter_ms: u64,
}

impl ProxyHarvestWorker {
    pub fn new(
        rotator: Arc<IdentityRotator>,
        config: ProxyConfig,
        timeout: Duration,
        jitter_ms: u64,
    ) -> Self {
        Self {
            rotator,
            config,
            timeout,
            jitter_ms,
        }
    }

    async fn fetch_listing(&self) -> Result<String, WorkerError> {
        // The listing is fetched directly; at startup there may be no
        // working proxy to route through yet.
        let client = Client::builder()
            .user_agent(self.rotator.user_agent())
            .timeout(self.timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        let response = client.get(&self.config.source_url).send().await?;
        if !response.status().is_success() {
            return Err(WorkerError::Status {
                status: response.status().as_u16(),
                url: self.config.source_url.clone(),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Worker for ProxyHarvestWorker {
    async fn execute(&self, job: &Job) -> Result<JobOutput, WorkerError> {
        if !matches!(job.spec, JobSpec::HarvestProxies) {
            return Err(WorkerError::UnsupportedJob);
        }

        jitter(self.jitter_ms).await;
        let html = self.fetch_listing().await?;
        let proxies = parse_listing(&html, &self.config);
        info!(count = proxies.len(), "harvested proxies");

        self.rotator.update_proxies(proxies.clone());
        Ok(JobOutput::Proxies(proxies))
    }
}

/// Pull "host:port" entries out of the listing page, keeping only rows
/// at or below the configured speed ceiling.
fn parse_listing(html: &str, config: &ProxyConfig) -> Vec<String> {
    let row = match Selector::parse(&config.row_selector) {
        Ok(row) => row,
        Err(err) => {
            warn!("invalid proxy row selector {:?}: {err}", config.row_selector);
            return Vec::new();
        }
    };
    let addr = match Selector::parse(&config.addr_selector) {
        Ok(addr) => addr,
        Err(err) => {
            warn!(
                "invalid proxy addr selector {:?}: {err}",
                config.addr_selector
            );
            return Vec::new();
        }
    };
    let speed = Selector::parse(&config.speed_selector).ok();

    let document = Html::parse_document(html);
    let mut proxies = Vec::new();
    for element in document.select(&row) {
        let Some(addr) = element
            .select(&addr)
            .next()
            .map(|cell| cell.text().collect::<String>().trim().to_string())
        else {
            continue;
        };
        if !addr.contains(':') {
            continue;
        }

        if let Some(speed) = &speed {
            let speed = element
                .select(speed)
                .next()
                .and_then(|cell| cell.text().collect::<String>().trim().parse::<f64>().ok());
            match speed {
                Some(speed) if speed <= config.max_speed => {}
                _ => continue,
            }
        }

        proxies.push(addr);
    }
    proxies
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <table><tbody>
          <tr><td class="addr"> 10.0.0.1:8080 </td><td class="speed">0.2</td></tr>
          <tr><td class="addr">10.0.0.2:3128</td><td class="speed">0.9</td></tr>
          <tr><td class="addr">not-a-proxy</td><td class="speed">0.1</td></tr>
          <tr><td class="addr">10.0.0.3:1080</td><td class="speed">fast</td></tr>
          <tr><td class="addr">10.0.0.4:8000</td><td class="speed">0.4</td></tr>
        </tbody></table>
    "#;

    fn config() -> ProxyConfig {
        ProxyConfig {
            row_selector: "tbody tr".into(),
            addr_selector: "td.addr".into(),
            speed_selector: "td.speed".into(),
            max_speed: 0.4,
            ..Default::default()
        }
    }

    #[test]
    fn test_keeps_only_fast_wellformed_rows() {
        let proxies = parse_listing(LISTING, &config());
        assert_eq!(proxies, vec!["10.0.0.1:8080", "10.0.0.4:8000"]);
    }

    #[test]
    fn test_invalid_row_selector_yields_nothing() {
        let mut config = config();
        config.row_selector = ":::".into();
        assert!(parse_listing(LISTING, &config).is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_harvest_jobs() {
        let worker = ProxyHarvestWorker::new(
            Arc::new(IdentityRotator::default()),
            ProxyConfig::default(),
            Duration::from_secs(5),
            0,
        );
        let err = worker
            .execute(&Job::persist("u1".into(), Vec::new(), false))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::UnsupportedJob));
    }
}
