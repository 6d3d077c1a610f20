//! Process configuration.
//!
//! Settings load from a TOML file (path from the CLI or
//! `PAGEWATCH_CONFIG`), with serde defaults supplying the stock
//! values for anything the file omits.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level settings consumed by the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load from the given path, or defaults when no file is configured.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

/// Shard-cycle timing. One full cycle per shard is
/// scrape + 2 * buffer + update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Number of user shards; each shard gets its own cycle.
    #[serde(default = "default_shards")]
    pub shards: u32,
    /// Estimated duration of the scraping phase, seconds.
    #[serde(default = "default_scrape_secs")]
    pub scrape_secs: u64,
    /// Settling time after the scraping and updating phases, seconds.
    #[serde(default = "default_buffer_secs")]
    pub buffer_secs: u64,
    /// Estimated duration of the updating phase, seconds.
    #[serde(default = "default_update_secs")]
    pub update_secs: u64,
}

impl CycleConfig {
    pub fn scrape_phase(&self) -> Duration {
        Duration::from_secs(self.scrape_secs)
    }

    pub fn buffer(&self) -> Duration {
        Duration::from_secs(self.buffer_secs)
    }

    pub fn update_phase(&self) -> Duration {
        Duration::from_secs(self.update_secs)
    }

    /// Total length of one shard cycle.
    pub fn cycle_len(&self) -> Duration {
        self.scrape_phase() + self.buffer() * 2 + self.update_phase()
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            scrape_secs: default_scrape_secs(),
            buffer_secs: default_buffer_secs(),
            update_secs: default_update_secs(),
        }
    }
}

/// Hard caps shared across the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Attempts per job before it is dropped for good.
    #[serde(default = "default_max_trials")]
    pub max_trials: u32,
    /// Links kept per page, newest first.
    #[serde(default = "default_max_page_links")]
    pub max_page_links: usize,
    /// Pages a single user may register.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_trials: default_max_trials(),
            max_page_links: default_max_page_links(),
            max_pages: default_max_pages(),
        }
    }
}

/// Per-queue concurrency bounds.
///
/// The dynamic scraper bound doubles as the browser tab pool size, so
/// jobs normally never see an exhausted pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_static_concurrency")]
    pub static_scraper: usize,
    #[serde(default = "default_dynamic_concurrency")]
    pub dynamic_scraper: usize,
    #[serde(default = "default_proxy_concurrency")]
    pub proxy_scraper: usize,
    #[serde(default = "default_page_concurrency")]
    pub page: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            static_scraper: default_static_concurrency(),
            dynamic_scraper: default_dynamic_concurrency(),
            proxy_scraper: default_proxy_concurrency(),
            page: default_page_concurrency(),
        }
    }
}

/// Outbound fetch behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout, seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound of the random pre-fetch jitter, milliseconds.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Proxy pool upkeep and the listing source it harvests from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// How often to refresh the proxy pool, seconds.
    #[serde(default = "default_proxy_refresh_secs")]
    pub refresh_secs: u64,
    /// How long startup may wait for the initial pool, seconds.
    #[serde(default = "default_proxy_preload_secs")]
    pub preload_timeout_secs: u64,
    /// URL of the proxy listing page.
    #[serde(default = "default_proxy_source_url")]
    pub source_url: String,
    /// Selector matching one listing row.
    #[serde(default = "default_proxy_row_selector")]
    pub row_selector: String,
    /// Selector for the "host:port" cell within a row.
    #[serde(default = "default_proxy_addr_selector")]
    pub addr_selector: String,
    /// Selector for the speed cell within a row.
    #[serde(default = "default_proxy_speed_selector")]
    pub speed_selector: String,
    /// Keep only proxies at or below this speed value.
    #[serde(default = "default_proxy_max_speed")]
    pub max_speed: f64,
}

impl ProxyConfig {
    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn preload_timeout(&self) -> Duration {
        Duration::from_secs(self.preload_timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_proxy_refresh_secs(),
            preload_timeout_secs: default_proxy_preload_secs(),
            source_url: default_proxy_source_url(),
            row_selector: default_proxy_row_selector(),
            addr_selector: default_proxy_addr_selector(),
            speed_selector: default_proxy_speed_selector(),
            max_speed: default_proxy_max_speed(),
        }
    }
}

/// Statistics persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// How often to snapshot counters to the store, seconds.
    #[serde(default = "default_stats_persist_secs")]
    pub persist_secs: u64,
}

impl StatsConfig {
    pub fn persist_period(&self) -> Duration {
        Duration::from_secs(self.persist_secs)
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            persist_secs: default_stats_persist_secs(),
        }
    }
}

fn default_shards() -> u32 {
    5
}

fn default_scrape_secs() -> u64 {
    30 * 60
}

fn default_buffer_secs() -> u64 {
    5 * 60
}

fn default_update_secs() -> u64 {
    10 * 60
}

fn default_max_trials() -> u32 {
    3
}

fn default_max_page_links() -> usize {
    50
}

fn default_max_pages() -> usize {
    10
}

fn default_static_concurrency() -> usize {
    10
}

fn default_dynamic_concurrency() -> usize {
    2
}

fn default_proxy_concurrency() -> usize {
    1
}

fn default_page_concurrency() -> usize {
    5
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

fn default_jitter_ms() -> u64 {
    100
}

fn default_proxy_refresh_secs() -> u64 {
    3600
}

fn default_proxy_preload_secs() -> u64 {
    30
}

fn default_proxy_source_url() -> String {
    "https://free-proxy-list.net/".to_string()
}

fn default_proxy_row_selector() -> String {
    "table.table tbody tr".to_string()
}

fn default_proxy_addr_selector() -> String {
    "td:nth-child(1)".to_string()
}

fn default_proxy_speed_selector() -> String {
    "td:nth-child(6)".to_string()
}

fn default_proxy_max_speed() -> f64 {
    0.4
}

fn default_stats_persist_secs() -> u64 {
    3 * 3600
}
