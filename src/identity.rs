//! Egress identity rotation: proxies and user agents.
//!
//! One rotator is shared by every fetch worker. Workers read one
//! identity per outbound request; the scheduler shuffles the pool at
//! the start of each cycle and the proxy-harvest worker feeds in
//! fresh entries. All mutation goes through the internal mutex since
//! workers run on separate tasks.

use std::sync::Mutex;

use tracing::{info, warn};

/// Proxies kept in the pool at most.
const MAX_PROXIES: usize = 100;

/// The pool is viable once it holds more than this many proxies.
const MIN_PROXIES: usize = 5;

/// Real browser user agents, rotated per request.
const USER_AGENTS: &[&str] = &[
    // Chrome on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    // Chrome on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    // Firefox on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0",
    // Firefox on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:132.0) Gecko/20100101 Firefox/132.0",
    // Safari on Mac
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    // Edge on Windows
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36 Edg/130.0.0.0",
];

struct Pool {
    proxies: Vec<String>,
    cursor: usize,
}

/// Rotates outbound proxies (round-robin) and user agents (random).
pub struct IdentityRotator {
    pool: Mutex<Pool>,
}

impl IdentityRotator {
    /// Create a rotator seeded with an initial proxy list.
    pub fn new(seed: Vec<String>) -> Self {
        Self {
            pool: Mutex::new(Pool {
                proxies: seed,
                cursor: 0,
            }),
        }
    }

    /// Next proxy URL by round-robin, or None while the pool is empty.
    pub fn proxy(&self) -> Option<String> {
        let mut pool = self.pool.lock().unwrap();
        if pool.proxies.is_empty() {
            return None;
        }
        pool.cursor = (pool.cursor + 1) % pool.proxies.len();
        Some(format!("http://{}", pool.proxies[pool.cursor]))
    }

    /// A random user agent string.
    pub fn user_agent(&self) -> &'static str {
        USER_AGENTS[fastrand::usize(0..USER_AGENTS.len())]
    }

    /// Whether the pool is large enough to scrape with.
    pub fn has_proxies(&self) -> bool {
        self.pool.lock().unwrap().proxies.len() > MIN_PROXIES
    }

    /// Number of proxies currently pooled.
    pub fn proxy_count(&self) -> usize {
        self.pool.lock().unwrap().proxies.len()
    }

    /// Shuffle the pool and reset the rotation pointer. Called once
    /// per cycle so shards don't hit targets in a fixed proxy order.
    pub fn shuffle(&self) {
        let mut pool = self.pool.lock().unwrap();
        fastrand::shuffle(&mut pool.proxies);
        pool.cursor = 0;
    }

    /// Merge freshly harvested proxies, newest first, capped at
    /// `MAX_PROXIES`. An empty harvest only logs.
    pub fn update_proxies(&self, fresh: Vec<String>) {
        if fresh.is_empty() {
            warn!("update_proxies: no proxies found");
            return;
        }

        info!("update_proxies: found {} new proxies", fresh.len());
        let mut pool = self.pool.lock().unwrap();
        let old = std::mem::take(&mut pool.proxies);
        pool.proxies = fresh;
        pool.proxies.extend(old);
        pool.proxies.truncate(MAX_PROXIES);
        pool.cursor = 0;
    }
}

impl Default for IdentityRotator {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
