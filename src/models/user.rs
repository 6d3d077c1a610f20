//! User documents and the pages they watch.
//!
//! A user owns up to `max_pages` watched pages. Each page keeps a
//! newest-first list of links found by past scrapes, capped at the
//! configured limit; the first link's id is the cursor that bounds
//! the next extraction.

use serde::{Deserialize, Serialize};

/// How long after the last login a user still counts as active.
const ACTIVE_WINDOW_MS: i64 = 7 * 86_400 * 1000;

/// Current time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Assign a shard for a new user, 1-based and uniform over `1..=shards`.
pub fn assign_shard(shards: u32) -> u32 {
    fastrand::u32(0..shards.max(1)) + 1
}

/// A link extracted from a watched page.
///
/// Immutable once created. Uniqueness is defined by `id` as produced
/// by the template's `id` rule, scoped to one page's link list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// When the link was scraped (epoch ms), not any source-provided date.
    pub date: i64,
}

/// Per-page result filters, applied during extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    /// Only keep links whose title contains this text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.contains.is_none()
    }
}

/// A page watched by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPage {
    pub id: String,
    pub title: String,
    /// Reference to the template describing how to scrape this page.
    pub template_id: String,
    pub page_url: String,
    /// Links found but not yet viewed by the user.
    #[serde(default)]
    pub notifications: u32,
    /// When the page was last scraped (epoch ms).
    #[serde(default)]
    pub last_update: i64,
    /// Previously seen links, newest first, capped at `max_page_links`.
    #[serde(default)]
    pub links: Vec<Link>,
    /// Muted pages are skipped by the cycle.
    #[serde(default)]
    pub muted: bool,
    #[serde(default, skip_serializing_if = "Filters::is_empty")]
    pub filters: Filters,
    /// Set when a scrape added links this cycle; never persisted.
    #[serde(skip)]
    pub updated: bool,
}

impl UserPage {
    /// Id of the most recent already-known link, bounding extraction.
    pub fn cursor(&self) -> Option<String> {
        self.links.first().map(|l| l.id.clone())
    }

    /// Whether the cycle may scrape this page: not muted, and the
    /// template's update interval has elapsed since the last scrape.
    pub fn can_update(&self, update_interval_hours: u32, now: i64) -> bool {
        if self.muted {
            return false;
        }
        now - self.last_update >= i64::from(update_interval_hours) * 3_600_000
    }
}

/// A registered user with watched pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    /// Shard this user belongs to; assigned once at creation.
    pub shard: u32,
    /// Last login time (epoch ms).
    #[serde(default)]
    pub last_login: i64,
    #[serde(default)]
    pub pages: Vec<UserPage>,
    /// Template poll votes; opaque to the core.
    #[serde(default)]
    pub votes: serde_json::Value,
}

impl User {
    /// Users who have not logged in for 7 days are skipped by the cycle.
    pub fn is_active(&self, now: i64) -> bool {
        now - self.last_login < ACTIVE_WINDOW_MS
    }
}
