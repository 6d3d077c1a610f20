//! Collaborator storage boundaries.
//!
//! The document store for users, templates, and stats snapshots lives
//! outside this crate; the core only depends on these traits. The
//! in-memory implementation backs tests and the demo binary.

mod memory;

pub use memory::MemoryStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{Template, User, UserPage};
use crate::stats::StatsSnapshot;

/// Errors surfaced by storage collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// User documents, partitioned by shard.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// All users assigned to a shard.
    async fn find_by_shard(&self, shard: u32) -> Result<Vec<User>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Atomically replace the given page slots of one user's document.
    async fn update_pages(
        &self,
        user_id: &str,
        pages: &[(usize, UserPage)],
    ) -> Result<(), StoreError>;
}

/// Read-only template lookup.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Arc<Template>>, StoreError>;
}

/// Stats snapshot persistence.
#[async_trait]
pub trait StatsStore: Send + Sync {
    async fn save_snapshot(&self, snapshot: &StatsSnapshot) -> Result<(), StoreError>;

    async fn load_latest(&self) -> Result<Option<StatsSnapshot>, StoreError>;
}

/// Caching wrapper for template lookups.
///
/// Templates are read on every scrape job, so hits are served from
/// memory after the first fetch. Templates are read-only to the core;
/// there is no invalidation.
pub struct CachedTemplates {
    store: Arc<dyn TemplateStore>,
    cache: Mutex<HashMap<String, Arc<Template>>>,
}

impl CachedTemplates {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Arc<Template>>, StoreError> {
        if let Some(hit) = self.cache.lock().await.get(id) {
            return Ok(Some(hit.clone()));
        }

        let template = self.store.find_by_id(id).await?;
        if let Some(ref t) = template {
            self.cache
                .lock()
                .await
                .insert(id.to_string(), t.clone());
        }
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        lookups: AtomicUsize,
        template: Arc<Template>,
    }

    #[async_trait]
    impl TemplateStore for CountingStore {
        async fn find_by_id(&self, id: &str) -> Result<Option<Arc<Template>>, StoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if id == self.template.id {
                Ok(Some(self.template.clone()))
            } else {
                Ok(None)
            }
        }
    }

    fn template() -> Arc<Template> {
        Arc::new(Template {
            id: "t1".into(),
            name: "news".into(),
            dynamic: false,
            update_interval: 4,
            sample_urls: vec![],
            url_pattern: ".*".into(),
            selectors: Default::default(),
        })
    }

    #[tokio::test]
    async fn test_cached_templates_hit_once() {
        let store = Arc::new(CountingStore {
            lookups: AtomicUsize::new(0),
            template: template(),
        });
        let cached = CachedTemplates::new(store.clone());

        for _ in 0..3 {
            assert!(cached.find_by_id("t1").await.unwrap().is_some());
        }
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_templates_miss_not_cached() {
        let store = Arc::new(CountingStore {
            lookups: AtomicUsize::new(0),
            template: template(),
        });
        let cached = CachedTemplates::new(store.clone());

        assert!(cached.find_by_id("nope").await.unwrap().is_none());
        assert!(cached.find_by_id("nope").await.unwrap().is_none());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }
}
