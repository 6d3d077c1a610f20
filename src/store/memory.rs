//! In-memory document store.
//!
//! Backs the test suite and the demo binary. Mutations take a single
//! lock so page updates are atomic per call, matching the multi-field
//! update contract of a real document store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::{Template, User, UserPage};
use crate::stats::StatsSnapshot;

use super::{StatsStore, StoreError, TemplateStore, UserStore};

#[derive(Default)]
struct MemoryInner {
    users: HashMap<String, User>,
    templates: HashMap<String, Arc<Template>>,
    snapshots: Vec<StatsSnapshot>,
}

/// Shared in-memory store implementing every collaborator trait.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.inner.lock().await.users.insert(user.id.clone(), user);
    }

    pub async fn insert_template(&self, template: Template) {
        let mut inner = self.inner.lock().await;
        inner
            .templates
            .insert(template.id.clone(), Arc::new(template));
    }

    /// Direct read of one user, for assertions in tests.
    pub async fn user(&self, id: &str) -> Option<User> {
        self.inner.lock().await.users.get(id).cloned()
    }

    pub async fn snapshot_count(&self) -> usize {
        self.inner.lock().await.snapshots.len()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_shard(&self, shard: u32) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .values()
            .filter(|u| u.shard == shard)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.lock().await.users.get(id).cloned())
    }

    async fn update_pages(
        &self,
        user_id: &str,
        pages: &[(usize, UserPage)],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::UserNotFound(user_id.to_string()))?;
        for (index, page) in pages {
            match user.pages.get_mut(*index) {
                Some(slot) => *slot = page.clone(),
                None => {
                    return Err(StoreError::Backend(format!(
                        "page index {} out of range for user {}",
                        index, user_id
                    )))
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Arc<Template>>, StoreError> {
        Ok(self.inner.lock().await.templates.get(id).cloned())
    }
}

#[async_trait]
impl StatsStore for MemoryStore {
    async fn save_snapshot(&self, snapshot: &StatsSnapshot) -> Result<(), StoreError> {
        self.inner.lock().await.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<StatsSnapshot>, StoreError> {
        Ok(self.inner.lock().await.snapshots.last().cloned())
    }
}
