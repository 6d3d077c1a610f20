//! Persist worker: writes merged page state back to storage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::queue::{Job, JobOutput, JobSpec};
use crate::store::UserStore;

use super::{Worker, WorkerError};

pub struct PersistWorker {
    users: Arc<dyn UserStore>,
}

impl PersistWorker {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Worker for PersistWorker {
    async fn execute(&self, job: &Job) -> Result<JobOutput, WorkerError> {
        let (user_id, pages) = match &job.spec {
            JobSpec::Persist { user_id, pages } => (user_id, pages),
            _ => return Err(WorkerError::UnsupportedJob),
        };

        if pages.is_empty() {
            debug!(user = %user_id, "nothing to persist");
            return Ok(JobOutput::Persisted);
        }

        self.users.update_pages(user_id, pages).await?;
        debug!(user = %user_id, pages = pages.len(), "persisted page updates");
        Ok(JobOutput::Persisted)
    }
}
