use anyhow::Result;
use async_trait::async_trait;

use super::db::DbHandle;
use super::models::{Run, RunStatus, RunUpdate};

/// Result of an explicit reset request.
#[derive(Debug)]
pub enum ResetOutcome {
    Reset(Box<Run>),
    NotFound,
    /// The run's current status does not allow a reset.
    Refused(RunStatus),
}

/// The read/update contract the pipeline needs from durable storage.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, email: &str, github_url: &str) -> Result<Run>;

    async fn get(&self, id: i64) -> Result<Option<Run>>;

    /// Atomic per call.
    async fn update(&self, id: i64, update: RunUpdate) -> Result<()>;

    async fn reset(&self, id: i64) -> Result<ResetOutcome>;

    async fn list(&self, status: Option<RunStatus>, limit: u32) -> Result<Vec<Run>>;

    /// Move runs stranded mid-pipeline to `ERROR`. Returns their ids.
    async fn recover_interrupted(&self, message: &str) -> Result<Vec<i64>>;
}

#[async_trait]
impl RunStore for DbHandle {
    async fn create(&self, email: &str, github_url: &str) -> Result<Run> {
        let email = email.to_string();
        let github_url = github_url.to_string();
        self.call(move |db| db.create_run(&email, &github_url)).await
    }

    async fn get(&self, id: i64) -> Result<Option<Run>> {
        self.call(move |db| db.get_run(id)).await
    }

    async fn update(&self, id: i64, update: RunUpdate) -> Result<()> {
        self.call(move |db| db.update_run(id, &update)).await
    }

    async fn reset(&self, id: i64) -> Result<ResetOutcome> {
        self.call(move |db| db.reset_run(id)).await
    }

    async fn list(&self, status: Option<RunStatus>, limit: u32) -> Result<Vec<Run>> {
        self.call(move |db| db.list_runs(status, limit)).await
    }

    async fn recover_interrupted(&self, message: &str) -> Result<Vec<i64>> {
        let message = message.to_string();
        self.call(move |db| db.recover_interrupted(&message)).await
    }
}
