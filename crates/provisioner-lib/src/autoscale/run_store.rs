//! In-memory run records

use super::provider::RunStore;
use crate::error::{ProvisionError, Result};
use crate::models::{RunRecord, RunStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// Run store for a standalone daemon; runs are registered over the API
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: DashMap<String, RunRecord>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runs(runs: impl IntoIterator<Item = RunRecord>) -> Self {
        let store = Self::new();
        for run in runs {
            store.runs.insert(run.id.clone(), run);
        }
        store
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn load_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.runs.get(run_id).map(|entry| entry.value().clone()))
    }

    async fn mark_failed(&self, run_id: &str, reason: &str) -> Result<()> {
        let mut run = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| ProvisionError::RunNotFound(run_id.to_string()))?;
        run.status = RunStatus::Failed;
        run.failure_reason = Some(reason.to_string());
        debug!(run_id = %run_id, reason = %reason, "Run marked failed");
        Ok(())
    }

    async fn upsert_run(&self, run: RunRecord) -> Result<()> {
        self.runs.insert(run.id.clone(), run);
        Ok(())
    }

    async fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let mut runs: Vec<RunRecord> = self.runs.iter().map(|e| e.value().clone()).collect();
        runs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(runs)
    }
}
