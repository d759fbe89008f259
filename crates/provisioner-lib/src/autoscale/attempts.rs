//! In-process attempt counters
//!
//! Counters live only as long as the process; a restart resets every
//! escalation budget.

use super::provider::AttemptStore;
use crate::models::ScaleAttemptState;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    states: DashMap<String, ScaleAttemptState>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn get(&self, run_id: &str) -> ScaleAttemptState {
        self.states
            .get(run_id)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    async fn record_failure(&self, run_id: &str, spot: bool) -> ScaleAttemptState {
        let mut entry = self.states.entry(run_id.to_string()).or_default();
        entry.total_attempts += 1;
        if spot {
            entry.spot_attempts += 1;
        }
        *entry
    }

    async fn clear(&self, run_id: &str) {
        self.states.remove(run_id);
    }

    async fn retain(&self, pending: &HashSet<String>) {
        self.states.retain(|run_id, _| pending.contains(run_id));
    }

    async fn snapshot(&self) -> BTreeMap<String, ScaleAttemptState> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_failure_counts_spot_separately() {
        let store = InMemoryAttemptStore::new();
        assert_eq!(store.get("1").await, ScaleAttemptState::default());

        store.record_failure("1", true).await;
        let state = store.record_failure("1", false).await;
        assert_eq!(state.total_attempts, 2);
        assert_eq!(state.spot_attempts, 1);
        assert_eq!(store.get("1").await, state);
    }

    #[tokio::test]
    async fn test_retain_drops_departed_runs() {
        let store = InMemoryAttemptStore::new();
        store.record_failure("1", true).await;
        store.record_failure("2", true).await;

        store.retain(&HashSet::from(["2".to_string()])).await;
        assert_eq!(store.len(), 1);
        assert!(store.snapshot().await.contains_key("2"));

        store.clear("2").await;
        assert!(store.is_empty());
    }
}
