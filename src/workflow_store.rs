//! Workflow Store (C7): a concurrent `workflow_id -> WorkflowRecord` map,
//! mutated only by the owning Orchestrator, with a durable mirror written
//! alongside each workflow's lineage events.
//!
//! Grounded on `M4n5ter-rigs/src/conversation.rs`'s
//! `AgentShortMemory(DashMap<String, Conversation>)`: the same rationale
//! (many readers, sharded writers, no single global lock, one entry per
//! logical run) applies to workflow records in place of conversations.

use std::path::PathBuf;

use dashmap::DashMap;
use thiserror::Error;

use crate::model::{WorkflowRecord, WorkflowStatus};
use crate::persistence::{self, PersistenceError};

#[derive(Debug, Error)]
pub enum WorkflowStoreError {
    #[error("unknown workflow id '{0}'")]
    NotFound(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("failed to serialize workflow record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Holds every workflow this process has seen, keyed by `workflow_id`. The
/// in-memory map is authoritative for reads; `result.json` under each
/// workflow's storage path is the durable mirror, written on every status
/// change so a restarted process can reconstruct it.
pub struct WorkflowStore {
    records: DashMap<String, WorkflowRecord>,
}

impl Default for WorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Insert a freshly created (`pending`) record.
    pub async fn put(&self, record: WorkflowRecord) -> Result<(), WorkflowStoreError> {
        self.mirror(&record).await?;
        self.records.insert(record.workflow_id.clone(), record);
        Ok(())
    }

    pub fn get(&self, workflow_id: &str) -> Option<WorkflowRecord> {
        self.records.get(workflow_id).map(|entry| entry.clone())
    }

    /// Replace the stored record's terminal state, mirroring it to disk
    /// before the in-memory entry is updated so readers never observe a
    /// status with no corresponding durable record.
    pub async fn set_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
        execution_path: Vec<String>,
        team_results: std::collections::HashMap<String, crate::model::TeamResult>,
        finished_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), WorkflowStoreError> {
        let mut record = self
            .records
            .get(workflow_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| WorkflowStoreError::NotFound(workflow_id.to_string()))?;
        record.status = status;
        record.error = error;
        record.execution_path = execution_path;
        record.team_results = team_results;
        record.finished_at = Some(finished_at);
        self.mirror(&record).await?;
        self.records.insert(workflow_id.to_string(), record);
        Ok(())
    }

    async fn mirror(&self, record: &WorkflowRecord) -> Result<(), WorkflowStoreError> {
        let path = PathBuf::from(&record.storage_path).join("result.json");
        let bytes = serde_json::to_vec_pretty(record)?;
        persistence::save_to_file(&bytes, path).await?;
        Ok(())
    }
}
