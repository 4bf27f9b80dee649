//! Append-only record of every agent invocation in a workflow, linked
//! parent-to-child into a forest rooted at the workflow's root event.
//!
//! The file backend is mandatory; a remote (HTTP) backend is available
//! behind the same trait and is opt-in via configuration (Open Question
//! decision, SPEC_FULL.md §9). Recording never aborts a workflow: failures
//! are retried a bounded number of times, then logged and dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value as Json;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{LineageEvent, Metrics};
use crate::persistence::{self, PersistenceError};

#[derive(Debug, Error)]
pub enum LineageError {
    #[error("persistence error recording lineage event: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("failed to serialize lineage event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("remote lineage sink returned an error status: {0}")]
    RemoteStatus(u16),
    #[error("remote lineage sink request failed: {0}")]
    RemoteRequest(#[from] reqwest::Error),
}

/// A place lineage events are durably recorded.
pub trait LineageRecorder: Send + Sync {
    fn record(&self, event: LineageEvent) -> BoxFuture<'_, Result<(), LineageError>>;

    fn workflow_events(
        &self,
        workflow_run_id: &str,
    ) -> BoxFuture<'_, Result<Vec<LineageEvent>, LineageError>>;
}

/// Establishes the root of one workflow's lineage forest and hands out
/// monotonically increasing steps and parent links as agents run.
pub struct LineageContext {
    workflow_run_id: String,
    root_event_id: String,
    last_event_id: DashMap<(), String>,
    next_step: std::sync::atomic::AtomicU64,
}

impl LineageContext {
    pub fn create_workflow_context(workflow_run_id: impl Into<String>) -> Arc<Self> {
        let workflow_run_id = workflow_run_id.into();
        let root_event_id = format!("root_{workflow_run_id}");
        let last_event_id = DashMap::new();
        last_event_id.insert((), root_event_id.clone());
        Arc::new(Self {
            workflow_run_id,
            root_event_id,
            last_event_id,
            next_step: std::sync::atomic::AtomicU64::new(1),
        })
    }

    pub fn workflow_run_id(&self) -> &str {
        &self.workflow_run_id
    }

    pub fn root_event_id(&self) -> &str {
        &self.root_event_id
    }

    /// Allocate the next step and parent (the last event emitted in this
    /// workflow, or the workflow root if none yet) for a new invocation.
    pub fn next_step(&self) -> (u64, String) {
        let step = self
            .next_step
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let parent = self
            .last_event_id
            .get(&())
            .map(|entry| entry.clone())
            .unwrap_or_else(|| self.root_event_id.clone());
        (step, parent)
    }

    /// Record that `event_id` is now the most recent event, so the next
    /// invocation parents onto it.
    pub fn advance(&self, event_id: String) {
        self.last_event_id.insert((), event_id);
    }
}

/// Builds one [`LineageEvent`] and records it, retrying a bounded number of
/// times on failure without ever propagating the failure to the workflow.
pub struct LineageEmitter {
    recorder: Arc<dyn LineageRecorder>,
    max_retries: u32,
}

impl LineageEmitter {
    pub fn new(recorder: Arc<dyn LineageRecorder>, max_retries: u32) -> Self {
        Self {
            recorder,
            max_retries,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn emit(
        &self,
        context: &LineageContext,
        agent_kind: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        finished_at: chrono::DateTime<chrono::Utc>,
        input_snapshot: Json,
        output_snapshot: Json,
        metrics: Metrics,
        error: Option<String>,
    ) -> String {
        let (step, parent_id) = context.next_step();
        let event_id = Uuid::new_v4().to_string();
        self.record(
            context,
            event_id.clone(),
            step,
            parent_id,
            agent_kind,
            started_at,
            finished_at,
            input_snapshot,
            output_snapshot,
            metrics,
            error,
        )
        .await;
        context.advance(event_id.clone());
        event_id
    }

    /// Pre-allocates an event id an agent can hand to children as their
    /// `parent_id` before the agent's own event has been recorded — needed
    /// when a fan-out of skill-level events must all parent onto one
    /// not-yet-recorded top-level event.
    pub fn allocate_event_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    /// Like [`Self::emit`], but uses a caller-supplied `event_id` (from
    /// [`Self::allocate_event_id`]) instead of generating one, so children
    /// emitted via [`Self::emit_child`] can reference it as their parent
    /// before it has been recorded. Parent is still derived automatically
    /// from the context, and the context still advances onto `event_id`.
    #[allow(clippy::too_many_arguments)]
    pub async fn emit_with_id(
        &self,
        context: &LineageContext,
        event_id: String,
        agent_kind: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        finished_at: chrono::DateTime<chrono::Utc>,
        input_snapshot: Json,
        output_snapshot: Json,
        metrics: Metrics,
        error: Option<String>,
    ) -> String {
        let (step, parent_id) = context.next_step();
        self.record(
            context,
            event_id.clone(),
            step,
            parent_id,
            agent_kind,
            started_at,
            finished_at,
            input_snapshot,
            output_snapshot,
            metrics,
            error,
        )
        .await;
        context.advance(event_id.clone());
        event_id
    }

    /// Like [`Self::emit`], but parents explicitly onto `parent_id` instead
    /// of the last-emitted sibling, and does not become the new "last
    /// event" — used for skill-level events (e.g. Coder's per-file Merge
    /// calls) that should all hang off the same parent rather than chain
    /// onto each other.
    #[allow(clippy::too_many_arguments)]
    pub async fn emit_child(
        &self,
        context: &LineageContext,
        parent_id: &str,
        agent_kind: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        finished_at: chrono::DateTime<chrono::Utc>,
        input_snapshot: Json,
        output_snapshot: Json,
        metrics: Metrics,
        error: Option<String>,
    ) -> String {
        let (step, _) = context.next_step();
        let event_id = Uuid::new_v4().to_string();
        self.record(
            context,
            event_id.clone(),
            step,
            parent_id.to_string(),
            agent_kind,
            started_at,
            finished_at,
            input_snapshot,
            output_snapshot,
            metrics,
            error,
        )
        .await;
        event_id
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        context: &LineageContext,
        event_id: String,
        step: u64,
        parent_id: String,
        agent_kind: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        finished_at: chrono::DateTime<chrono::Utc>,
        input_snapshot: Json,
        output_snapshot: Json,
        metrics: Metrics,
        error: Option<String>,
    ) -> String {
        let event = LineageEvent {
            event_id: event_id.clone(),
            workflow_run_id: context.workflow_run_id().to_string(),
            parent_id: Some(parent_id),
            agent_kind: agent_kind.to_string(),
            step,
            started_at,
            finished_at,
            input_snapshot,
            output_snapshot,
            metrics,
            error,
        };

        let mut attempt = 0;
        loop {
            match self.recorder.record(event.clone()).await {
                Ok(()) => break,
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        workflow_run_id = %context.workflow_run_id(),
                        step,
                        attempt,
                        error = %err,
                        "lineage record attempt failed, retrying"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        workflow_run_id = %context.workflow_run_id(),
                        step,
                        error = %err,
                        "dropping lineage event after exhausting retry budget"
                    );
                    break;
                }
            }
        }
        event_id
    }
}

/// Writes one JSON document per event under
/// `<root>/<workflow_run_id>/events/<step>_<agent_kind>.json`.
pub struct FileLineageRecorder {
    root: PathBuf,
}

impl FileLineageRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn workflow_dir(&self, workflow_run_id: &str) -> PathBuf {
        self.root.join(workflow_run_id).join("events")
    }
}

impl LineageRecorder for FileLineageRecorder {
    fn record(&self, event: LineageEvent) -> BoxFuture<'_, Result<(), LineageError>> {
        Box::pin(async move {
            let path = self
                .workflow_dir(&event.workflow_run_id)
                .join(format!("{}_{}.json", event.step, event.agent_kind));
            let bytes = serde_json::to_vec_pretty(&event)?;
            persistence::save_to_file(&bytes, path).await?;
            Ok(())
        })
    }

    fn workflow_events(
        &self,
        workflow_run_id: &str,
    ) -> BoxFuture<'_, Result<Vec<LineageEvent>, LineageError>> {
        let dir = self.workflow_dir(workflow_run_id);
        Box::pin(async move {
            let mut events = Vec::new();
            let Ok(read_dir) = std::fs::read_dir(&dir) else {
                return Ok(events);
            };
            for entry in read_dir.flatten() {
                let bytes = persistence::load_from_file(entry.path()).await?;
                let event: LineageEvent = serde_json::from_slice(&bytes)?;
                events.push(event);
            }
            events.sort_by_key(|e| e.step);
            Ok(events)
        })
    }
}

/// POSTs events to a configured HTTP endpoint. Opt-in; the file backend
/// remains the durable source of truth regardless.
pub struct RemoteLineageRecorder {
    client: reqwest::Client,
    endpoint: String,
    fallback: Arc<dyn LineageRecorder>,
}

impl RemoteLineageRecorder {
    pub fn new(endpoint: impl Into<String>, fallback: Arc<dyn LineageRecorder>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            fallback,
        }
    }
}

impl LineageRecorder for RemoteLineageRecorder {
    fn record(&self, event: LineageEvent) -> BoxFuture<'_, Result<(), LineageError>> {
        Box::pin(async move {
            let response = self.client.post(&self.endpoint).json(&event).send().await?;
            if !response.status().is_success() {
                return Err(LineageError::RemoteStatus(response.status().as_u16()));
            }
            self.fallback.record(event).await
        })
    }

    fn workflow_events(
        &self,
        workflow_run_id: &str,
    ) -> BoxFuture<'_, Result<Vec<LineageEvent>, LineageError>> {
        self.fallback.workflow_events(workflow_run_id)
    }
}

/// Flattens a [`LineageEvent`]'s relevant fields into a JSON snapshot, used
/// both for the event body and for quick context summaries in tests.
pub fn snapshot(data: &HashMap<String, serde_json::Value>) -> Json {
    serde_json::to_value(data).unwrap_or(Json::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_recorder_round_trips_events_in_step_order() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileLineageRecorder::new(dir.path());
        let now = chrono::Utc::now();
        for (step, kind) in [(2u64, "solution"), (1u64, "discovery")] {
            let event = LineageEvent {
                event_id: format!("e{step}"),
                workflow_run_id: "wf_1".to_string(),
                parent_id: None,
                agent_kind: kind.to_string(),
                step,
                started_at: now,
                finished_at: now,
                input_snapshot: Json::Null,
                output_snapshot: Json::Null,
                metrics: Metrics::default(),
                error: None,
            };
            recorder.record(event).await.unwrap();
        }
        let events = recorder.workflow_events("wf_1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].step, 1);
        assert_eq!(events[1].step, 2);
    }

    #[tokio::test]
    async fn workflow_events_empty_for_unknown_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = FileLineageRecorder::new(dir.path());
        let events = recorder.workflow_events("nonexistent").await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn emitter_assigns_monotonic_steps_and_parent_chain() {
        let dir = tempfile::tempdir().unwrap();
        let recorder: Arc<dyn LineageRecorder> = Arc::new(FileLineageRecorder::new(dir.path()));
        let emitter = LineageEmitter::new(recorder.clone(), 0);
        let ctx = LineageContext::create_workflow_context("wf_2");
        let now = chrono::Utc::now();
        let first = emitter
            .emit(&ctx, "discovery", now, now, Json::Null, Json::Null, Metrics::default(), None)
            .await;
        let _second = emitter
            .emit(&ctx, "solution", now, now, Json::Null, Json::Null, Metrics::default(), None)
            .await;
        let events = recorder.workflow_events("wf_2").await.unwrap();
        assert_eq!(events[0].event_id, first);
        assert_eq!(events[1].parent_id.as_deref(), Some(first.as_str()));
        assert!(events[1].step > events[0].step);
    }

    struct FailingRecorder {
        calls: std::sync::atomic::AtomicU32,
    }

    impl LineageRecorder for FailingRecorder {
        fn record(&self, _event: LineageEvent) -> BoxFuture<'_, Result<(), LineageError>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async { Err(LineageError::RemoteStatus(500)) })
        }

        fn workflow_events(
            &self,
            _workflow_run_id: &str,
        ) -> BoxFuture<'_, Result<Vec<LineageEvent>, LineageError>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[tokio::test]
    async fn emitter_never_panics_when_recording_exhausts_retries() {
        let recorder: Arc<dyn LineageRecorder> = Arc::new(FailingRecorder {
            calls: std::sync::atomic::AtomicU32::new(0),
        });
        let emitter = LineageEmitter::new(recorder, 2);
        let ctx = LineageContext::create_workflow_context("wf_3");
        let now = chrono::Utc::now();
        // Must return normally (not panic/abort) even though every attempt fails.
        let _event_id = emitter
            .emit(&ctx, "discovery", now, now, Json::Null, Json::Null, Metrics::default(), None)
            .await;
    }
}
