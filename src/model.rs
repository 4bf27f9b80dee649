//! Shared data types that flow between components: work orders, the
//! per-workflow context, agent/team results, and lineage events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Value;

/// A client's request to run a refactoring workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub project_path: String,
    pub intent: Intent,
    #[serde(default)]
    pub system_config: Option<Value>,
    #[serde(default)]
    pub app_config: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub description: String,
    #[serde(default)]
    pub target_files: Option<Vec<String>>,
}

/// One change to a single file, produced by Solution Design and consumed by
/// Coder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub file_path: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub diff: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

impl FileChange {
    /// `create`/`modify` entries must carry either inline content or a diff
    /// to apply; `delete` needs neither.
    pub fn is_well_formed(&self) -> bool {
        match self.change_type {
            ChangeType::Delete => true,
            ChangeType::Create | ChangeType::Modify => {
                self.content.is_some() || self.diff.is_some()
            }
        }
    }
}

/// Outcome of applying one [`FileChange`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeOutcome {
    pub file: String,
    pub success: bool,
    #[serde(default)]
    pub backup_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The one open-ended bag of values threaded through a workflow. Never
/// mutated in place: each stage derives a new context from the prior one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    pub workflow_run_id: String,
    pub project_path: String,
    pub intent: Intent,
    /// Output produced by the previous stage, consumed as input by the next.
    #[serde(default)]
    pub input_data: HashMap<String, serde_json::Value>,
    /// Append-only trail of every agent invocation so far.
    #[serde(default)]
    pub agent_sequence: Vec<AgentSequenceEntry>,
    pub step: u64,
}

impl Default for Intent {
    fn default() -> Self {
        Self {
            description: String::new(),
            target_files: None,
        }
    }
}

impl Context {
    pub fn new(workflow_run_id: impl Into<String>, project_path: impl Into<String>, intent: Intent) -> Self {
        Self {
            workflow_run_id: workflow_run_id.into(),
            project_path: project_path.into(),
            intent,
            input_data: HashMap::new(),
            agent_sequence: Vec::new(),
            step: 1,
        }
    }

    /// Derive the context a next invocation should see: bump the step,
    /// append to the trail, and merge this stage's output into
    /// `input_data` (per-key overlay, so an earlier task's keys in the same
    /// team survive a later task that doesn't touch them).
    pub fn advance(
        &self,
        agent_kind: impl Into<String>,
        execution_id: impl Into<String>,
        output: HashMap<String, serde_json::Value>,
    ) -> Self {
        let mut agent_sequence = self.agent_sequence.clone();
        agent_sequence.push(AgentSequenceEntry {
            agent_kind: agent_kind.into(),
            execution_id: execution_id.into(),
            step: self.step,
        });
        let mut input_data = self.input_data.clone();
        input_data.extend(output);
        Self {
            workflow_run_id: self.workflow_run_id.clone(),
            project_path: self.project_path.clone(),
            intent: self.intent.clone(),
            input_data,
            agent_sequence,
            step: self.step + 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSequenceEntry {
    pub agent_kind: String,
    pub execution_id: String,
    pub step: u64,
}

/// Token/time accounting for one agent invocation, including continuation
/// hops stitched together by the LLM Adapter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub duration_ms: u64,
    pub continuations: u32,
}

impl Metrics {
    pub fn merge_hop(&mut self, other: &Metrics) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
        self.duration_ms += other.duration_ms;
    }
}

/// The three prompts exchanged for one agent invocation (assistant content
/// may be the stitched result of several continuation hops).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Messages {
    pub system: String,
    pub user: String,
    pub assistant: String,
}

/// Result of one agent's `process()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub messages: Messages,
    pub metrics: Metrics,
}

impl AgentResult {
    pub fn failure(error: impl Into<String>, messages: Messages, metrics: Metrics) -> Self {
        Self {
            success: false,
            data: HashMap::new(),
            error: Some(error.into()),
            messages,
            metrics,
        }
    }
}

/// Aggregate outcome of one team's task list plus its routing decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamResult {
    pub success: bool,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub next_team: Option<String>,
    pub tasks: Vec<AgentResult>,
}

/// Final status of a workflow, recorded by the Workflow Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub storage_path: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_path: Vec<String>,
    #[serde(default)]
    pub team_results: HashMap<String, TeamResult>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// One durable record of an agent invocation, linked into a forest rooted at
/// the workflow's root event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEvent {
    pub event_id: String,
    pub workflow_run_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub agent_kind: String,
    pub step: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub input_snapshot: serde_json::Value,
    pub output_snapshot: serde_json::Value,
    pub metrics: Metrics,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_merges_output_into_input_data_rather_than_replacing_it() {
        let context = Context::new("wf-1", "/tmp/project", Intent {
            description: "refactor".into(),
            target_files: None,
        });
        let mut first_output = HashMap::new();
        first_output.insert("files".to_string(), serde_json::json!({"a.py": "old"}));
        let context = context.advance("discovery", "exec-1", first_output);

        let mut second_output = HashMap::new();
        second_output.insert("changes".to_string(), serde_json::json!([]));
        let context = context.advance("solution_designer", "exec-2", second_output);

        assert!(context.input_data.contains_key("files"));
        assert!(context.input_data.contains_key("changes"));
    }
}
