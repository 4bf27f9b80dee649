//! Coder: applies the Solution Designer's [`FileChange`] list to disk via
//! the merge skill and asset writer collaborators, one skill-level lineage
//! event per file sharing this agent's own event as their parent.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;

use crate::agent::{Agent, AgentEnv, AgentError};
use crate::collaborators;
use crate::lineage::LineageContext;
use crate::model::{AgentResult, Context, FileChange, FileChangeOutcome, Messages, Metrics};

pub struct CoderAgent;

impl Agent for CoderAgent {
    fn agent_kind(&self) -> &str {
        "coder"
    }

    fn process<'a>(
        &'a self,
        env: &'a AgentEnv,
        lineage_context: &'a LineageContext,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<AgentResult, AgentError>> {
        Box::pin(async move {
            let started_at = Utc::now();
            let started = Instant::now();

            let changes: Vec<FileChange> = context
                .input_data
                .get("changes")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|err: serde_json::Error| AgentError::Input(err.to_string()))?
                .unwrap_or_default();

            // Allocate this agent's own lineage event id up front so every
            // per-file skill event can parent directly onto it, as siblings,
            // rather than chaining onto one another.
            let coder_event_id = env.lineage.allocate_event_id();

            let mut outcomes = Vec::with_capacity(changes.len());
            for change in &changes {
                let skill_started = Utc::now();
                let original_content = std::fs::read_to_string(
                    std::path::Path::new(&context.project_path).join(&change.file_path),
                )
                .ok();

                let outcome = collaborators::apply_change(
                    env.merge.as_ref(),
                    env.writer.as_ref(),
                    original_content.as_deref(),
                    change,
                )
                .await;

                let file_outcome = match outcome {
                    Ok(backup_path) => FileChangeOutcome {
                        file: change.file_path.clone(),
                        success: true,
                        backup_path,
                        error: None,
                    },
                    Err(err) => FileChangeOutcome {
                        file: change.file_path.clone(),
                        success: false,
                        backup_path: None,
                        error: Some(err.to_string()),
                    },
                };

                env.lineage
                    .emit_child(
                        lineage_context,
                        &coder_event_id,
                        "coder.merge",
                        skill_started,
                        Utc::now(),
                        serde_json::to_value(change).unwrap_or_default(),
                        serde_json::to_value(&file_outcome).unwrap_or_default(),
                        Metrics::default(),
                        file_outcome.error.clone(),
                    )
                    .await;

                outcomes.push(file_outcome);
            }

            let success = outcomes.iter().all(|o| o.success);
            let metrics = Metrics {
                duration_ms: started.elapsed().as_millis() as u64,
                ..Metrics::default()
            };

            let mut data = HashMap::new();
            data.insert("changes".to_string(), serde_json::to_value(&outcomes).unwrap_or_default());

            let error = if success {
                None
            } else {
                Some(format!(
                    "one or more file changes failed to apply ({}/{} failed)",
                    outcomes.iter().filter(|o| !o.success).count(),
                    outcomes.len()
                ))
            };

            let result = AgentResult {
                success,
                data: data.clone(),
                error: error.clone(),
                messages: Messages::default(),
                metrics,
            };

            env.lineage
                .emit_with_id(
                    lineage_context,
                    coder_event_id,
                    self.agent_kind(),
                    started_at,
                    Utc::now(),
                    serde_json::to_value(&changes).unwrap_or_default(),
                    serde_json::to_value(&data).unwrap_or_default(),
                    metrics,
                    error,
                )
                .await;

            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::collaborators::{DefaultMergeSkill, FilesystemAssetWriter, FilesystemScanner};
    use crate::config::{AgentViewDefaults, ConfigStore, Value};
    use crate::lineage::{FileLineageRecorder, LineageContext, LineageEmitter};
    use crate::llm::LlmAdapter;
    use crate::model::{ChangeType, Intent};

    #[tokio::test]
    async fn coder_applies_all_changes_and_reports_success() {
        let project = tempfile::tempdir().unwrap().keep();
        let backups = tempfile::tempdir().unwrap().keep();
        std::fs::write(project.join("a.py"), "old").unwrap();

        let recorder = Arc::new(FileLineageRecorder::new(tempfile::tempdir().unwrap().keep()));
        let lineage_context = LineageContext::create_workflow_context("wf-1");
        let env = AgentEnv {
            config: Arc::new(ConfigStore::new(Value::map())),
            llm: Arc::new(LlmAdapter::new()),
            lineage: Arc::new(LineageEmitter::new(recorder, 3)),
            scanner: Arc::new(FilesystemScanner::new(project.clone())),
            merge: Arc::new(DefaultMergeSkill),
            writer: Arc::new(FilesystemAssetWriter::new(project.clone(), backups)),
            defaults: AgentViewDefaults {
                provider: "anthropic".into(),
                model: "claude".into(),
                system_prompt: String::new(),
                user_prompt_template: String::new(),
                temperature: 0.2,
            },
        };

        let mut context = Context::new("wf-1", project.to_string_lossy().to_string(), Intent {
            description: "refactor".into(),
            target_files: None,
        });
        let change = FileChange {
            file_path: "a.py".into(),
            change_type: ChangeType::Modify,
            description: None,
            content: Some("new".into()),
            diff: None,
        };
        context.input_data.insert(
            "changes".to_string(),
            serde_json::to_value(vec![change]).unwrap(),
        );

        let agent = CoderAgent;
        let result = agent.process(&env, &lineage_context, &context).await.unwrap();
        assert!(result.success);
        assert_eq!(std::fs::read_to_string(project.join("a.py")).unwrap(), "new");

        let changes = result.data.get("changes").unwrap().as_array().unwrap();
        assert_eq!(changes[0]["file"], "a.py");
        assert_eq!(changes[0]["success"], true);
    }

    #[tokio::test]
    async fn coder_succeeds_trivially_with_zero_changes() {
        let project = tempfile::tempdir().unwrap().keep();
        let backups = tempfile::tempdir().unwrap().keep();
        let recorder = Arc::new(FileLineageRecorder::new(tempfile::tempdir().unwrap().keep()));
        let lineage_context = LineageContext::create_workflow_context("wf-1");
        let env = AgentEnv {
            config: Arc::new(ConfigStore::new(Value::map())),
            llm: Arc::new(LlmAdapter::new()),
            lineage: Arc::new(LineageEmitter::new(recorder, 3)),
            scanner: Arc::new(FilesystemScanner::new(project.clone())),
            merge: Arc::new(DefaultMergeSkill),
            writer: Arc::new(FilesystemAssetWriter::new(project.clone(), backups)),
            defaults: AgentViewDefaults {
                provider: "anthropic".into(),
                model: "claude".into(),
                system_prompt: String::new(),
                user_prompt_template: String::new(),
                temperature: 0.2,
            },
        };
        let context = Context::new("wf-1", project.to_string_lossy().to_string(), Intent {
            description: "refactor".into(),
            target_files: None,
        });

        let agent = CoderAgent;
        let result = agent.process(&env, &lineage_context, &context).await.unwrap();
        assert!(result.success);
    }
}
