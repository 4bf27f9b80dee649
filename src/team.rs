//! Team (C5): runs an ordered list of tasks through the Agent Runtime,
//! retrying failed tasks, then evaluates routing rules to pick the next
//! team.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::agent::{AgentEnv, AgentError};
use crate::agents::AgentRegistry;
use crate::config::Value;
use crate::lineage::LineageContext;
use crate::model::{AgentResult, Context, Messages, Metrics, TeamResult};
use crate::routing;

#[derive(Debug, Error)]
pub enum TeamError {
    #[error("task '{task_name}' references unregistered agent kind '{agent_kind}'")]
    UnknownAgent { task_name: String, agent_kind: String },
}

#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_name: String,
    pub agent_kind: String,
    pub requires_approval: bool,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub config_overlay: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub condition: String,
    pub next_team: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Routing {
    pub rules: Vec<RoutingRule>,
    pub default: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TeamDefinition {
    pub team_id: String,
    pub display_name: String,
    pub tasks: Vec<TaskSpec>,
    pub routing: Routing,
}

/// Runs one [`TeamDefinition`]'s tasks in order and decides the next team.
/// Approval gates default to auto-approve (no human-in-the-loop surface in
/// this core, per SPEC_FULL.md's non-goals).
pub struct Team<'a> {
    definition: &'a TeamDefinition,
    registry: &'a AgentRegistry,
}

impl<'a> Team<'a> {
    pub fn new(definition: &'a TeamDefinition, registry: &'a AgentRegistry) -> Self {
        Self { definition, registry }
    }

    pub async fn execute(
        &self,
        env: &AgentEnv,
        lineage_context: &LineageContext,
        mut context: Context,
    ) -> Result<(Context, TeamResult), TeamError> {
        let mut task_results = Vec::with_capacity(self.definition.tasks.len());
        let mut last_data = context.input_data.clone();

        for task in &self.definition.tasks {
            let agent = self.registry.get(&task.agent_kind).ok_or_else(|| TeamError::UnknownAgent {
                task_name: task.task_name.clone(),
                agent_kind: task.agent_kind.clone(),
            })?;

            let task_env = AgentEnv {
                config: std::sync::Arc::new(env.config.with_task_overlay(task.config_overlay.as_ref())),
                llm: env.llm.clone(),
                lineage: env.lineage.clone(),
                scanner: env.scanner.clone(),
                merge: env.merge.clone(),
                writer: env.writer.clone(),
                defaults: env.defaults.clone(),
            };

            let mut attempt = 0;
            let result = loop {
                let outcome = agent.process(&task_env, lineage_context, &context).await;
                let result = match outcome {
                    Ok(result) => result,
                    Err(err) => agent_error_to_result(&err),
                };
                if result.success || attempt >= task.max_retries {
                    break result;
                }
                attempt += 1;
                tracing::warn!(
                    task = %task.task_name,
                    agent_kind = %task.agent_kind,
                    attempt,
                    "task failed, retrying after configured delay"
                );
                if task.retry_delay_seconds > 0 {
                    tokio::time::sleep(Duration::from_secs(task.retry_delay_seconds)).await;
                }
            };

            last_data = result.data.clone();
            context = context.advance(task.agent_kind.clone(), Uuid::new_v4().to_string(), result.data.clone());
            task_results.push(result);
        }

        let all_success = task_results.iter().all(|r| r.success);
        let any_failure = task_results.iter().any(|r| !r.success);

        let routing_context = serde_json::json!({
            "all_success": all_success,
            "any_failure": any_failure,
            "data": last_data,
        });

        let next_team = self
            .definition
            .routing
            .rules
            .iter()
            .find(|rule| routing::evaluate(&rule.condition, &routing_context))
            .map(|rule| rule.next_team.clone())
            .unwrap_or_else(|| self.definition.routing.default.clone());

        tracing::debug!(
            team = %self.definition.team_id,
            all_success,
            next_team = ?next_team,
            "routing decision"
        );

        Ok((
            context,
            TeamResult {
                success: all_success,
                data: last_data,
                next_team,
                tasks: task_results,
            },
        ))
    }
}

fn agent_error_to_result(err: &AgentError) -> AgentResult {
    AgentResult::failure(err.to_string(), Messages::default(), Metrics::default())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::agent::Agent;
    use crate::collaborators::{CollaboratorError, DefaultMergeSkill, FilesystemAssetWriter, ProjectScanner};
    use crate::config::{AgentViewDefaults, ConfigStore};
    use crate::lineage::{FileLineageRecorder, LineageContext, LineageEmitter};
    use crate::llm::LlmAdapter;
    use crate::model::Intent;
    use futures::future::BoxFuture;

    struct EmptyScanner;
    impl ProjectScanner for EmptyScanner {
        fn scan<'a>(
            &'a self,
            _input_paths: &'a [String],
            _exclusions: &'a [String],
        ) -> BoxFuture<'a, Result<BTreeMap<String, String>, CollaboratorError>> {
            Box::pin(async { Ok(BTreeMap::new()) })
        }
    }

    fn test_env() -> AgentEnv {
        let recorder = Arc::new(FileLineageRecorder::new(tempfile::tempdir().unwrap().keep()));
        AgentEnv {
            config: Arc::new(ConfigStore::new(Value::map())),
            llm: Arc::new(LlmAdapter::new()),
            lineage: Arc::new(LineageEmitter::new(recorder, 1)),
            scanner: Arc::new(EmptyScanner),
            merge: Arc::new(DefaultMergeSkill),
            writer: Arc::new(FilesystemAssetWriter::new(
                tempfile::tempdir().unwrap().keep(),
                tempfile::tempdir().unwrap().keep(),
            )),
            defaults: AgentViewDefaults {
                provider: "anthropic".into(),
                model: "claude".into(),
                system_prompt: String::new(),
                user_prompt_template: String::new(),
                temperature: 0.2,
            },
        }
    }

    #[tokio::test]
    async fn unknown_agent_kind_is_a_team_error() {
        let registry = AgentRegistry::empty();
        let definition = TeamDefinition {
            team_id: "t1".into(),
            display_name: "Team 1".into(),
            tasks: vec![TaskSpec {
                task_name: "discover".into(),
                agent_kind: "not_registered".into(),
                requires_approval: false,
                max_retries: 0,
                retry_delay_seconds: 0,
                config_overlay: None,
            }],
            routing: Routing::default(),
        };
        let team = Team::new(&definition, &registry);
        let env = test_env();
        let lineage_context = LineageContext::create_workflow_context("wf-1");
        let context = Context::new("wf-1", "/tmp/project", Intent {
            description: "refactor".into(),
            target_files: None,
        });
        let err = team.execute(&env, &lineage_context, context).await.unwrap_err();
        assert!(matches!(err, TeamError::UnknownAgent { .. }));
    }

    #[tokio::test]
    async fn discovery_only_team_routes_via_all_success_rule() {
        let registry = AgentRegistry::with_defaults();
        let definition = TeamDefinition {
            team_id: "discovery".into(),
            display_name: "Discovery".into(),
            tasks: vec![TaskSpec {
                task_name: "scan".into(),
                agent_kind: "discovery".into(),
                requires_approval: false,
                max_retries: 0,
                retry_delay_seconds: 0,
                config_overlay: None,
            }],
            routing: Routing {
                rules: vec![RoutingRule {
                    condition: "all_success".into(),
                    next_team: Some("solution".into()),
                }],
                default: None,
            },
        };
        let team = Team::new(&definition, &registry);
        let env = test_env();
        let lineage_context = LineageContext::create_workflow_context("wf-1");
        let context = Context::new("wf-1", "/tmp/project", Intent {
            description: "refactor".into(),
            target_files: None,
        });
        let (_context, result) = team.execute(&env, &lineage_context, context).await.unwrap();
        assert!(result.success);
        assert_eq!(result.next_team.as_deref(), Some("solution"));
    }
}
