//! Discovery: the one agent kind that never calls an LLM. It shells out to
//! the [`ProjectScanner`](crate::collaborators::ProjectScanner) collaborator,
//! resolves `input_paths`/`exclusions` from configuration, and hands the
//! project manifest forward as the Solution Designer's input.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;

use crate::agent::{Agent, AgentEnv, AgentError};
use crate::lineage::LineageContext;
use crate::model::{AgentResult, Context, Messages, Metrics};

pub struct DiscoveryAgent;

impl Agent for DiscoveryAgent {
    fn agent_kind(&self) -> &str {
        "discovery"
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

            let view = env.config.agent_view("discovery", &env.defaults)?;
            let raw = view.raw();

            let input_paths: Vec<String> = raw
                .get_path("input_paths")
                .and_then(|v| v.as_list())
                .map(|list| list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_else(|| vec!["**/*".to_string()]);
            let exclusions: Vec<String> = raw
                .get_path("exclusions")
                .and_then(|v| v.as_list())
                .map(|list| list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();

            let target_paths = context
                .intent
                .target_files
                .clone()
                .filter(|files| !files.is_empty())
                .unwrap_or(input_paths);

            let files = env.scanner.scan(&target_paths, &exclusions).await?;
            let raw_output = crate::collaborators::render_manifest(&files);

            let metrics = Metrics {
                duration_ms: started.elapsed().as_millis() as u64,
                ..Metrics::default()
            };
            let messages = Messages {
                system: String::new(),
                user: target_paths.join(", "),
                assistant: String::new(),
            };

            let mut data = HashMap::new();
            data.insert("files".to_string(), serde_json::to_value(&files).unwrap_or_default());
            data.insert("raw_output".to_string(), serde_json::Value::String(raw_output));

            let result = AgentResult {
                success: true,
                data: data.clone(),
                error: None,
                messages,
                metrics,
            };

            env.lineage
                .emit(
                    lineage_context,
                    self.agent_kind(),
                    started_at,
                    Utc::now(),
                    serde_json::json!({ "target_paths": target_paths, "exclusions": exclusions }),
                    serde_json::to_value(&data).unwrap_or_default(),
                    metrics,
                    None,
                )
                .await;

            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::collaborators::{CollaboratorError, DefaultMergeSkill, FilesystemAssetWriter, ProjectScanner};
    use crate::config::{AgentViewDefaults, ConfigStore, Value};
    use crate::lineage::{LineageContext, LineageEmitter};
    use crate::llm::LlmAdapter;
    use crate::model::Intent;

    struct FixedScanner(BTreeMap<String, String>);

    impl ProjectScanner for FixedScanner {
        fn scan<'a>(
            &'a self,
            _input_paths: &'a [String],
            _exclusions: &'a [String],
        ) -> BoxFuture<'a, Result<BTreeMap<String, String>, CollaboratorError>> {
            let files = self.0.clone();
            Box::pin(async move { Ok(files) })
        }
    }

    #[tokio::test]
    async fn discovery_reports_scanned_files_and_emits_lineage() {
        let mut files = BTreeMap::new();
        files.insert("a.py".to_string(), "print(1)\n".to_string());

        let recorder = Arc::new(crate::lineage::FileLineageRecorder::new(
            tempfile::tempdir().unwrap().keep(),
        ));
        let lineage_context = LineageContext::create_workflow_context("wf-1");
        let env = AgentEnv {
            config: Arc::new(ConfigStore::new(Value::map())),
            llm: Arc::new(LlmAdapter::new()),
            lineage: Arc::new(LineageEmitter::new(recorder, 3)),
            scanner: Arc::new(FixedScanner(files)),
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
        };
        let context = Context::new("wf-1", "/tmp/project", Intent {
            description: "refactor".into(),
            target_files: None,
        });

        let agent = DiscoveryAgent;
        let result = agent.process(&env, &lineage_context, &context).await.unwrap();
        assert!(result.success);
        assert!(result.data.contains_key("raw_output"));
    }
}
