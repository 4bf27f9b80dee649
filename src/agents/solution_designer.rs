//! Solution Designer: renders the project manifest into a prompt, asks the
//! LLM for a list of file changes, and parses the response into
//! [`FileChange`] entries the Coder applies.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use futures::future::BoxFuture;

use crate::agent::{extract_json, Agent, AgentEnv, AgentError};
use crate::config::render_template;
use crate::lineage::LineageContext;
use crate::llm::{CompletionParams, ContinuationPolicy, RetryPolicy};
use crate::llm::provider::ProviderKind;
use crate::model::{AgentResult, Context, FileChange, Messages, Metrics};

pub struct SolutionDesignerAgent;

impl Agent for SolutionDesignerAgent {
    fn agent_kind(&self) -> &str {
        "solution_designer"
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

            let view = env.config.agent_view("solution_designer", &env.defaults)?;
            let provider = ProviderKind::parse(&view.provider)
                .map_err(|_| AgentError::Input(format!("unknown provider '{}'", view.provider)))?;

            let raw_output = context
                .input_data
                .get("raw_output")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let mut values = HashMap::new();
            values.insert("project_path".to_string(), context.project_path.clone());
            values.insert("intent_description".to_string(), context.intent.description.clone());
            values.insert("manifest".to_string(), raw_output);

            let missing = view.discover_placeholders();
            let required: Vec<String> = missing
                .into_iter()
                .filter(|name| !values.contains_key(name))
                .collect();
            if !required.is_empty() {
                return Err(AgentError::MissingPlaceholders(required));
            }

            let user_prompt = render_template(&view.user_prompt_template, &values)
                .map_err(AgentError::MissingPlaceholders)?;

            let params = CompletionParams {
                temperature: view.temperature,
                max_tokens: 4096,
                continuation: ContinuationPolicy::default(),
                retry: RetryPolicy::default(),
            };

            let outcome = env
                .llm
                .complete(provider, &view.model, &view.system_prompt, &user_prompt, &params)
                .await?;

            let messages = Messages {
                system: view.system_prompt.clone(),
                user: user_prompt.clone(),
                assistant: outcome.content.clone(),
            };

            if outcome.truncated {
                let result = AgentResult::failure(
                    "llm_transient: response truncated after exhausting continuation attempts",
                    messages,
                    outcome.metrics,
                );
                self.emit(env, lineage_context, started_at, &user_prompt, &outcome.content, outcome.metrics, result.error.clone())
                    .await;
                return Ok(result);
            }

            let parsed = extract_json(&outcome.content).and_then(|value| {
                let changes: Vec<FileChange> = serde_json::from_value(
                    value
                        .get("changes")
                        .cloned()
                        .unwrap_or(serde_json::Value::Array(Vec::new())),
                )
                .map_err(|err| err.to_string())?;
                if let Some(bad) = changes.iter().find(|c| !c.is_well_formed()) {
                    return Err(format!(
                        "change for '{}' is missing content or diff",
                        bad.file_path
                    ));
                }
                Ok(changes)
            });

            let result = match parsed {
                Ok(changes) => {
                    let mut data = HashMap::new();
                    data.insert("changes".to_string(), serde_json::to_value(&changes).unwrap_or_default());
                    AgentResult {
                        success: true,
                        data,
                        error: None,
                        messages,
                        metrics: outcome.metrics,
                    }
                }
                Err(reason) => {
                    let mut data = HashMap::new();
                    data.insert(
                        "raw_output".to_string(),
                        serde_json::Value::String(outcome.content.clone()),
                    );
                    AgentResult {
                        success: false,
                        data,
                        error: Some(format!("parse_error: {reason}")),
                        messages,
                        metrics: outcome.metrics,
                    }
                }
            };

            self.emit(
                env,
                lineage_context,
                started_at,
                &user_prompt,
                &outcome.content,
                outcome.metrics,
                result.error.clone(),
            )
            .await;

            Ok(result)
        })
    }
}

impl SolutionDesignerAgent {
    #[allow(clippy::too_many_arguments)]
    async fn emit(
        &self,
        env: &AgentEnv,
        lineage_context: &LineageContext,
        started_at: chrono::DateTime<chrono::Utc>,
        user_prompt: &str,
        raw_response: &str,
        metrics: Metrics,
        error: Option<String>,
    ) {
        env.lineage
            .emit(
                lineage_context,
                self.agent_kind(),
                started_at,
                Utc::now(),
                serde_json::json!({ "user_prompt": user_prompt }),
                serde_json::json!({ "raw_response": raw_response }),
                metrics,
                error,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_change_requires_content_or_diff_for_create_and_modify() {
        let change = FileChange {
            file_path: "a.py".into(),
            change_type: crate::model::ChangeType::Modify,
            description: None,
            content: None,
            diff: None,
        };
        assert!(!change.is_well_formed());
    }

    #[test]
    fn extract_json_rejects_plain_prose_response() {
        assert!(extract_json("Sorry, I can't do that.").is_err());
    }
}
