//! The Agent Runtime contract: every agent kind (Discovery, Solution
//! Designer, Coder) implements the same `process(context) -> AgentResult`
//! algorithm, differing only in how they format their request and parse
//! their response. Trait shape (`BoxFuture`-returning methods, an
//! `AgentError` enum) follows `M4n5ter-rigs/src/agent.rs`'s `Agent` trait,
//! re-pointed at this contract instead of the teacher's `run(task) ->
//! String` loop.

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::collaborators::{AssetWriter, CollaboratorError, MergeSkill, ProjectScanner};
use crate::config::{AgentViewDefaults, ConfigStore};
use crate::lineage::{LineageContext, LineageEmitter};
use crate::llm::LlmAdapter;
use crate::model::{AgentResult, Context};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("config_error: {0}")]
    Config(#[from] crate::config::ConfigError),
    #[error("input_error: missing required placeholder(s) {0:?}")]
    MissingPlaceholders(Vec<String>),
    #[error("input_error: {0}")]
    Input(String),
    #[error(transparent)]
    Llm(#[from] crate::llm::LlmError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error("parse_error: {0}")]
    Parse(String),
}

/// The shared services every agent needs: configuration, the LLM Adapter,
/// lineage recording, and the filesystem collaborators. Agents are
/// constructed once and registered; a fresh [`LineageContext`] is handed in
/// per workflow via the call site, not stored on the agent.
pub struct AgentEnv {
    pub config: Arc<ConfigStore>,
    pub llm: Arc<LlmAdapter>,
    pub lineage: Arc<LineageEmitter>,
    pub scanner: Arc<dyn ProjectScanner>,
    pub merge: Arc<dyn MergeSkill>,
    pub writer: Arc<dyn AssetWriter>,
    pub defaults: AgentViewDefaults,
}

pub trait Agent: Send + Sync {
    /// The registry key this implementation answers to (`"discovery"`,
    /// `"solution_designer"`, `"coder"`, ...).
    fn agent_kind(&self) -> &str;

    fn process<'a>(
        &'a self,
        env: &'a AgentEnv,
        lineage_context: &'a LineageContext,
        context: &'a Context,
    ) -> BoxFuture<'a, Result<AgentResult, AgentError>>;
}

/// Extracts a JSON document from a response that may wrap it in prose or a
/// fenced code block. Tolerant extraction mirrors
/// `M4n5ter-rigs/src/rig_agent.rs`'s planning-output handling, generalized
/// from "plan text" to "any JSON payload".
pub fn extract_json(text: &str) -> Result<serde_json::Value, String> {
    if let Some(fenced) = extract_fenced_block(text) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&fenced) {
            return Ok(value);
        }
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text.trim()) {
        return Ok(value);
    }
    if let Some(slice) = largest_brace_span(text) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(slice) {
            return Ok(value);
        }
    }
    Err("no valid JSON document found in response".to_string())
}

fn extract_fenced_block(text: &str) -> Option<String> {
    let start_marker = text.find("```")?;
    let after_marker = &text[start_marker + 3..];
    let after_lang = after_marker.trim_start_matches(|c: char| c.is_alphanumeric());
    let end = after_lang.find("```")?;
    Some(after_lang[..end].trim().to_string())
}

fn largest_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start { Some(&text[start..=end]) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_parses_bare_document() {
        let value = extract_json(r#"{"changes": []}"#).unwrap();
        assert_eq!(value["changes"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn extract_json_parses_fenced_block_with_surrounding_prose() {
        let text = "Here is my plan:\n```json\n{\"changes\": [1, 2]}\n```\nHope that helps!";
        let value = extract_json(text).unwrap();
        assert_eq!(value["changes"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn extract_json_falls_back_to_largest_brace_span() {
        let text = "Sure, here you go -> {\"changes\": [true]} <- done";
        let value = extract_json(text).unwrap();
        assert_eq!(value["changes"][0], true);
    }

    #[test]
    fn extract_json_errors_on_unparseable_prose() {
        assert!(extract_json("I cannot help with that request.").is_err());
    }
}
