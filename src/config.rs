//! Hierarchical configuration: a dynamic scalar/map/list tree with
//! deterministic deep-merge, dot-path lookup, and agent-scoped resolution.
//!
//! No example in the retrieval pack carries a dynamic config value type (the
//! closest analog, `llmspell-config/src/merge.rs`, merges fixed structs); the
//! merge *rules* below are adapted from that module's "override if
//! non-default / merge maps by key / override vecs entirely" shape onto an
//! open-ended tree, which is what agent-scoped overlay resolution needs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A node in the configuration tree: a scalar, an ordered map, or a list.
/// Lists and scalars are both merge *leaves* — only maps recurse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Dot-path lookup. Returns `None` for an absent path — distinct from a
    /// path resolving to an explicit [`Value::Null`].
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    /// Deep-merge `overlay` onto `self`, returning the result. Both maps:
    /// recurse key by key. Otherwise (scalar, list, or a type mismatch):
    /// `overlay` wins outright, including replacing a map with a scalar or
    /// vice versa. Lists are never concatenated or zipped — an overlay list
    /// replaces the base list wholesale.
    pub fn merge(&self, overlay: &Value) -> Value {
        match (self, overlay) {
            (Value::Map(base), Value::Map(over)) => {
                let mut result = base.clone();
                for (key, over_value) in over {
                    match result.get(key) {
                        Some(base_value) => {
                            result.insert(key.clone(), base_value.merge(over_value));
                        }
                        None => {
                            result.insert(key.clone(), over_value.clone());
                        }
                    }
                }
                Value::Map(result)
            }
            (_, overlay) => overlay.clone(),
        }
    }

    /// Merge a chain of layers in increasing precedence. Associative: the
    /// fold order does not matter as long as relative precedence is
    /// preserved.
    pub fn merge_chain<'a>(layers: impl IntoIterator<Item = &'a Value>) -> Value {
        let mut iter = layers.into_iter();
        let mut acc = iter.next().cloned().unwrap_or(Value::map());
        for layer in iter {
            acc = acc.merge(layer);
        }
        acc
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration at path '{0}'")]
    MissingRequired(String),
    #[error("expected a map at path '{path}' but found a different type")]
    NotAMap { path: String },
    #[error("unknown provider referenced by agent '{agent}': '{provider}'")]
    UnknownProvider { agent: String, provider: String },
    #[error("failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("environment variable '{0}' referenced by configuration is not set")]
    MissingEnvVar(String),
}

/// A fully resolved, read-only configuration tree for one workflow. Built
/// once at workflow initialization by merging the server defaults with the
/// request's overlays (lowest to highest precedence).
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: Value,
}

impl ConfigStore {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Load the server-defaults layer from a YAML file, expanding `${VAR}`
    /// references against the process environment.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let expanded = expand_env_vars(&text)?;
        let root: Value = serde_yaml::from_str(&expanded)?;
        Ok(Self { root })
    }

    /// Merge `system_config` then `app_config` overlays onto this store,
    /// in that precedence order, returning a new effective store.
    pub fn with_overlays(&self, system_config: Option<&Value>, app_config: Option<&Value>) -> Self {
        let empty = Value::map();
        let merged = Value::merge_chain([
            &self.root,
            system_config.unwrap_or(&empty),
            app_config.unwrap_or(&empty),
        ]);
        Self { root: merged }
    }

    /// Merge a per-task overlay on top, the highest-precedence layer.
    pub fn with_task_overlay(&self, overlay: Option<&Value>) -> Self {
        match overlay {
            Some(overlay) => Self {
                root: self.root.merge(overlay),
            },
            None => self.clone(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.root.get_path(path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Resolve the flat configuration an agent of `agent_kind` sees:
    /// `llm_config.agents.<agent_kind>` overlaid onto
    /// `llm_config.providers.<provider>` defaults.
    ///
    /// Resolution order for each scalar parameter: per-agent override ->
    /// `llm_config.default_*` -> provider default -> compiled-in default
    /// (the compiled-in default is supplied by the caller via
    /// [`AgentViewDefaults`]).
    pub fn agent_view(
        &self,
        agent_kind: &str,
        defaults: &AgentViewDefaults,
    ) -> Result<AgentView, ConfigError> {
        let agent_path = format!("llm_config.agents.{agent_kind}");
        let agent_cfg = self.get(&agent_path);

        let provider = agent_cfg
            .and_then(|v| v.get_path("provider"))
            .and_then(Value::as_str)
            .or_else(|| self.get_str("llm_config.default_provider"))
            .unwrap_or(&defaults.provider)
            .to_string();

        let provider_path = format!("llm_config.providers.{provider}");
        let provider_cfg = self.get(&provider_path);
        if agent_cfg.and_then(|v| v.get_path("provider")).is_some() && provider_cfg.is_none() {
            return Err(ConfigError::UnknownProvider {
                agent: agent_kind.to_string(),
                provider,
            });
        }

        let resolve_str = |key: &str, default: &str| -> String {
            agent_cfg
                .and_then(|v| v.get_path(key))
                .and_then(Value::as_str)
                .or_else(|| {
                    self.get_str(&format!("llm_config.default_{key}"))
                })
                .or_else(|| provider_cfg.and_then(|v| v.get_path(&format!("default_{key}"))).and_then(Value::as_str))
                .unwrap_or(default)
                .to_string()
        };

        let resolve_f64 = |key: &str, default: f64| -> f64 {
            agent_cfg
                .and_then(|v| v.get_path(key))
                .and_then(Value::as_f64)
                .or_else(|| self.get(&format!("llm_config.default_{key}")).and_then(Value::as_f64))
                .or_else(|| {
                    provider_cfg
                        .and_then(|v| v.get_path(&format!("default_{key}")))
                        .and_then(Value::as_f64)
                })
                .unwrap_or(default)
        };

        let model = resolve_str("model", &defaults.model);
        let system_prompt = resolve_str("system_prompt", &defaults.system_prompt);
        let user_prompt_template = resolve_str("user_prompt_template", &defaults.user_prompt_template);
        let temperature = resolve_f64("temperature", defaults.temperature);

        Ok(AgentView {
            provider,
            model,
            system_prompt,
            user_prompt_template,
            temperature,
            raw: agent_cfg.cloned().unwrap_or(Value::map()),
        })
    }
}

/// Compiled-in fallbacks consulted only when neither the agent, the
/// workflow-level default, nor the provider supplies a value.
#[derive(Debug, Clone)]
pub struct AgentViewDefaults {
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
    pub temperature: f64,
}

/// The flat view an agent implementation actually consumes.
#[derive(Debug, Clone)]
pub struct AgentView {
    pub provider: String,
    pub model: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
    pub temperature: f64,
    raw: Value,
}

impl AgentView {
    /// Every `{placeholder}` the template text actually references, so
    /// callers validate against the template rather than a fixed field set
    /// (Open Question decision: placeholders are discovered, not declared).
    pub fn discover_placeholders(&self) -> Vec<String> {
        discover_placeholders(&self.user_prompt_template)
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

fn discover_placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i + 1..].find('}') {
                let name = &template[i + 1..i + 1 + end];
                if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    names.push(name.to_string());
                }
                i += end + 2;
                continue;
            }
        }
        i += 1;
    }
    names
}

/// Substitute `{name}` placeholders in `template` with `values`, erroring if
/// any placeholder actually present in the template text has no value.
pub fn render_template(
    template: &str,
    values: &std::collections::HashMap<String, String>,
) -> Result<String, Vec<String>> {
    let mut missing = Vec::new();
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        match rest.find('{') {
            None => {
                output.push_str(rest);
                break;
            }
            Some(start) => {
                output.push_str(&rest[..start]);
                let after = &rest[start + 1..];
                match after.find('}') {
                    None => {
                        output.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let name = &after[..end];
                        match values.get(name) {
                            Some(value) => output.push_str(value),
                            None => missing.push(name.to_string()),
                        }
                        rest = &after[end + 1..];
                    }
                }
            }
        }
    }
    if missing.is_empty() {
        Ok(output)
    } else {
        Err(missing)
    }
}

/// Expand `${VAR}` references in raw YAML text against the process
/// environment before parsing. A referenced variable that is unset is a
/// loud [`ConfigError`], not a silently empty string.
fn expand_env_vars(text: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        match rest.find("${") {
            None => {
                output.push_str(rest);
                break;
            }
            Some(start) => {
                output.push_str(&rest[..start]);
                let after = &rest[start + 2..];
                match after.find('}') {
                    None => {
                        output.push_str(&rest[start..]);
                        break;
                    }
                    Some(end) => {
                        let var_name = &after[..end];
                        let value = std::env::var(var_name)
                            .map_err(|_| ConfigError::MissingEnvVar(var_name.to_string()))?;
                        output.push_str(&value);
                        rest = &after[end + 1..];
                    }
                }
            }
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, Value)]) -> Value {
        Value::Map(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn merge_empty_overlay_is_identity() {
        let base = map(&[("a", Value::Int(1)), ("b", map(&[("c", Value::Bool(true))]))]);
        let merged = base.merge(&Value::map());
        assert_eq!(merged, base);
    }

    #[test]
    fn merge_recurses_into_nested_maps() {
        let base = map(&[("llm_config", map(&[("temperature", Value::Float(0.2))]))]);
        let overlay = map(&[("llm_config", map(&[("model", Value::String("gpt-5".into()))]))]);
        let merged = base.merge(&overlay);
        assert_eq!(
            merged.get_path("llm_config.temperature"),
            Some(&Value::Float(0.2))
        );
        assert_eq!(
            merged.get_path("llm_config.model"),
            Some(&Value::String("gpt-5".into()))
        );
    }

    #[test]
    fn merge_scalar_overlay_wins_even_changing_type() {
        let base = map(&[("x", Value::Int(1))]);
        let overlay = map(&[("x", Value::String("now a string".into()))]);
        let merged = base.merge(&overlay);
        assert_eq!(merged.get_path("x"), Some(&Value::String("now a string".into())));
    }

    #[test]
    fn merge_lists_replace_wholesale() {
        let base = map(&[("xs", Value::List(vec![Value::Int(1), Value::Int(2)]))]);
        let overlay = map(&[("xs", Value::List(vec![Value::Int(9)]))]);
        let merged = base.merge(&overlay);
        assert_eq!(merged.get_path("xs"), Some(&Value::List(vec![Value::Int(9)])));
    }

    #[test]
    fn merge_null_overlay_sets_explicit_null() {
        let base = map(&[("x", Value::Int(1))]);
        let overlay = map(&[("x", Value::Null)]);
        let merged = base.merge(&overlay);
        assert_eq!(merged.get_path("x"), Some(&Value::Null));
    }

    #[test]
    fn merge_is_associative_for_disjoint_leaves() {
        let base = map(&[("a", Value::Int(1))]);
        let a = map(&[("b", Value::Int(2))]);
        let b = map(&[("c", Value::Int(3))]);
        let left = base.merge(&a).merge(&b);
        let right = base.merge(&a.merge(&b));
        assert_eq!(left, right);
    }

    #[test]
    fn get_path_distinguishes_absent_from_null() {
        let tree = map(&[("a", Value::Null)]);
        assert_eq!(tree.get_path("a"), Some(&Value::Null));
        assert_eq!(tree.get_path("b"), None);
    }

    #[test]
    fn config_override_precedence_example() {
        let base = map(&[(
            "llm_config",
            map(&[(
                "agents",
                map(&[("coder", map(&[("temperature", Value::Float(0.2))]))]),
            )]),
        )]);
        let system = map(&[(
            "llm_config",
            map(&[(
                "agents",
                map(&[("coder", map(&[("temperature", Value::Float(0.5))]))]),
            )]),
        )]);
        let app = map(&[(
            "llm_config",
            map(&[(
                "agents",
                map(&[("coder", map(&[("temperature", Value::Int(0))]))]),
            )]),
        )]);
        let store = ConfigStore::new(base).with_overlays(Some(&system), Some(&app));
        let view = store
            .agent_view(
                "coder",
                &AgentViewDefaults {
                    provider: "anthropic".into(),
                    model: "claude".into(),
                    system_prompt: String::new(),
                    user_prompt_template: String::new(),
                    temperature: 1.0,
                },
            )
            .unwrap();
        assert_eq!(view.temperature, 0.0);
    }

    #[test]
    fn discover_placeholders_finds_all_names() {
        let names = discover_placeholders("Summarize {project_path} for {intent_description}.");
        assert_eq!(names, vec!["project_path", "intent_description"]);
    }

    #[test]
    fn render_template_reports_missing_placeholders() {
        let mut values = std::collections::HashMap::new();
        values.insert("name".to_string(), "world".to_string());
        let err = render_template("hello {name}, {missing}", &values).unwrap_err();
        assert_eq!(err, vec!["missing".to_string()]);
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let base = map(&[(
            "llm_config",
            map(&[(
                "agents",
                map(&[(
                    "coder",
                    map(&[("provider", Value::String("nonexistent".into()))]),
                )]),
            )]),
        )]);
        let store = ConfigStore::new(base);
        let err = store
            .agent_view(
                "coder",
                &AgentViewDefaults {
                    provider: "anthropic".into(),
                    model: "claude".into(),
                    system_prompt: String::new(),
                    user_prompt_template: String::new(),
                    temperature: 1.0,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider { .. }));
    }
}
