//! Provider-specific wiring. Mirrors `M4n5ter-rigs`'s `LLMProvider` enum and
//! its `impl_agent_builder!`/`impl_agent_builder_auto!` macro pair almost
//! verbatim, generalized to hand back a type-erased [`ChatModel`] rather than
//! an `AgentBuilder<M>`, since the LLM Adapter needs one call surface that is
//! the same across providers.

use futures::future::BoxFuture;
use paste::paste;
use rig::completion::{Chat, PromptError};
use rig::message::Message;
use rig::providers::{anthropic, deepseek, gemini, openai, openrouter};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown LLM provider '{0}'")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Anthropic,
    DeepSeek,
    Gemini,
    OpenAI,
    OpenRouter,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Result<Self, ProviderError> {
        match name {
            "anthropic" => Ok(Self::Anthropic),
            "deepseek" => Ok(Self::DeepSeek),
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAI),
            "openrouter" => Ok(Self::OpenRouter),
            other => Err(ProviderError::Unknown(other.to_string())),
        }
    }

    /// The environment variable convention each provider's `rig-core` client
    /// reads its API key from via `Client::from_env()`. Exposed so the
    /// Orchestrator's preflight can verify secrets are resolvable by name
    /// only, never reading the value into lineage.
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::DeepSeek => "DEEPSEEK_API_KEY",
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::OpenAI => "OPENAI_API_KEY",
            ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
        }
    }
}

/// A single, stateless chat call. Implemented once for every
/// `rig::agent::Agent<M>` regardless of which provider's completion model
/// `M` is, so callers hold a `Box<dyn ChatModel>` instead of a
/// provider-specific generic.
pub trait ChatModel: Send + Sync {
    fn chat<'a>(
        &'a self,
        prompt: String,
        history: Vec<Message>,
    ) -> BoxFuture<'a, Result<String, PromptError>>;
}

impl<M> ChatModel for rig::agent::Agent<M>
where
    M: rig::completion::CompletionModel,
{
    fn chat<'a>(
        &'a self,
        prompt: String,
        history: Vec<Message>,
    ) -> BoxFuture<'a, Result<String, PromptError>> {
        Box::pin(async move { Chat::chat(self, prompt, history).await })
    }
}

macro_rules! impl_build_agent {
    ($method:ident, $client:ty) => {
        fn $method(model: &str, system_prompt: &str, temperature: f64, max_tokens: u64) -> Box<dyn ChatModel> {
            let client = <$client>::from_env();
            let agent = client
                .agent(model)
                .preamble(system_prompt)
                .temperature(temperature)
                .max_tokens(max_tokens)
                .build();
            Box::new(agent)
        }
    };
}

macro_rules! impl_build_agent_auto {
    ($variant:ident, $client:ty) => {
        paste! {
            impl_build_agent!([<build_ $variant:snake _agent>], $client);
        }
    };
}

impl_build_agent_auto!(Anthropic, anthropic::Client);
impl_build_agent_auto!(DeepSeek, deepseek::Client);
impl_build_agent_auto!(Gemini, gemini::Client);
impl_build_agent_auto!(OpenAI, openai::Client);
impl_build_agent_auto!(OpenRouter, openrouter::Client);

/// Build a one-shot chat caller for `provider`, reading its API key from the
/// environment via `rig-core`'s own `Client::from_env()` convention.
pub fn build_agent(
    provider: ProviderKind,
    model: &str,
    system_prompt: &str,
    temperature: f64,
    max_tokens: u64,
) -> Box<dyn ChatModel> {
    match provider {
        ProviderKind::Anthropic => build_anthropic_agent(model, system_prompt, temperature, max_tokens),
        ProviderKind::DeepSeek => build_deep_seek_agent(model, system_prompt, temperature, max_tokens),
        ProviderKind::Gemini => build_gemini_agent(model, system_prompt, temperature, max_tokens),
        ProviderKind::OpenAI => build_open_ai_agent(model, system_prompt, temperature, max_tokens),
        ProviderKind::OpenRouter => build_open_router_agent(model, system_prompt, temperature, max_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_provider_names() {
        assert_eq!(ProviderKind::parse("anthropic").unwrap(), ProviderKind::Anthropic);
        assert_eq!(ProviderKind::parse("openrouter").unwrap(), ProviderKind::OpenRouter);
    }

    #[test]
    fn rejects_unknown_provider_names() {
        assert!(ProviderKind::parse("made-up-vendor").is_err());
    }

    #[test]
    fn every_provider_has_a_distinct_env_var() {
        let kinds = [
            ProviderKind::Anthropic,
            ProviderKind::DeepSeek,
            ProviderKind::Gemini,
            ProviderKind::OpenAI,
            ProviderKind::OpenRouter,
        ];
        let mut vars: Vec<_> = kinds.iter().map(|k| k.api_key_env_var()).collect();
        vars.sort_unstable();
        vars.dedup();
        assert_eq!(vars.len(), kinds.len());
    }
}
