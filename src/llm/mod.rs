//! Provider-agnostic LLM invocation: single-shot completion, continuation
//! stitching for length-truncated outputs, retry with exponential backoff on
//! transient provider errors, and token-budget accounting.
//!
//! Built on `rig-core`'s `Chat` trait, the same interface
//! `M4n5ter-rigs/src/rig_agent.rs::RigAgent::run` drives (`agent.chat(task,
//! history).await`). `rig-core`'s `Chat` surface does not expose a
//! structured finish-reason or token usage the way a lower-level completion
//! API would; rather than invent fields on `rig`'s types this crate does not
//! have grounds to assume exist, finish-reason and usage are both derived
//! here from the response text against the request's `max_tokens` budget —
//! an approximation, grounded in DESIGN.md's C2 entry, not a hidden one.
//! Only `Stop`/`Length` are ever produced this way; `ContentFilter`/`Error`
//! are reserved for a lower-level completion API this crate does not have
//! (see [`FinishReason`]).

pub mod provider;
pub mod rate_limit;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rig::message::Message;
use thiserror::Error;

use crate::model::Metrics;
use provider::{ChatModel, ProviderError, ProviderKind};
use rate_limit::TokenBucket;

const CONTINUE_INSTRUCTION: &str =
    "Continue exactly from where you left off, maintaining the output format.";

/// `ContentFilter` and `Error` complete the spec's 4-variant contract but are
/// never constructed by this adapter: `rig-core`'s `Chat` surface surfaces a
/// content-filter or permanent-error response as an `Err`, classified
/// non-retriable by [`is_retriable`] and returned as `LlmError::Permanent`,
/// not as a successful `CompletionOutcome` carrying one of these variants. A
/// lower-level completion API that reports finish reason on the success path
/// (rather than only through the error channel) would make them reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    Error,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Result of one logical [`LlmAdapter::complete`] call, after any
/// continuation stitching has already happened.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub metrics: Metrics,
    /// Set when continuation was exhausted before the provider stopped on
    /// its own; downstream parsers should treat this as unparseable rather
    /// than silently trusting a cut-off document.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct ContinuationPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub token_buffer: u64,
}

impl Default for ContinuationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            token_buffer: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub temperature: f64,
    pub max_tokens: u64,
    pub continuation: ContinuationPolicy,
    pub retry: RetryPolicy,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("LLM call failed after exhausting retry budget: {0}")]
    ExhaustedRetries(String),
    #[error("LLM call failed with a non-retriable error: {0}")]
    Permanent(String),
}

/// Classifies a `rig-core` prompt error by inspecting its message for
/// well-known transient-failure markers. `rig`'s `PromptError`/
/// `CompletionError` variants are an evolving surface this crate does not
/// pattern-match against directly; message sniffing is the conservative,
/// version-tolerant choice.
fn is_retriable(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["rate limit", "rate_limit", "overloaded", "timeout", "timed out", "429", "503"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Rough token estimate (characters / 4) used only to decide whether a
/// response likely hit its `max_tokens` ceiling, since the `Chat` surface
/// does not report exact usage.
fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Provider-agnostic completion core. Holds one rate limiter per provider so
/// concurrent workflows sharing a provider do not individually exceed it.
pub struct LlmAdapter {
    rate_limiters: HashMap<ProviderKind, Arc<TokenBucket>>,
}

impl Default for LlmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmAdapter {
    pub fn new() -> Self {
        Self {
            rate_limiters: HashMap::new(),
        }
    }

    /// Configure the token bucket for one provider. Providers with no
    /// configured bucket are unrestricted (but still serialized through the
    /// `rig-core` client itself).
    pub fn with_rate_limit(mut self, provider: ProviderKind, capacity: u32, period: Duration) -> Self {
        self.rate_limiters
            .insert(provider, Arc::new(TokenBucket::new(capacity, period)));
        self
    }

    fn rate_limiter(&self, provider: ProviderKind) -> Option<Arc<TokenBucket>> {
        self.rate_limiters.get(&provider).cloned()
    }

    /// `complete(provider, model, system, messages, params) -> outcome`, the
    /// LLM Adapter's single entry point. `messages` is the user-turn prompt
    /// text; system and history framing is handled internally.
    pub async fn complete(
        &self,
        provider: ProviderKind,
        model: &str,
        system: &str,
        user_prompt: &str,
        params: &CompletionParams,
    ) -> Result<CompletionOutcome, LlmError> {
        let chat_model = provider::build_agent(provider, model, system, params.temperature, params.max_tokens);

        let started = std::time::Instant::now();
        let mut metrics = Metrics::default();
        let mut usage = Usage::default();

        let (first_content, first_reason) = self
            .call_with_retry(provider, chat_model.as_ref(), user_prompt.to_string(), Vec::new(), params)
            .await?;
        usage.prompt_tokens += estimate_tokens(system) + estimate_tokens(user_prompt);
        usage.completion_tokens += estimate_tokens(&first_content);

        let mut content = first_content;
        let mut finish_reason = first_reason;
        let mut truncated = false;

        if params.continuation.enabled {
            let mut attempts = 0;
            while finish_reason == FinishReason::Length {
                if attempts >= params.continuation.max_attempts {
                    truncated = true;
                    break;
                }
                attempts += 1;
                metrics.continuations += 1;

                let history = vec![
                    Message::user(user_prompt.to_string()),
                    Message::assistant(content.clone()),
                ];
                let (continuation_content, continuation_reason) = self
                    .call_with_retry(
                        provider,
                        chat_model.as_ref(),
                        CONTINUE_INSTRUCTION.to_string(),
                        history,
                        params,
                    )
                    .await?;
                usage.completion_tokens += estimate_tokens(&continuation_content);
                content.push_str(&continuation_content);
                finish_reason = continuation_reason;
            }
        } else if finish_reason == FinishReason::Length {
            truncated = true;
        }

        usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;
        metrics.prompt_tokens = usage.prompt_tokens;
        metrics.completion_tokens = usage.completion_tokens;
        metrics.total_tokens = usage.total_tokens;
        metrics.duration_ms = started.elapsed().as_millis() as u64;

        Ok(CompletionOutcome {
            content,
            finish_reason,
            usage,
            metrics,
            truncated,
        })
    }

    /// One hop (initial call or a single continuation), wrapped in the
    /// retry/backoff policy. Returns the raw text plus the finish reason
    /// estimated from it.
    async fn call_with_retry(
        &self,
        provider: ProviderKind,
        chat_model: &dyn ChatModel,
        prompt: String,
        history: Vec<Message>,
        params: &CompletionParams,
    ) -> Result<(String, FinishReason), LlmError> {
        let limiter = self.rate_limiter(provider);
        let mut attempt = 0;
        loop {
            if let Some(limiter) = &limiter {
                limiter.acquire().await;
            }
            match chat_model.chat(prompt.clone(), history.clone()).await {
                Ok(text) => {
                    let estimated = estimate_tokens(&text);
                    let ceiling = params.max_tokens.saturating_sub(params.continuation.token_buffer);
                    let reason = if ceiling > 0 && estimated >= ceiling {
                        FinishReason::Length
                    } else {
                        FinishReason::Stop
                    };
                    return Ok((text, reason));
                }
                Err(err) => {
                    let message = err.to_string();
                    if !is_retriable(&message) || attempt >= params.retry.max_retries {
                        if is_retriable(&message) {
                            return Err(LlmError::ExhaustedRetries(message));
                        }
                        return Err(LlmError::Permanent(message));
                    }
                    let delay = params.retry.initial_delay * 2u32.pow(attempt);
                    let delay = delay.min(params.retry.max_delay);
                    tracing::warn!(provider = ?provider, attempt, %message, "retrying transient LLM error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_markers_are_detected_case_insensitively() {
        assert!(is_retriable("Error: Rate Limit exceeded"));
        assert!(is_retriable("upstream overloaded, try again"));
        assert!(is_retriable("request timed out"));
        assert!(is_retriable("HTTP 429 Too Many Requests"));
        assert!(!is_retriable("invalid api key"));
        assert!(!is_retriable("content filtered"));
    }

    #[test]
    fn token_estimate_grows_with_text_length() {
        assert!(estimate_tokens("a longer piece of text here") > estimate_tokens("short"));
    }

    #[test]
    fn retry_delay_doubles_and_caps_at_max_delay() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..8)
            .map(|attempt| (policy.initial_delay * 2u32.pow(attempt)).min(policy.max_delay))
            .collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[4], Duration::from_secs(16));
        assert_eq!(delays[5], Duration::from_secs(30));
        assert_eq!(delays[7], Duration::from_secs(30));
    }
}
