//! Brain module: LLM provider abstraction and interaction.
//!
//! Defines the `LlmProvider` trait for model-agnostic chat calls and the
//! [`Brain`], which wraps a provider with retry, cancellation, cost pricing
//! and the "parse JSON or ask once more" discipline every agent relies on.

use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::providers::with_retry;
use crate::research::parse::extract_json;
use crate::types::{ChatResponse, CostBreakdown, Message, TokenUsage};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a conversation and return the assistant reply.
    async fn chat(&self, messages: &[Message]) -> Result<ChatResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Price per 1M tokens as `(input, output)` in USD.
    fn pricing(&self) -> (f64, f64);
}

/// Appended when a reply that should have been JSON could not be parsed.
const STRICT_JSON_REMINDER: &str = "Your previous reply could not be parsed. \
Respond with ONLY the requested JSON value: no prose, no explanations, no markdown code fences.";

/// Shared, stateless handle to the language model.
///
/// Costs are returned per call instead of tracked internally, so one `Brain`
/// can serve many concurrent workers.
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    retry: RetryConfig,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryConfig) -> Self {
        Self { provider, retry }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn provider_arc(&self) -> Arc<dyn LlmProvider> {
        Arc::clone(&self.provider)
    }

    /// Price a usage record with this provider's rates.
    pub fn price(&self, usage: &TokenUsage) -> CostBreakdown {
        let (input, output) = self.provider.pricing();
        CostBreakdown::from_usage(usage, input, output)
    }

    /// One chat call with transient-error retry, aborted promptly on cancellation.
    pub async fn chat(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
    ) -> Result<(ChatResponse, CostBreakdown), LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let call = with_retry(&self.retry, || self.provider.chat(messages));
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = call => result?,
        };
        let cost = self.price(&response.usage);
        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Chat call completed"
        );
        Ok((response, cost))
    }

    /// Ask for a JSON reply and decode it into `T`.
    ///
    /// An unparseable reply is retried once with a stricter instruction. If
    /// the second reply is unparseable too the value is `None`, and the caller
    /// applies its own fallback. Every completed call is added to `cost`, also
    /// when the retry fails.
    pub async fn chat_json<T: DeserializeOwned>(
        &self,
        messages: &[Message],
        cancel: &CancellationToken,
        cost: &mut CostBreakdown,
    ) -> Result<Option<T>, LlmError> {
        let (first, first_cost) = self.chat(messages, cancel).await?;
        cost.add(&first_cost);
        if let Some(value) = extract_json::<T>(&first.content) {
            return Ok(Some(value));
        }

        warn!(
            model = %first.model,
            "Model reply was not valid JSON; retrying with a stricter prompt"
        );
        let mut strict = messages.to_vec();
        strict.push(Message::assistant(first.content));
        strict.push(Message::user(STRICT_JSON_REMINDER));
        let (second, second_cost) = self.chat(&strict, cancel).await?;
        cost.add(&second_cost);

        let value = extract_json::<T>(&second.content);
        if value.is_none() {
            warn!(model = %second.model, "Model reply still not valid JSON; using fallback");
        }
        Ok(value)
    }
}

type Responder = Box<dyn Fn(&[Message]) -> Result<String, LlmError> + Send + Sync>;

/// A mock LLM provider for testing.
///
/// Replies come from a queue first, then from an optional responder that can
/// route on prompt content, then from a fixed default text. Safe to share
/// across concurrent workers.
pub struct MockLlmProvider {
    model: String,
    responses: std::sync::Mutex<VecDeque<Result<String, LlmError>>>,
    responder: Option<Responder>,
    delay: Option<Duration>,
    usage: TokenUsage,
    pricing: (f64, f64),
    calls: AtomicUsize,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: std::sync::Mutex::new(VecDeque::new()),
            responder: None,
            delay: None,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            pricing: (1.0, 2.0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a provider whose replies are computed from the conversation.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// Sleep before every reply; used to hold calls in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a reply to be returned by the next `chat` call.
    pub fn queue_response(&self, text: &str) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Ok(text.to_string()));
        }
    }

    /// Queue an error to be returned by the next `chat` call.
    pub fn queue_error(&self, error: LlmError) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(error));
        }
    }

    /// Number of `chat` calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, messages: &[Message]) -> Result<String, LlmError> {
        let queued = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        match (queued, &self.responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(messages),
            (None, None) => Ok("I'm a mock LLM. No queued responses available.".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn chat(&self, messages: &[Message]) -> Result<ChatResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = self.next_reply(messages)?;
        Ok(ChatResponse {
            content,
            usage: self.usage,
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn pricing(&self) -> (f64, f64) {
        self.pricing
    }
}
