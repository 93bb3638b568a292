//! Brain module: LLM provider abstraction and structured completions.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions and the
//! `Brain` wrapper the phase tasks use to request JSON-shaped output.

use crate::error::{LlmError, TaskError};
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the default model name.
    fn model_name(&self) -> &str;
}

/// Wraps a provider and coerces completions into typed values.
pub struct Brain {
    provider: Arc<dyn LlmProvider>,
    temperature: f32,
    max_tokens: Option<usize>,
    total_usage: Mutex<TokenUsage>,
}

impl Brain {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            temperature: CompletionRequest::default().temperature,
            max_tokens: None,
            total_usage: Mutex::new(TokenUsage::default()),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Token usage accumulated over every completion made through this brain.
    pub fn total_usage(&self) -> TokenUsage {
        *self
            .total_usage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send a system + user prompt and deserialize the reply into `T`.
    ///
    /// `model` overrides the provider's default model for this call. Transport
    /// failures surface as `TaskError::Model`; a reply that is not valid JSON
    /// of the expected shape surfaces as `TaskError::Schema`.
    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        model: Option<&str>,
        system: &str,
        user: &str,
    ) -> Result<T, TaskError> {
        let request = CompletionRequest {
            messages: vec![Message::system(system), Message::user(user)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: model.map(str::to_string),
            json_mode: true,
        };

        let response = self.provider.complete(request).await?;
        self.total_usage
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .accumulate(&response.usage);

        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Structured completion received"
        );

        let body = strip_code_fences(&response.message.content);
        serde_json::from_str(body).map_err(|e| {
            TaskError::schema(format!(
                "{} (reply began with: {:?})",
                e,
                body.chars().take(120).collect::<String>()
            ))
        })
    }
}

/// Strip a surrounding Markdown code fence (```json ... ```) from a model reply.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// A mock LLM provider for testing. Replies are returned in queue order.
pub struct MockLlmProvider {
    model: String,
    responses: Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that answers the next calls with the given text.
    pub fn with_response(text: &str) -> Self {
        let provider = Self::new();
        for _ in 0..20 {
            provider.queue_response(Self::text_response(text));
        }
        provider
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Ok(response));
    }

    /// Queue a JSON value as the next reply.
    pub fn queue_json(&self, value: serde_json::Value) {
        self.queue_response(Self::text_response(&value.to_string()));
    }

    /// Queue a provider failure for the next `complete` call.
    pub fn queue_error(&self, error: LlmError) {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Err(error));
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
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
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request);
        let mut responses = self
            .responses
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if responses.is_empty() {
            Err(LlmError::ApiRequest {
                message: "mock provider has no queued responses".to_string(),
            })
        } else {
            responses.remove(0)
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Queries {
        queries: Vec<String>,
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1]\n```\n"), "[1]");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_complete_json_parses_fenced_reply() {
        let mock = Arc::new(MockLlmProvider::new());
        mock.queue_response(MockLlmProvider::text_response(
            "```json\n{\"queries\": [\"rust async\", \"tokio\"]}\n```",
        ));
        let brain = Brain::new(mock.clone());

        let parsed: Queries = brain
            .complete_json(Some("planner"), "system", "user")
            .await
            .unwrap();
        assert_eq!(parsed.queries, vec!["rust async", "tokio"]);

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model.as_deref(), Some("planner"));
        assert!(requests[0].json_mode);
        assert_eq!(brain.total_usage().total(), 150);
    }

    #[tokio::test]
    async fn test_complete_json_shape_mismatch_is_schema_error() {
        let mock = Arc::new(MockLlmProvider::new());
        mock.queue_json(json!({"items": []}));
        let brain = Brain::new(mock);

        let err = brain
            .complete_json::<Queries>(None, "system", "user")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Schema { .. }));
    }

    #[tokio::test]
    async fn test_complete_json_provider_error_is_model_error() {
        let mock = Arc::new(MockLlmProvider::new());
        mock.queue_error(LlmError::Provider {
            status: 500,
            message: "boom".into(),
        });
        let brain = Brain::new(mock);

        let err = brain
            .complete_json::<Queries>(None, "system", "user")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::Model(LlmError::Provider { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_empty_queue_errors() {
        let mock = MockLlmProvider::new();
        assert!(mock.complete(CompletionRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_with_response_repeats() {
        let mock = MockLlmProvider::with_response("hello");
        let first = mock.complete(CompletionRequest::default()).await.unwrap();
        let second = mock.complete(CompletionRequest::default()).await.unwrap();
        assert_eq!(first.message.content, "hello");
        assert_eq!(second.message.content, "hello");
        assert_eq!(mock.remaining(), 18);
    }
}
