//! OpenAI-compatible LLM provider.
//!
//! Works with OpenRouter, OpenAI, and any local server (Ollama, vLLM,
//! LM Studio) that follows the chat completions API format.

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::providers::models::resolve_pricing;
use crate::types::{ChatResponse, Message, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Provider for any endpoint exposing `POST {base_url}/chat/completions`.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
    timeout_secs: u64,
    pricing: (f64, f64),
}

impl OpenAiCompatibleProvider {
    /// Create a new provider from configuration.
    ///
    /// Uses `config.api_key` when set, otherwise reads the environment
    /// variable named by `config.api_key_env`.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let is_local =
            config.base_url.contains("localhost") || config.base_url.contains("127.0.0.1");

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local provider; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible: env var '{}' not set",
                    config.api_key_env
                ),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a new provider with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("quarry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_secs: config.request_timeout_secs,
            pricing: resolve_pricing(
                &config.model,
                config.input_cost_per_million,
                config.output_cost_per_million,
            ),
        })
    }

    /// Convert internal messages to OpenAI JSON format.
    fn messages_to_json(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": msg.content })
            })
            .collect()
    }

    fn request_body(&self, messages: &[Message]) -> Value {
        json!({
            "model": self.model,
            "messages": Self::messages_to_json(messages),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }

    fn parse_response(body: &Value, model: &str) -> Result<ChatResponse, LlmError> {
        let choice =
            body.get("choices")
                .and_then(|c| c.get(0))
                .ok_or_else(|| LlmError::ResponseParse {
                    message: "No choices in response".to_string(),
                })?;

        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        let usage = body
            .get("usage")
            .map(|u| TokenUsage {
                input_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
                output_tokens: u
                    .get("completion_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0),
            })
            .unwrap_or_default();

        let model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string();

        Ok(ChatResponse {
            content,
            usage,
            model,
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed ({})", status);
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                // Try to extract "... try again in Xs" from the error message
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ")
                            .last()
                            .and_then(|s| s.trim_end_matches('s').parse::<u64>().ok())
                    })
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            status if status >= 500 => LlmError::Connection {
                message: format!("Server error ({}): {}", status, body),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn chat(&self, messages: &[Message]) -> Result<ChatResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(messages);

        debug!(url = %url, model = %self.model, messages = messages.len(), "Sending chat request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    LlmError::Connection {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::Connection {
            message: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {}", e),
            })?;

        Self::parse_response(&json, &self.model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn pricing(&self) -> (f64, f64) {
        self.pricing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LlmConfig {
        LlmConfig {
            model: "openai/gpt-4o-mini".to_string(),
            api_key_env: "QUARRY_TEST_OPENAI_KEY".to_string(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_messages_to_json_text() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("Hello"),
            Message::assistant("Hi there"),
        ];
        let json = OpenAiCompatibleProvider::messages_to_json(&messages);
        assert_eq!(json.len(), 3);
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[0]["content"], "You are helpful");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[2]["role"], "assistant");
    }

    #[test]
    fn test_parse_text_response() {
        let body = json!({
            "model": "openai/gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let response = OpenAiCompatibleProvider::parse_response(&body, "fallback").unwrap();
        assert_eq!(response.content, "Hello!");
        assert_eq!(response.usage.input_tokens, 12);
        assert_eq!(response.usage.output_tokens, 3);
        assert_eq!(response.model, "openai/gpt-4o-mini");
    }

    #[test]
    fn test_parse_response_missing_usage_defaults_to_zero() {
        let body = json!({"choices": [{"message": {"content": "ok"}}]});
        let response = OpenAiCompatibleProvider::parse_response(&body, "m").unwrap();
        assert_eq!(response.usage, TokenUsage::default());
        assert_eq!(response.model, "m");
    }

    #[test]
    fn test_parse_response_no_choices() {
        let body = json!({"choices": []});
        let result = OpenAiCompatibleProvider::parse_response(&body, "gpt-4o");
        assert!(matches!(result, Err(LlmError::ResponseParse { .. })));
    }

    #[test]
    fn test_parse_response_empty_content() {
        let body = json!({"choices": [{"message": {"content": "  "}}]});
        let result = OpenAiCompatibleProvider::parse_response(&body, "gpt-4o");
        assert!(matches!(result, Err(LlmError::EmptyResponse)));
    }

    #[test]
    fn test_http_error_mapping_401() {
        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::UNAUTHORIZED,
            "Unauthorized",
        );
        assert!(matches!(err, LlmError::AuthFailed { .. }));
    }

    #[test]
    fn test_http_error_mapping_429() {
        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error":{"message":"Rate limit exceeded, try again in 12s"}}"#,
        );
        match err {
            LlmError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 12),
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_http_error_mapping_500_is_retryable() {
        let err = OpenAiCompatibleProvider::map_http_error(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
        );
        assert!(err.is_retryable());
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_http_error_mapping_400_is_permanent() {
        let err =
            OpenAiCompatibleProvider::map_http_error(reqwest::StatusCode::BAD_REQUEST, "bad");
        assert!(matches!(err, LlmError::ApiRequest { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_new_with_explicit_key() {
        let mut config = test_config();
        config.api_key = Some("sk-test".into());
        let provider = OpenAiCompatibleProvider::new(&config).unwrap();
        assert_eq!(provider.model_name(), "openai/gpt-4o-mini");
        assert_eq!(provider.pricing(), (0.15, 0.60));
        assert_eq!(provider.base_url, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn test_new_missing_key() {
        // SAFETY: test-only env var manipulation
        unsafe { std::env::remove_var("QUARRY_TEST_OPENAI_KEY_MISSING") };
        let mut config = test_config();
        config.api_key_env = "QUARRY_TEST_OPENAI_KEY_MISSING".to_string();
        let result = OpenAiCompatibleProvider::new(&config);
        assert!(matches!(result, Err(LlmError::AuthFailed { .. })));
    }

    #[test]
    fn test_local_provider_no_api_key_required() {
        // SAFETY: test-only env var manipulation
        unsafe { std::env::remove_var("QUARRY_TEST_LOCAL_KEY_NONEXISTENT") };
        let mut config = test_config();
        config.api_key_env = "QUARRY_TEST_LOCAL_KEY_NONEXISTENT".to_string();
        config.base_url = "http://localhost:11434/v1/".to_string();
        let provider = OpenAiCompatibleProvider::new(&config).unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_pricing_override() {
        let mut config = test_config();
        config.api_key = Some("k".into());
        config.input_cost_per_million = Some(9.0);
        let provider = OpenAiCompatibleProvider::new(&config).unwrap();
        assert_eq!(provider.pricing(), (9.0, 0.60));
    }
}
