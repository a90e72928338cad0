//! OpenRouter chat completions client.
//!
//! Single-turn system+user requests against OpenRouter's OpenAI-compatible
//! endpoint. Transient failures are retried with backoff; usage numbers
//! come back on the [`Completion`] for cost accounting.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{is_retryable, is_retryable_status, RetryPolicy};
use crate::config::LlmConfig;
use crate::error::{Result, ToutError};
use crate::llm::{Completion, CompletionClient};

/// OpenRouter API client
pub struct OpenRouterClient {
    http: Client,
    base_url: String,
    api_key: String,
    temperature: f64,
    max_tokens: u32,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<i64>,
    #[serde(default)]
    completion_tokens: Option<i64>,
}

impl OpenRouterClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            ToutError::Validation("llm.api_key or OPENROUTER_API_KEY must be set".to_string())
        })?;

        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ToutError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry: RetryPolicy::new(config.max_retries, config.backoff_ms),
        })
    }

    async fn send_once(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion> {
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let started = Instant::now();

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Retryable statuses keep their reqwest error so the retry
            // loop can classify them; the rest surface the body.
            if is_retryable_status(status) {
                if let Err(e) = response.error_for_status_ref() {
                    return Err(e.into());
                }
            }
            let body = response.text().await.unwrap_or_default();
            warn!("OpenRouter API error: {} - {}", status, body);
            return Err(ToutError::Completion(format!(
                "OpenRouter API error {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        let latency_ms = started.elapsed().as_millis() as i64;
        let payload: ChatResponse = response.json().await.map_err(|e| {
            ToutError::Completion(format!("Failed to parse OpenRouter response: {}", e))
        })?;

        let choice = payload.choices.into_iter().next().ok_or_else(|| {
            ToutError::Completion("OpenRouter response has no choices".to_string())
        })?;
        let text = choice.message.content.unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ToutError::Completion(
                "OpenRouter returned empty content".to_string(),
            ));
        }

        debug!(model, latency_ms, "Completion received: {} chars", text.len());

        let (prompt_tokens, completion_tokens) = match payload.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => (None, None),
        };

        Ok(Completion {
            text,
            prompt_tokens,
            completion_tokens,
            finish_reason: choice.finish_reason,
            latency_ms,
        })
    }

    fn is_transient(err: &ToutError) -> bool {
        matches!(err, ToutError::Http(e) if is_retryable(e))
    }
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    async fn complete(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion> {
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.retry.max_attempts {
            attempts += 1;

            match self.send_once(model, system_prompt, user_prompt).await {
                Ok(completion) => return Ok(completion),
                Err(e) => {
                    if !Self::is_transient(&e) {
                        return Err(e);
                    }
                    warn!("Completion attempt {} for {} failed: {}", attempts, model, e);
                    last_error = Some(e);

                    if attempts < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.backoff(attempts - 1)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ToutError::Completion(format!("Completion for {} failed with unknown error", model))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = ChatRequest {
            model: "openai/gpt-4o",
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "rules",
                },
                ChatMessage {
                    role: "user",
                    content: "portfolio",
                },
            ],
            temperature: 0.2,
            max_tokens: 2000,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "openai/gpt-4o");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["max_tokens"], 2000);
    }

    #[test]
    fn test_response_with_usage() {
        let payload: ChatResponse = serde_json::from_str(
            r#"{
                "choices": [{
                    "message": {"role": "assistant", "content": "{\"action\": \"HOLD\"}"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 812, "completion_tokens": 44}
            }"#,
        )
        .unwrap();

        assert_eq!(payload.choices.len(), 1);
        let usage = payload.usage.unwrap();
        assert_eq!(usage.prompt_tokens, Some(812));
        assert_eq!(usage.completion_tokens, Some(44));
    }

    #[test]
    fn test_response_tolerates_missing_fields() {
        let payload: ChatResponse =
            serde_json::from_str(r#"{"choices": [{"message": {}}]}"#).unwrap();
        assert!(payload.choices[0].message.content.is_none());
        assert!(payload.usage.is_none());
    }
}
