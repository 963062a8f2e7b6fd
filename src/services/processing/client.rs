//! LLM client - HTTP client for OpenAI-compatible APIs.
//!
//! Talks to the local extraction model (Ollama, vLLM, or anything exposing
//! /chat/completions). Auth is optional since the endpoint is usually a
//! sidecar on localhost.

use reqwest::Client;
use std::time::Duration;

use super::models::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ResponseFormat,
};
use crate::config::ExtractionConfig;
use crate::utils::IngestError;

pub struct LlmClient {
    http_client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &ExtractionConfig) -> Result<Self, IngestError> {
        let http_client = Client::builder()
            .timeout(config.timeout() + Duration::from_secs(5))
            .build()
            .map_err(IngestError::from)?;

        Ok(Self {
            http_client,
            endpoint: config.llm_endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout(),
        })
    }

    /// Cheap readiness probe against the endpoint's model listing.
    pub async fn health_check(&self) -> Result<(), IngestError> {
        let url = format!("{}/models", self.endpoint);
        let response = self
            .http_client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(IngestError::from)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(IngestError::network(format!("LLM endpoint returned {}", response.status())))
        }
    }

    /// Call the chat completion API and return the assistant message text.
    pub async fn chat_completion(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, IngestError> {
        let chat_request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system_prompt.to_string() },
                ChatMessage { role: "user".to_string(), content: user_prompt.to_string() },
            ],
            max_tokens: Some(1024),
            temperature: Some(0.1),
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", self.endpoint);
        tracing::debug!(model = %self.model, "calling LLM endpoint");

        let mut request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&chat_request);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                IngestError::timeout(format!(
                    "LLM did not respond within {}s",
                    self.timeout.as_secs()
                ))
            } else {
                IngestError::network(format!("LLM request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(IngestError::rate_limit("LLM endpoint saturated", retry_after));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(IngestError::network(format!("LLM endpoint returned {status}: {body}")));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| IngestError::parsing(format!("LLM response malformed: {e}")))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| IngestError::parsing("empty response from LLM"))
    }
}
