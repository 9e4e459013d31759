//! OpenAI-compatible chat client (vLLM, llama.cpp server, OpenAI)
//!
//! Uses a long-lived reqwest::Client for connection pooling.

use super::LanguageModel;
use crate::config::LlmConfig;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const COLLABORATOR: &str = "openai-compatible model";

pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &LlmConfig, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn build_request<'a>(
        &'a self,
        prompt: &'a str,
        system_prompt: Option<&'a str>,
        temperature: Option<f32>,
    ) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: temperature.unwrap_or(self.temperature),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleClient {
    fn name(&self) -> &'static str {
        COLLABORATOR
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<String, CollaboratorError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let request = self.build_request(prompt, system_prompt, temperature);

        debug!(model = %self.model, prompt_chars = prompt.len(), "Calling chat completions");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Chat completion request failed: {}", e);
                CollaboratorError::unavailable(COLLABORATOR, e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Chat completion error response: {}", error_text);
            return Err(CollaboratorError::unavailable(
                COLLABORATOR,
                format!("{} returned {}: {}", url, status, error_text),
            ));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            CollaboratorError::malformed(COLLABORATOR, format!("invalid completion body: {}", e))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CollaboratorError::malformed(COLLABORATOR, "no choices returned"))?;

        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(CollaboratorError::malformed(
                COLLABORATOR,
                format!(
                    "empty completion (finish_reason: {})",
                    choice.finish_reason.as_deref().unwrap_or("unknown")
                ),
            ));
        }

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let client = OpenAiCompatibleClient::new(&LlmConfig::default(), Duration::from_secs(5)).unwrap();
        let request = client.build_request("What moved AAPL?", Some("You are an analyst"), Some(0.5));

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "What moved AAPL?");
        assert_eq!(json["temperature"], 0.5);
        assert_eq!(json["max_tokens"], 8192);
    }

    #[test]
    fn test_request_without_system_prompt_uses_default_temperature() {
        let client = OpenAiCompatibleClient::new(&LlmConfig::default(), Duration::from_secs(5)).unwrap();
        let request = client.build_request("hi", None, None);
        assert_eq!(request.messages.len(), 1);
        assert!((request.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"Shares rose."},"finish_reason":"stop"}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Shares rose."));
    }
}
