//! Gemini API client
//!
//! Alternative model backend for the research loop.
//! Uses a long-lived reqwest::Client for connection pooling.

use super::LanguageModel;
use crate::config::LlmConfig;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

const COLLABORATOR: &str = "gemini";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    max_output_tokens: i32,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: config.gemini_api_key.clone(),
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
            max_output_tokens: config.max_tokens.min(i32::MAX as u32) as i32,
            temperature: config.temperature,
        })
    }

    fn build_request(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: Option<f32>,
    ) -> GeminiRequest {
        GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: temperature.unwrap_or(self.temperature),
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: self.max_output_tokens,
            },
            system_instruction: system_prompt.map(|text| SystemInstruction {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            }),
        }
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn name(&self) -> &'static str {
        COLLABORATOR
    }

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<String, CollaboratorError> {
        if self.api_key.is_empty() {
            return Err(CollaboratorError::NotConfigured("GEMINI_API_KEY"));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);
        let request = self.build_request(prompt, system_prompt, temperature);

        info!("Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                CollaboratorError::unavailable(COLLABORATOR, e.to_string())
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(CollaboratorError::unavailable(COLLABORATOR, error_text));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Gemini response: {}", e);
            CollaboratorError::malformed(COLLABORATOR, e.to_string())
        })?;

        let candidate = gemini_response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| CollaboratorError::malformed(COLLABORATOR, "no candidates returned"))?;

        let answer: String = candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if answer.trim().is_empty() {
            return Err(CollaboratorError::malformed(
                COLLABORATOR,
                format!(
                    "empty response (finish_reason: {})",
                    candidate.finish_reason.as_deref().unwrap_or("unknown")
                ),
            ));
        }

        info!(chars = answer.len(), "Gemini response received");

        Ok(answer)
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
    #[serde(default, alias = "finishReason")]
    finish_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let client = GeminiClient::new(&LlmConfig::default(), Duration::from_secs(5)).unwrap();
        let request = client.build_request("What is RSI?", Some("You are a financial analyst"), None);

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("What is RSI?"));
        assert!(json.contains("system_instruction"));

        let bare = client.build_request("What is RSI?", None, Some(0.7));
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("system_instruction").is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_typed_error() {
        let client = GeminiClient::new(&LlmConfig::default(), Duration::from_secs(5)).unwrap();
        let err = client.generate("hi", None, None).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::NotConfigured("GEMINI_API_KEY")));
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Rates "},{"text":"held."}]},"finishReason":"STOP"}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candidates[0].content.parts.len(), 2);
        assert_eq!(parsed.candidates[0].finish_reason.as_deref(), Some("STOP"));
    }
}
