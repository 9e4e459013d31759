//! Language-model collaborator
//!
//! The research loop only sees [`LanguageModel`]. Structured decoding is
//! prompt-based: the schema is appended to the system prompt and the JSON
//! object is pulled back out of the completion.

use crate::error::CollaboratorError;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub mod gemini;
pub mod openai;

pub use gemini::GeminiClient;
pub use openai::OpenAiCompatibleClient;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        temperature: Option<f32>,
    ) -> Result<String, CollaboratorError>;

    /// Generate a JSON object conforming to `schema`
    async fn generate_structured(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        schema: &Value,
        temperature: Option<f32>,
    ) -> Result<Value, CollaboratorError> {
        let system = structured_system_prompt(system_prompt, schema);
        let text = self.generate(prompt, Some(&system), temperature).await?;

        let value = extract_json_object(&text).ok_or_else(|| {
            CollaboratorError::malformed(self.name(), "completion contained no JSON object")
        })?;

        check_conforms(&value, schema).map_err(|msg| CollaboratorError::malformed(self.name(), msg))?;
        Ok(value)
    }
}

/// Object schema whose properties are all lists of strings
pub fn string_list_schema(fields: &[(&str, &str)]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|(name, description)| {
            (
                name.to_string(),
                json!({
                    "type": "array",
                    "description": description,
                    "items": { "type": "string" }
                }),
            )
        })
        .collect();

    json!({
        "type": "object",
        "properties": properties,
        "required": fields.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
    })
}

pub fn structured_system_prompt(system_prompt: Option<&str>, schema: &Value) -> String {
    let schema_text = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    let instructions = format!(
        "You MUST format your response as a single JSON object that follows this JSON schema:\n{}\nRespond with the JSON object only.",
        schema_text
    );

    match system_prompt {
        Some(base) if !base.trim().is_empty() => format!("{}\n\n{}", base, instructions),
        _ => instructions,
    }
}

/// Pull a JSON object out of model text: a ```json fence first, then the
/// outermost `{ ... }` span
pub fn extract_json_object(text: &str) -> Option<Value> {
    if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        if let Some(end) = after.find("```") {
            if let Ok(parsed) = serde_json::from_str::<Value>(after[..end].trim()) {
                if parsed.is_object() {
                    return Some(parsed);
                }
            }
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Pull a JSON list of strings out of model text (outermost `[ ... ]`)
pub fn extract_string_list(text: &str) -> Option<Vec<String>> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }

    let items: Vec<Value> = serde_json::from_str(&text[start..=end]).ok()?;
    Some(
        items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

/// Shallow check: required keys present, declared property types match
pub fn check_conforms(value: &Value, schema: &Value) -> Result<(), String> {
    let object = value
        .as_object()
        .ok_or_else(|| "expected a JSON object".to_string())?;

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required field '{}'", key));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (key, spec) in properties {
        let (Some(actual), Some(expected)) = (object.get(key), spec.get("type").and_then(Value::as_str)) else {
            continue;
        };

        let ok = match expected {
            "string" => actual.is_string(),
            "array" => actual.is_array(),
            "number" => actual.is_number(),
            "integer" => actual.is_i64() || actual.is_u64(),
            "boolean" => actual.is_boolean(),
            "object" => actual.is_object(),
            _ => true,
        };

        if !ok {
            return Err(format!("field '{}' is not of type {}", key, expected));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{AnswerMode, ScriptedModel};

    #[test]
    fn test_extract_from_fenced_block() {
        let text = "Here you go:\n```json\n{\"insights\": [\"a\"]}\n```\nThanks";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["insights"][0], "a");
    }

    #[test]
    fn test_extract_from_bare_braces() {
        let text = "Sure. {\"queries\": [\"TSLA margins\"]} hope that helps";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["queries"][0], "TSLA margins");
        assert!(extract_json_object("no json at all").is_none());
        assert!(extract_json_object("} backwards {").is_none());
    }

    #[test]
    fn test_extract_string_list() {
        let list = extract_string_list("Queries: [\"a\", \"b\", 3]").unwrap();
        assert_eq!(list, vec!["a", "b"]);
        assert!(extract_string_list("none").is_none());
    }

    #[test]
    fn test_schema_conformance() {
        let schema = string_list_schema(&[("insights", "Key insights"), ("follow_up_questions", "Gaps")]);
        assert!(check_conforms(&json!({"insights": [], "follow_up_questions": ["q"]}), &schema).is_ok());
        assert!(check_conforms(&json!({"insights": []}), &schema)
            .unwrap_err()
            .contains("follow_up_questions"));
        assert!(check_conforms(&json!({"insights": "x", "follow_up_questions": []}), &schema).is_err());
        assert!(check_conforms(&json!(["not", "object"]), &schema).is_err());
    }

    #[test]
    fn test_structured_prompt_keeps_base() {
        let schema = string_list_schema(&[("queries", "Expanded queries")]);
        let prompt = structured_system_prompt(Some("You are an analyst."), &schema);
        assert!(prompt.starts_with("You are an analyst."));
        assert!(prompt.contains("\"queries\""));

        let bare = structured_system_prompt(None, &schema);
        assert!(bare.starts_with("You MUST"));
    }

    #[tokio::test]
    async fn test_default_structured_decoding() {
        let model = ScriptedModel::new(AnswerMode::Fixed(
            "```json\n{\"queries\": [\"NVDA supply chain\"]}\n```".to_string(),
        ));
        let schema = string_list_schema(&[("queries", "Expanded queries")]);

        let value = LanguageModel::generate_structured(&model, "expand", None, &schema, None)
            .await
            .unwrap();
        assert_eq!(value["queries"][0], "NVDA supply chain");
    }

    #[tokio::test]
    async fn test_default_structured_decoding_rejects_prose() {
        let model = ScriptedModel::new(AnswerMode::Fixed("I cannot help with that.".to_string()));
        let schema = string_list_schema(&[("queries", "Expanded queries")]);

        let err = LanguageModel::generate_structured(&model, "expand", None, &schema, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::MalformedResponse { .. }));
    }
}
