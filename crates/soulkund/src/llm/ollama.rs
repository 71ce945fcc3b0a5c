//! Ollama provider adapter.
//!
//! Talks to a local Ollama instance over its generate API with JSON output
//! forced. The wire format stays inside this module; the rest of the
//! pipeline only sees [`RawIntent`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use soulkun_shared::{BrainError, RawConfidence, ToolCall};

use super::{IntentRequest, LlmProvider, RawIntent};

pub struct OllamaProvider {
    endpoint: String,
    model: String,
}

/// The JSON document we instruct the model to emit.
#[derive(Debug, Deserialize)]
struct IntentPayload {
    #[serde(default)]
    tool_calls: Vec<PayloadCall>,
    #[serde(default)]
    reply: Option<String>,
    #[serde(default)]
    confidence: Option<RawConfidence>,
    #[serde(default)]
    rationale: Option<String>,
    #[serde(default)]
    compound: bool,
}

#[derive(Debug, Deserialize)]
struct PayloadCall {
    name: String,
    #[serde(default)]
    params: serde_json::Value,
}

impl OllamaProvider {
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    async fn generate(
        &self,
        prompt: String,
        format_json: bool,
        timeout: Duration,
    ) -> Result<String, BrainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrainError::Llm(format!("client build: {e}")))?;

        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        if format_json {
            body["format"] = serde_json::json!("json");
        }

        let response = client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrainError::Timeout(format!("ollama call exceeded {:?}", timeout))
                } else {
                    BrainError::Llm(format!("request failed: {e}"))
                }
            })?;

        if !response.status().is_success() {
            return Err(BrainError::Llm(format!(
                "ollama returned {}",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BrainError::Llm(format!("response decode: {e}")))?;

        Ok(json
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string())
    }
}

/// Parse the model's JSON document into a raw intent.
///
/// Malformed output is not an error here: it degrades to a text intent so
/// the engine can decide what to do with it (the engine treats missing
/// confidence as zero).
fn parse_intent(raw: &str) -> RawIntent {
    match serde_json::from_str::<IntentPayload>(raw) {
        Ok(payload) => RawIntent {
            tool_calls: payload
                .tool_calls
                .into_iter()
                .map(|c| ToolCall::new(&c.name, c.params))
                .collect(),
            text: payload.reply,
            confidence: payload.confidence,
            rationale: payload
                .rationale
                .unwrap_or_else(|| "no rationale supplied".to_string()),
            compound: payload.compound,
        },
        Err(e) => {
            warn!("Intent payload did not parse as JSON: {}", e);
            RawIntent {
                tool_calls: Vec::new(),
                text: Some(raw.trim().to_string()).filter(|t| !t.is_empty()),
                confidence: None,
                rationale: "unstructured provider output".to_string(),
                compound: false,
            }
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn infer_intent(&self, request: IntentRequest) -> Result<RawIntent, BrainError> {
        // Ollama has no native tool-use API; the catalog travels inside the
        // prompt and the model is held to a JSON contract instead.
        let instructions = super::intent_system_prompt(&request.tool_schemas);
        let prompt = format!(
            "{}\n\n{}\n\n{}",
            instructions, request.system, request.prompt
        );
        let raw = self.generate(prompt, true, request.timeout).await?;
        Ok(parse_intent(&raw))
    }

    async fn complete_text(
        &self,
        system: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, BrainError> {
        let combined = format!("{}\n\n{}", system, prompt);
        let text = self.generate(combined, false, timeout).await?;
        if text.trim().is_empty() {
            return Err(BrainError::Llm("empty completion".to_string()));
        }
        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intent_with_tool_calls() {
        let raw = r#"{
            "tool_calls": [{"name": "create_task", "params": {"title": "見積もり"}}],
            "confidence": {"intent": 0.9, "parameters": 0.8},
            "rationale": "task creation request"
        }"#;
        let intent = parse_intent(raw);
        assert_eq!(intent.tool_calls.len(), 1);
        assert_eq!(intent.tool_calls[0].name, "create_task");
        assert!(intent.confidence.is_some());
        assert!(!intent.compound);
    }

    #[test]
    fn test_parse_intent_text_reply() {
        let raw = r#"{"tool_calls": [], "reply": "おはようございます!", "confidence": 0.95}"#;
        let intent = parse_intent(raw);
        assert!(intent.tool_calls.is_empty());
        assert_eq!(intent.text.as_deref(), Some("おはようございます!"));
    }

    #[test]
    fn test_parse_intent_malformed_degrades_to_text() {
        let intent = parse_intent("すみません、JSONが書けませんでした");
        assert!(intent.tool_calls.is_empty());
        assert!(intent.text.is_some());
        assert!(intent.confidence.is_none());
    }

    #[test]
    fn test_parse_intent_compound_flag() {
        let raw = r#"{"tool_calls": [{"name": "create_goal", "params": {"title": "新規事業"}}],
                      "compound": true, "rationale": "multi-step"}"#;
        let intent = parse_intent(raw);
        assert!(intent.compound);
    }
}
