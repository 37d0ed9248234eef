//! Gemini chat client — unary `generateContent` with function calling.
//!
//! Auth is via API key in query parameter. The full transcript is sent on
//! every turn; the endpoint itself is stateless.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use attune_core::error::{AttuneError, Result};
use attune_core::types::{ChatMessage, Role};

/// One decoded function call from a chat response.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

/// A completed chat turn: reply text and any tool calls, in response order.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    pub text: Option<String>,
    pub tool_calls: Vec<FunctionCall>,
}

pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

// --- Gemini request/response types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    contents: Vec<Value>,
    system_instruction: Value,
    tools: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCallPart>,
}

#[derive(Debug, Deserialize)]
struct FunctionCallPart {
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

impl ChatClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// Send the transcript and return the model's turn.
    pub async fn send(&self, history: &[ChatMessage], system_instruction: &str) -> Result<ChatTurn> {
        let body = ChatRequest {
            contents: format_contents(history),
            system_instruction: json!({ "parts": [{ "text": system_instruction }] }),
            tools: crate::tools::chat_declarations(),
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        debug!(model = %self.model, turns = history.len(), "sending chat request");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AttuneError::Provider(format!("chat request: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AttuneError::Provider(format!("chat API {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AttuneError::Provider(format!("chat response: {e}")))?;

        Ok(extract_turn(parsed))
    }
}

/// Map the transcript into Gemini `contents`. Gemini uses "model" for the
/// assistant role; system entries never travel as contents.
fn format_contents(history: &[ChatMessage]) -> Vec<Value> {
    history
        .iter()
        .filter_map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
                Role::System => return None,
            };
            Some(json!({ "role": role, "parts": [{ "text": m.text }] }))
        })
        .collect()
}

fn extract_turn(response: ChatResponse) -> ChatTurn {
    let mut turn = ChatTurn::default();
    let Some(content) = response.candidates.into_iter().next().and_then(|c| c.content) else {
        return turn;
    };
    for part in content.parts {
        if let Some(text) = part.text {
            match turn.text.as_mut() {
                Some(existing) => existing.push_str(&text),
                None => turn.text = Some(text),
            }
        }
        if let Some(fc) = part.function_call {
            turn.tool_calls.push(FunctionCall {
                name: fc.name,
                args: fc.args.unwrap_or_else(|| json!({})),
            });
        }
    }
    turn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_contents_roles() {
        let history = vec![
            ChatMessage::user("Hello"),
            ChatMessage::assistant("Hi, how are you arriving today?"),
        ];
        let contents = format_contents(&history);
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "Hello");
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn test_format_contents_skips_system_entries() {
        let mut system = ChatMessage::user("internal");
        system.role = Role::System;
        let contents = format_contents(&[system]);
        assert!(contents.is_empty());
    }

    #[test]
    fn test_extract_text_turn() {
        let json = r#"{"candidates":[{"content":{"parts":[{"text":"It sounds "},{"text":"heavy."}]}}]}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        let turn = extract_turn(response);
        assert_eq!(turn.text.as_deref(), Some("It sounds heavy."));
        assert!(turn.tool_calls.is_empty());
    }

    #[test]
    fn test_extract_function_call_turn() {
        let json = r#"{"candidates":[{"content":{"parts":[
            {"text":"I've noted that."},
            {"functionCall":{"name":"writesessionnote","args":{"json":{"summary":"s"}}}}
        ]}}]}"#;
        let response: ChatResponse = serde_json::from_str(json).unwrap();
        let turn = extract_turn(response);
        assert_eq!(turn.text.as_deref(), Some("I've noted that."));
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "writesessionnote");
        assert_eq!(turn.tool_calls[0].args["json"]["summary"], "s");
    }

    #[test]
    fn test_extract_empty_response() {
        let response: ChatResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        let turn = extract_turn(response);
        assert!(turn.text.is_none());
        assert!(turn.tool_calls.is_empty());
    }
}
