//! OpenAI-compatible chat-completions client (raw HTTP via reqwest)
//!
//! Works with any provider that accepts the `/chat/completions` tool-calling
//! format: OpenAI, DeepSeek, Groq, OpenRouter, a local Ollama gateway, etc.

use crate::llm::{
    ChatMessage, CompletionRequest, LlmClient, LlmConfig, LlmResponse, Role, ToolCallRequest,
};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const ENDPOINT_CHAT: &str = "/chat/completions";

pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

// ============================================================================
// WIRE TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    type_: &'static str,
    function: WireFunctionSpec<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    type_: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

fn function_type() -> String {
    "function".to_string()
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let tool_calls = (!message.tool_calls.is_empty()).then(|| {
            message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    type_: function_type(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect()
        });

        Self {
            role: role_name(message.role).to_string(),
            content: message.content.clone(),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

/// Arguments arrive as a JSON string; malformed or empty input becomes an
/// empty object so the tool layer can report the validation error.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "_raw": raw }))
}

// ============================================================================
// CLIENT IMPLEMENTATION
// ============================================================================

impl OpenAiCompatibleClient {
    /// Fails when the config carries no API key.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key()
            .context("LLM API key not configured")?
            .to_string();

        // Transport bound sits above the engine's own per-call timeout.
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs + 30))
            .build()
            .context("failed to build LLM HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest) -> WireRequest<'a> {
        WireRequest {
            model: &self.model,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tools: request
                .tools
                .iter()
                .map(|tool| WireTool {
                    type_: "function",
                    function: WireFunctionSpec {
                        name: &tool.name,
                        description: &tool.description,
                        parameters: &tool.parameters,
                    },
                })
                .collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    fn parse_response(response: WireResponse) -> anyhow::Result<LlmResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .context("no choices in LLM response")?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCallRequest {
                id: call.id,
                arguments: parse_arguments(&call.function.arguments),
                name: call.function.name,
            })
            .collect();

        Ok(LlmResponse {
            text: choice.message.content,
            tool_calls,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> anyhow::Result<LlmResponse> {
        let url = format!("{}{}", self.base_url, ENDPOINT_CHAT);
        debug!(model = %self.model, messages = request.messages.len(), "Calling chat completions");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.build_request(request))
            .send()
            .await
            .context("LLM request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "LLM API error {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            ));
        }

        let wire: WireResponse = response
            .json()
            .await
            .context("LLM returned malformed JSON")?;
        Self::parse_response(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolDefinition;

    #[test]
    fn test_requires_api_key() {
        assert!(OpenAiCompatibleClient::from_config(&LlmConfig::default()).is_err());
    }

    #[test]
    fn test_request_serialization() {
        let client = OpenAiCompatibleClient::from_config(&LlmConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        })
        .unwrap();

        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system("rules"),
                ChatMessage::assistant(
                    None,
                    vec![ToolCallRequest {
                        id: "call_1".to_string(),
                        name: "check_balance".to_string(),
                        arguments: serde_json::json!({}),
                    }],
                ),
                ChatMessage::tool_result("call_1", &serde_json::json!({"success": true})),
            ],
            tools: vec![ToolDefinition {
                name: "check_balance".to_string(),
                description: "balance".to_string(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            }],
        };

        let json = serde_json::to_value(client.build_request(&request)).unwrap();
        assert_eq!(json["messages"][1]["tool_calls"][0]["function"]["arguments"], "{}");
        assert_eq!(json["messages"][2]["role"], "tool");
        assert_eq!(json["messages"][2]["tool_call_id"], "call_1");
        assert_eq!(json["tools"][0]["type"], "function");
        assert!(json["messages"][0].get("tool_calls").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let wire: WireResponse = serde_json::from_str(
            r#"{"choices": [{"message": {"role": "assistant", "content": null,
                "tool_calls": [{"id": "c1", "type": "function",
                  "function": {"name": "get_current_price", "arguments": "{\"ticker\":\"AAPL\"}"}}]}}]}"#,
        )
        .unwrap();

        let response = OpenAiCompatibleClient::parse_response(wire).unwrap();
        assert!(response.text.is_none());
        assert_eq!(response.tool_calls[0].name, "get_current_price");
        assert_eq!(response.tool_calls[0].arguments["ticker"], "AAPL");
    }

    #[test]
    fn test_malformed_arguments_are_preserved() {
        assert_eq!(parse_arguments(""), serde_json::json!({}));
        assert_eq!(parse_arguments("{oops")["_raw"], "{oops");
    }
}
