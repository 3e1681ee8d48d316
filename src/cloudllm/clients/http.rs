//! A single, provider-agnostic [`ClientWrapper`] implementation speaking an
//! OpenAI-compatible chat completions HTTP API.
//!
//! This is the one concrete LLM client shipped with this crate. Any endpoint
//! compatible with the OpenAI `/v1/chat/completions` wire format — including
//! self-hosted inference gateways — can be reached by pointing [`HttpChatClient::new`]
//! (default base URL) or [`HttpChatClient::with_base_url`] at the right host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::cloudllm::client_wrapper::{
    ClientWrapper, Message, NativeToolCall, Role, ToolDefinition, TokenUsage,
};
use crate::cloudllm::http_client_pool::get_or_create_client;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Chat-completions client for any OpenAI wire-compatible endpoint.
pub struct HttpChatClient {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
    last_usage: Mutex<Option<TokenUsage>>,
}

impl HttpChatClient {
    /// Create a client against the default OpenAI endpoint.
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_string())
    }

    /// Create a client against a custom base URL (self-hosted gateways, proxies, etc.).
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        let http = get_or_create_client(&base_url);
        Self {
            api_key,
            model,
            base_url,
            http,
            last_usage: Mutex::new(None),
        }
    }
}

#[derive(Serialize)]
struct WireMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Deserialize)]
struct ChatToolCall {
    id: String,
    function: ChatToolCallFunction,
}

#[derive(Deserialize)]
struct ChatToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

fn role_to_wire(role: &Role) -> (String, Option<String>) {
    match role {
        Role::System => ("system".to_string(), None),
        Role::User => ("user".to_string(), None),
        Role::Assistant => ("assistant".to_string(), None),
        Role::Tool { call_id } => ("tool".to_string(), Some(call_id.clone())),
    }
}

#[async_trait]
impl ClientWrapper for HttpChatClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error>> {
        let wire_messages = messages
            .iter()
            .map(|m| {
                let (role, tool_call_id) = role_to_wire(&m.role);
                WireMessage {
                    role,
                    content: m.content.to_string(),
                    tool_call_id,
                }
            })
            .collect();

        let wire_tools = tools.map(|defs| {
            defs.into_iter()
                .map(|d| WireTool {
                    kind: "function",
                    function: WireFunction {
                        name: d.name,
                        description: d.description,
                        parameters: d.parameters_schema,
                    },
                })
                .collect()
        });

        let request = ChatRequest {
            model: &self.model,
            messages: wire_messages,
            tools: wire_tools,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let parsed: ChatResponse = response.json().await?;

        if let Some(usage) = &parsed.usage {
            let mut slot = self.last_usage.lock().await;
            *slot = Some(TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| -> Box<dyn Error> { "provider returned no choices".into() })?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| NativeToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: serde_json::from_str(&tc.function.arguments)
                    .unwrap_or_else(|_| json!({})),
            })
            .collect();

        Ok(Message {
            role: Role::Assistant,
            content: Arc::from(choice.message.content.unwrap_or_default().as_str()),
            tool_calls,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn get_last_usage(&self) -> Option<TokenUsage> {
        self.last_usage.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_base_url_points_at_openai() {
        let client = HttpChatClient::new("key".to_string(), "gpt-4o-mini".to_string());
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
        assert_eq!(client.model_name(), "gpt-4o-mini");
    }

    #[test]
    fn custom_base_url_is_honored() {
        let client = HttpChatClient::with_base_url(
            "key".to_string(),
            "local-model".to_string(),
            "http://localhost:8080/v1".to_string(),
        );
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
