//! Shared primitives for provider-agnostic LLM clients.
//!
//! Pattern executors and agents interact with language models exclusively through the
//! [`ClientWrapper`] trait and the lightweight data types defined in this module. The
//! trait abstracts over concrete vendor implementations while the supporting structs
//! describe chat messages, streaming chunks, and token accounting. The one concrete
//! implementation shipped in this crate is [`crate::clients::http::HttpChatClient`],
//! which speaks an OpenAI-compatible chat completions API; additional providers can be
//! added by implementing the same trait.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use loomweave::{ClientWrapper, Message, Role};
//! use loomweave::clients::http::HttpChatClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = HttpChatClient::new(key, "gpt-4o-mini".to_string());
//!
//!     let response = client
//!         .send_message(
//!             &[Message {
//!                 role: Role::User,
//!                 content: Arc::from("Who are you?"),
//!                 tool_calls: vec![],
//!             }],
//!             None,
//!         )
//!         .await?;
//!
//!     println!("Assistant: {}", response.content);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A single tool call returned by the LLM in a native function-calling response.
///
/// Providers assign an opaque [`id`](NativeToolCall::id) to each call so that the
/// tool result can be correlated back in a follow-up `Role::Tool` message.
#[derive(Debug, Clone)]
pub struct NativeToolCall {
    /// Provider-assigned call ID, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the [`ToolDefinition`]s sent in the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the LLM for this call.
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema passed to the LLM along with a chat request.
///
/// Derived from [`ToolMetadata`](crate::cloudllm::tool_protocol::ToolMetadata) via
/// [`ToolMetadata::to_tool_definition`](crate::cloudllm::tool_protocol::ToolMetadata::to_tool_definition).
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Tool name as it will appear in the API `tools` array.
    pub name: String,
    /// Human-readable description surfaced to the LLM to aid tool selection.
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters_schema: serde_json::Value,
}

/// Represents the possible roles for a message.
#[derive(Debug, Clone)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message (frequently a mirror of a human end-user request,
    /// but also used by pattern executors to carry rendered prompt templates).
    User,
    /// An assistant authored message (model responses).
    Assistant,
    /// A tool-result message correlating with a prior assistant [`NativeToolCall`].
    Tool {
        /// The provider-assigned call id this result answers.
        call_id: String,
    },
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

/// A generic message exchanged with an LLM.
#[derive(Clone)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body. Stored as `Arc<str>` so histories can be cheaply cloned by
    /// [`crate::cloudllm::llm_session::LLMSession`] and downstream components.
    pub content: Arc<str>,
    /// Native tool calls requested by the assistant. Non-empty only on assistant
    /// messages returned by [`ClientWrapper::send_message`] when the provider
    /// responds with function-calling results.
    pub tool_calls: Vec<NativeToolCall>,
}

/// A chunk of content in a streaming response.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    /// The incremental content delta in this chunk. May be empty for chunks that
    /// carry only a `finish_reason`.
    pub content: String,
    /// Optional finish reason mirroring the provider-specific completion status.
    pub finish_reason: Option<String>,
}

/// Stream of message chunks compatible with `Send` executors.
pub type MessageChunkStream =
    Pin<Box<dyn Stream<Item = Result<MessageChunk, Box<dyn Error>>> + Send>>;

/// Future returned by [`ClientWrapper::send_message_stream`].
pub type MessageStreamFuture<'a> = Pin<
    Box<dyn std::future::Future<Output = Result<Option<MessageChunkStream>, Box<dyn Error>>> + 'a>,
>;

/// Trait-driven abstraction for a concrete LLM provider.
///
/// A [`ClientWrapper`] instance is responsible for translating requests into the
/// provider-specific wire format and returning provider responses in a uniform
/// shape. It deliberately excludes any conversation bookkeeping — that lives in
/// [`LLMSession`](crate::cloudllm::llm_session::LLMSession).
///
/// All implementations **must** be thread-safe (`Send + Sync`) so they can be shared
/// across async tasks and across the pattern executors running behind the LLM
/// semaphore concurrently.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a full request/response style chat completion.
    ///
    /// The `messages` slice must include any system priming messages the caller
    /// wishes to send. The `tools` parameter carries native [`ToolDefinition`]s
    /// forwarded to the provider's function-calling API, if any.
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error>>;

    /// Request a streaming response from the provider.
    ///
    /// The default implementation resolves to `Ok(None)`, meaning the provider
    /// (or this wrapper) does not support streaming; callers should fall back to
    /// [`send_message`](ClientWrapper::send_message).
    fn send_message_stream<'a>(
        &'a self,
        _messages: &'a [Message],
        _tools: Option<Vec<ToolDefinition>>,
    ) -> MessageStreamFuture<'a> {
        Box::pin(async { Ok(None) })
    }

    /// Identifier used to select the upstream model (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Usage from the most recent [`ClientWrapper::send_message`] call, if the
    /// provider reports it.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Shared slot where an implementation persists the last [`TokenUsage`].
    ///
    /// Providers that expose billing information should return
    /// `Some(&Mutex<Option<TokenUsage>>)` so [`get_last_usage`](ClientWrapper::get_last_usage)
    /// can surface it. Default: no usage tracking.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}
