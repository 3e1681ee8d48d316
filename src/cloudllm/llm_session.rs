//! The `llm_session` module encapsulates a conversational session with a Language Learning Model (LLM).
//! It provides the foundational tools necessary for real-time, back-and-forth interactions with the LLM,
//! ensuring that both the user's queries and the LLM's responses are managed and tracked efficiently within
//! specified token limits to comply with model constraints.
//!
//! At its core is the [`LLMSession`] struct, responsible for maintaining a running dialogue history
//! while adhering to the token limitations of the LLM. Unlike earlier iterations of this module,
//! `LLMSession` is not generic over a concrete client type: it holds an `Arc<dyn ClientWrapper>`,
//! which lets a single session type host any provider implementation and lets callers (like
//! [`Agent`](crate::cloudllm::agent::Agent) and the pattern executors) store sessions for
//! heterogeneous agents in one collection without a type parameter threading through the whole
//! orchestration stack.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use cloudllm::client_wrapper::{ClientWrapper, Role};
//! use cloudllm::llm_session::LLMSession;
//! use std::sync::Arc;
//!
//! # async fn go(client: Arc<dyn ClientWrapper>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = LLMSession::new(client, "You are an AI assistant.".to_string(), 8_000);
//! let response = session.send_message(Role::User, "Hello, World!".to_string()).await?;
//! println!("Assistant: {}", response.content);
//! # Ok(())
//! # }
//! ```
//!
//! The session's history grows with each interaction but remains within the token constraints of the
//! LLM: `send_message` trims the oldest messages first whenever the running estimate exceeds
//! `max_tokens`. Token counting is approximate (one token per four characters) rather than a true
//! tokenizer — adequate for budget-trimming decisions, not for billing.

use std::sync::Arc;

use crate::cloudllm::client_wrapper::{ClientWrapper, Message, Role};

/// A conversational session with an LLM, independent of any one provider.
///
/// `LLMSession` owns the system prompt, the rolling conversation history, and the
/// running token estimate; it delegates the actual network call to whatever
/// [`ClientWrapper`] it was constructed with.
pub struct LLMSession {
    client: Arc<dyn ClientWrapper>,
    system_prompt: Message,
    conversation_history: Vec<Message>,
    max_tokens: usize,
    token_count: usize,
}

impl LLMSession {
    /// Create a new session with the given client, system prompt, and token budget.
    pub fn new(client: Arc<dyn ClientWrapper>, system_prompt: String, max_tokens: usize) -> Self {
        let system_prompt_message = Message {
            role: Role::System,
            content: Arc::from(system_prompt.as_str()),
            tool_calls: Vec::new(),
        };
        let system_prompt_tokens = count_message_tokens(&system_prompt_message);
        LLMSession {
            client,
            system_prompt: system_prompt_message,
            conversation_history: Vec::new(),
            max_tokens,
            token_count: system_prompt_tokens,
        }
    }

    /// Shared handle to the underlying client, e.g. to read `get_last_usage()`
    /// after a call, or to construct a sibling session with the same provider.
    pub fn client(&self) -> &Arc<dyn ClientWrapper> {
        &self.client
    }

    /// The token budget this session was configured with.
    pub fn get_max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Approximate current token usage across system prompt + history.
    pub fn estimated_history_tokens(&self) -> usize {
        self.token_count
    }

    /// Current system prompt text.
    pub fn system_prompt_text(&self) -> &str {
        &self.system_prompt.content
    }

    /// Replace the system prompt, adjusting the running token estimate.
    pub fn set_system_prompt(&mut self, prompt: String) {
        let old_tokens = count_message_tokens(&self.system_prompt);
        self.system_prompt = Message {
            role: Role::System,
            content: Arc::from(prompt.as_str()),
            tool_calls: Vec::new(),
        };
        let new_tokens = count_message_tokens(&self.system_prompt);
        self.token_count = self.token_count - old_tokens + new_tokens;
    }

    /// Read-only view of the conversation history, excluding the system prompt.
    pub fn get_conversation_history(&self) -> &[Message] {
        &self.conversation_history
    }

    /// Append a message to history without calling the LLM.
    ///
    /// Used for hub-routed orchestration (feeding another agent's turn into this
    /// session) and for bus auto-injection of direct/topic messages.
    pub fn inject_message(&mut self, role: Role, content: String) {
        let message = Message {
            role,
            content: Arc::from(content.as_str()),
            tool_calls: Vec::new(),
        };
        self.token_count += count_message_tokens(&message);
        self.conversation_history.push(message);
        self.trim_conversation_history();
    }

    /// Drop all history and reset the token estimate to the system prompt alone.
    pub fn clear_history(&mut self) {
        self.conversation_history.clear();
        self.token_count = count_message_tokens(&self.system_prompt);
    }

    /// Send a message to the LLM and append both the prompt and response to history.
    ///
    /// Trims the oldest messages (never the system prompt) before and after the
    /// call so the running estimate stays within `max_tokens`.
    pub async fn send_message(
        &mut self,
        role: Role,
        content: String,
    ) -> Result<Message, Box<dyn std::error::Error + Send + Sync>> {
        let message = Message {
            role,
            content: Arc::from(content.as_str()),
            tool_calls: Vec::new(),
        };
        self.token_count += count_message_tokens(&message);
        self.conversation_history.push(message);
        self.trim_conversation_history();

        let mut outgoing = Vec::with_capacity(self.conversation_history.len() + 1);
        outgoing.push(self.system_prompt.clone());
        outgoing.extend(self.conversation_history.iter().cloned());

        let response = self
            .client
            .send_message(&outgoing, None)
            .await
            .map_err(|e| e.to_string())?;

        self.token_count += count_message_tokens(&response);
        self.conversation_history.push(response.clone());
        self.trim_conversation_history();

        Ok(response)
    }

    fn trim_conversation_history(&mut self) {
        while self.token_count > self.max_tokens && !self.conversation_history.is_empty() {
            let removed = self.conversation_history.remove(0);
            self.token_count -= count_message_tokens(&removed);
        }
    }
}

fn count_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

fn count_message_tokens(message: &Message) -> usize {
    1 + count_tokens(&message.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::client_wrapper::ToolDefinition;
    use async_trait::async_trait;

    struct EchoClient;

    #[async_trait]
    impl ClientWrapper for EchoClient {
        async fn send_message(
            &self,
            messages: &[Message],
            _tools: Option<Vec<ToolDefinition>>,
        ) -> Result<Message, Box<dyn std::error::Error>> {
            let last = messages.last().map(|m| m.content.to_string()).unwrap_or_default();
            Ok(Message {
                role: Role::Assistant,
                content: Arc::from(format!("echo:{}", last).as_str()),
                tool_calls: Vec::new(),
            })
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn send_message_appends_prompt_and_response() {
        let mut session = LLMSession::new(Arc::new(EchoClient), "sys".to_string(), 10_000);
        let reply = session
            .send_message(Role::User, "hi".to_string())
            .await
            .unwrap();
        assert_eq!(&*reply.content, "echo:hi");
        assert_eq!(session.get_conversation_history().len(), 2);
    }

    #[test]
    fn trims_oldest_messages_first() {
        let mut session = LLMSession::new(Arc::new(EchoClient), String::new(), 5);
        for i in 0..20 {
            session.inject_message(Role::User, format!("message number {}", i));
        }
        assert!(session.estimated_history_tokens() <= 5 + 4);
        assert!(session.get_conversation_history().len() < 20);
    }

    #[test]
    fn clear_history_resets_to_system_prompt_only() {
        let mut session = LLMSession::new(Arc::new(EchoClient), "sys prompt".to_string(), 10_000);
        session.inject_message(Role::User, "hello".to_string());
        session.clear_history();
        assert!(session.get_conversation_history().is_empty());
    }
}
