//! Agent system.
//!
//! This module provides the core [`Agent`] struct: an LLM-backed participant with
//! identity, expertise, personality, optional tool access, and real-time event
//! observability. Agents are the unit every pattern executor drives — a pipeline
//! stage, a fork-join branch, a debater, a classifier, and a swarm voter are all
//! just an `Agent::send()` call gated by the LLM semaphore.
//!
//! # Core components
//!
//! - **Agent**: identity plus a wrapped [`LLMSession`]
//! - **Tool access**: via [`ToolRegistry`](crate::cloudllm::tool_protocol::ToolRegistry),
//!   single or multi-protocol
//! - **ThoughtChain**: optional persistent, hash-chained memory for findings/decisions
//! - **ContextStrategy**: pluggable strategy for context-window exhaustion
//! - **EventHandler**: optional callback for real-time observability
//!
//! # Example
//!
//! ```rust,no_run
//! use loomweave::Agent;
//! use loomweave::clients::http::HttpChatClient;
//! use std::sync::Arc;
//!
//! let agent = Agent::new(
//!     "analyst",
//!     "Technical Analyst",
//!     Arc::new(HttpChatClient::new("key".to_string(), "gpt-4o-mini".to_string())),
//! )
//! .with_expertise("Cloud Architecture")
//! .with_personality("Direct and analytical");
//! ```

use crate::cloudllm::client_wrapper::{ClientWrapper, Message, Role, TokenUsage};
use crate::cloudllm::context_strategy::{ContextStrategy, TrimStrategy};
use crate::cloudllm::event::{AgentEvent, EventHandler};
use crate::cloudllm::llm_session::LLMSession;
use crate::cloudllm::thought_chain::{Thought, ThoughtChain, ThoughtType};
use crate::cloudllm::tool_protocol::{ToolProtocol, ToolRegistry};
use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Internal representation of a parsed tool call extracted from an LLM response.
#[derive(Debug, Clone)]
struct ToolCall {
    name: String,
    parameters: serde_json::Value,
}

/// Response returned after asking an agent to generate content.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    /// Final message content produced across tool iterations.
    pub content: String,
    /// Token usage aggregated across all tool iterations, if the provider reports it.
    pub tokens_used: Option<TokenUsage>,
}

/// An LLM-powered participant with identity, optional tool access, and event
/// observability.
pub struct Agent {
    /// Stable identifier referenced by pattern executors and the spawn manager.
    pub id: String,
    /// Human-readable display name for logging.
    pub name: String,
    /// Free-form description of the agent's strengths, embedded into prompts.
    pub expertise: Option<String>,
    /// Persona hints that diversify the tone of generated responses.
    pub personality: Option<String>,
    /// Arbitrary metadata (e.g. department, region).
    pub metadata: HashMap<String, String>,
    /// Raw (un-augmented) system prompt this agent was configured with.
    /// Pattern executors read this to call
    /// [`generate`](Agent::generate)/[`generate_with_tokens`](Agent::generate_with_tokens)
    /// with exactly the prompt the registry supplied — those calls re-augment it
    /// internally with expertise/personality, so this is kept separate from the
    /// already-augmented copy living in `session`.
    pub base_system_prompt: String,

    session: LLMSession,
    tool_registry: Arc<RwLock<ToolRegistry>>,
    context_strategy: Box<dyn ContextStrategy>,
    thought_chain: Option<Arc<RwLock<ThoughtChain>>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Agent {
    /// Create a new agent. Defaults to a 128k token budget, an empty [`ToolRegistry`],
    /// and [`TrimStrategy`] for context management.
    pub fn new(id: impl Into<String>, name: impl Into<String>, client: Arc<dyn ClientWrapper>) -> Self {
        let session = LLMSession::new(client, String::new(), 128_000);
        Self {
            id: id.into(),
            name: name.into(),
            expertise: None,
            personality: None,
            metadata: HashMap::new(),
            base_system_prompt: String::new(),
            session,
            tool_registry: Arc::new(RwLock::new(ToolRegistry::empty())),
            context_strategy: Box::new(TrimStrategy::default()),
            thought_chain: None,
            event_handler: None,
        }
    }

    /// Attach a brief description of the agent's domain expertise.
    pub fn with_expertise(mut self, expertise: impl Into<String>) -> Self {
        self.expertise = Some(expertise.into());
        self
    }

    /// Attach a personality descriptor used to diversify prompts.
    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    /// Add arbitrary metadata to the agent definition.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Override the default token budget. Recreates the session with an empty history.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        let client = self.session.client().clone();
        self.session = LLMSession::new(client, String::new(), max_tokens);
        self
    }

    /// Grant the agent access to a registry of tools.
    pub fn with_tools(mut self, registry: ToolRegistry) -> Self {
        self.tool_registry = Arc::new(RwLock::new(registry));
        self
    }

    /// Share a mutable tool registry across multiple agents, so runtime protocol
    /// mutations are visible to every agent holding the same `Arc`.
    pub fn with_shared_tools(mut self, registry: Arc<RwLock<ToolRegistry>>) -> Self {
        self.tool_registry = registry;
        self
    }

    /// Set the context-window exhaustion strategy (builder pattern).
    pub fn context_collapse_strategy(mut self, strategy: Box<dyn ContextStrategy>) -> Self {
        self.context_strategy = strategy;
        self
    }

    /// Replace the context strategy at runtime.
    pub fn set_context_collapse_strategy(&mut self, strategy: Box<dyn ContextStrategy>) {
        self.context_strategy = strategy;
    }

    /// Attach a [`ThoughtChain`] for persistent, hash-chained memory (builder pattern).
    pub fn with_thought_chain(mut self, chain: Arc<RwLock<ThoughtChain>>) -> Self {
        self.thought_chain = Some(chain);
        self
    }

    /// Attach an [`EventHandler`] (builder pattern). When this agent is added to an
    /// orchestrator with its own handler, the orchestrator's handler takes over via
    /// [`set_event_handler`](Agent::set_event_handler).
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Set or replace the event handler at runtime.
    pub fn set_event_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.event_handler = Some(handler);
    }

    async fn emit(&self, event: AgentEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_agent_event(&event).await;
        }
    }

    fn emit_sync(&self, event: AgentEvent) {
        if let Some(handler) = &self.event_handler {
            let handler = Arc::clone(handler);
            tokio::spawn(async move {
                handler.on_agent_event(&event).await;
            });
        }
    }

    // ---- Runtime tool mutation ----

    /// Add a new tool protocol at runtime, discovering its tools immediately.
    pub async fn add_protocol(
        &self,
        name: &str,
        protocol: Arc<dyn ToolProtocol>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut registry = self.tool_registry.write().await;
        let result = registry.add_protocol(name, protocol).await;
        if result.is_ok() {
            self.emit(AgentEvent::ProtocolAdded {
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                protocol_name: name.to_string(),
            })
            .await;
        }
        result
    }

    /// Remove a tool protocol at runtime. No-op if the name is not registered.
    pub async fn remove_protocol(&self, name: &str) {
        let mut registry = self.tool_registry.write().await;
        registry.remove_protocol(name);
        self.emit(AgentEvent::ProtocolRemoved {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            protocol_name: name.to_string(),
        })
        .await;
    }

    /// List all tool names currently available to this agent.
    pub async fn list_tools(&self) -> Vec<String> {
        let registry = self.tool_registry.read().await;
        registry.list_tools().iter().map(|m| m.name.clone()).collect()
    }

    // ---- ThoughtChain convenience ----

    /// Append a thought to this agent's [`ThoughtChain`]. Silent no-op if none attached.
    pub async fn commit(&self, entry_type: ThoughtType, content: impl Into<String>) -> io::Result<()> {
        if let Some(chain) = &self.thought_chain {
            let thought_type = entry_type.clone();
            let mut chain = chain.write().await;
            chain.append(&self.id, entry_type, &content.into())?;
            self.emit(AgentEvent::ThoughtCommitted {
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                thought_type,
            })
            .await;
        }
        Ok(())
    }

    /// Snapshot of all thoughts in this agent's chain, or `None` if none attached.
    pub async fn thought_entries(&self) -> Option<Vec<Thought>> {
        if let Some(chain) = &self.thought_chain {
            let chain = chain.read().await;
            Some(chain.thoughts().to_vec())
        } else {
            None
        }
    }

    // ---- Resume constructors ----

    /// Resume an agent from a specific thought in an existing chain, bootstrapping
    /// the new session with the resolved context prompt.
    pub fn resume_from_chain(
        id: impl Into<String>,
        name: impl Into<String>,
        client: Arc<dyn ClientWrapper>,
        max_tokens: usize,
        chain: Arc<RwLock<ThoughtChain>>,
        thought_index: u64,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let id = id.into();
        let name = name.into();
        let mut session = LLMSession::new(client, String::new(), max_tokens);

        let chain_guard = chain
            .try_read()
            .map_err(|_| Box::new(io::Error::other("ThoughtChain is locked")) as Box<dyn Error + Send + Sync>)?;
        let bootstrap = chain_guard.to_bootstrap_prompt(thought_index);
        drop(chain_guard);

        if !bootstrap.is_empty() {
            session.inject_message(Role::System, bootstrap);
        }

        Ok(Self {
            id,
            name,
            expertise: None,
            personality: None,
            metadata: HashMap::new(),
            base_system_prompt: String::new(),
            session,
            tool_registry: Arc::new(RwLock::new(ToolRegistry::empty())),
            context_strategy: Box::new(TrimStrategy::default()),
            thought_chain: Some(chain),
            event_handler: None,
        })
    }

    /// Resume an agent from the latest thought in an existing chain.
    pub fn resume_from_latest(
        id: impl Into<String>,
        name: impl Into<String>,
        client: Arc<dyn ClientWrapper>,
        max_tokens: usize,
        chain: Arc<RwLock<ThoughtChain>>,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let last_index = {
            let guard = chain
                .try_read()
                .map_err(|_| Box::new(io::Error::other("ThoughtChain is locked")) as Box<dyn Error + Send + Sync>)?;
            guard.thoughts().last().map(|t| t.index).unwrap_or(0)
        };
        Self::resume_from_chain(id, name, client, max_tokens, chain, last_index)
    }

    // ---- fork() — replaces Clone for parallel execution ----

    /// Create a lightweight copy for parallel pattern-executor branches.
    ///
    /// The fork shares tool registry and thought chain via `Arc`, but has a fresh,
    /// empty session backed by the same client. `Agent` is intentionally not
    /// `Clone` — forking is a deliberate operation, not an implicit one.
    pub fn fork(&self) -> Self {
        let client = self.session.client().clone();
        let max_tokens = self.session.get_max_tokens();
        self.emit_sync(AgentEvent::Forked {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
        });
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            expertise: self.expertise.clone(),
            personality: self.personality.clone(),
            metadata: self.metadata.clone(),
            base_system_prompt: self.base_system_prompt.clone(),
            session: LLMSession::new(client, String::new(), max_tokens),
            tool_registry: Arc::clone(&self.tool_registry),
            context_strategy: Box::new(TrimStrategy::default()),
            thought_chain: self.thought_chain.clone(),
            event_handler: self.event_handler.clone(),
        }
    }

    /// Like [`fork`](Agent::fork), but also copies the current system prompt and
    /// conversation history into the new session.
    pub fn fork_with_context(&self) -> Self {
        let client = self.session.client().clone();
        let max_tokens = self.session.get_max_tokens();
        let mut session = LLMSession::new(client, String::new(), max_tokens);

        session.set_system_prompt(self.session.system_prompt_text().to_string());
        for msg in self.session.get_conversation_history() {
            session.inject_message(msg.role.clone(), msg.content.to_string());
        }

        self.emit_sync(AgentEvent::ForkedWithContext {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
        });
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            expertise: self.expertise.clone(),
            personality: self.personality.clone(),
            metadata: self.metadata.clone(),
            base_system_prompt: self.base_system_prompt.clone(),
            session,
            tool_registry: Arc::clone(&self.tool_registry),
            context_strategy: Box::new(TrimStrategy::default()),
            thought_chain: self.thought_chain.clone(),
            event_handler: self.event_handler.clone(),
        }
    }

    // ---- Session-based methods used by pattern executors ----

    /// Set the agent's system prompt, augmented with expertise and personality.
    pub fn set_system_prompt(&mut self, base_prompt: &str) {
        self.base_system_prompt = base_prompt.to_string();
        let augmented = self.augment_system_prompt(base_prompt);
        self.session.set_system_prompt(augmented);
        self.emit_sync(AgentEvent::SystemPromptSet {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
        });
    }

    /// Inject a message into this agent's session history without calling the LLM.
    ///
    /// Used by debate/pipeline hub-routing (feeding another participant's turn into
    /// this agent's context) and by the message bus's auto-injection of pending
    /// direct/topic messages before the agent's next turn.
    pub fn receive_message(&mut self, role: Role, content: String) {
        self.session.inject_message(role, content);
        self.emit_sync(AgentEvent::MessageReceived {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
        });
    }

    /// Number of messages in this agent's session history (excluding system prompt).
    pub fn session_history_len(&self) -> usize {
        self.session.get_conversation_history().len()
    }

    /// Whether the context strategy considers this session due for compaction.
    pub fn should_compact(&self) -> bool {
        self.context_strategy.should_compact(&self.session)
    }

    /// Run the attached context strategy's compaction pass.
    pub async fn compact_context(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let thought_chain = self.thought_chain.clone();
        self.context_strategy
            .compact(&mut self.session, &thought_chain, &self.id)
            .await
    }

    /// Send a message using the agent's own session history.
    ///
    /// This is the primary method used by pattern executors. After the initial LLM
    /// call, the response is scanned for a `{"tool_call": {"name": ..., "parameters":
    /// {...}}}` JSON fragment; if found, the named tool is executed via the
    /// [`ToolRegistry`] and the result is fed back for up to 5 follow-up iterations.
    pub async fn send(&mut self, user_message: &str) -> Result<AgentResponse, Box<dyn Error + Send + Sync>> {
        let preview_len = 120.min(user_message.len());
        let preview_end = user_message
            .char_indices()
            .nth(preview_len)
            .map(|(i, _)| i)
            .unwrap_or(user_message.len());
        self.emit(AgentEvent::SendStarted {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            message_preview: user_message[..preview_end].to_string(),
        })
        .await;

        let mut message_with_tools = user_message.to_string();
        {
            let registry = self.tool_registry.read().await;
            let tools = registry.list_tools();
            if !tools.is_empty() {
                message_with_tools.push_str("\n\nYou have access to the following tools:\n");
                for tool_metadata in tools {
                    message_with_tools.push_str(&format!(
                        "- {}: {}\n",
                        tool_metadata.name, tool_metadata.description
                    ));
                    if !tool_metadata.parameters.is_empty() {
                        message_with_tools.push_str("  Parameters:\n");
                        for param in &tool_metadata.parameters {
                            message_with_tools.push_str(&format!(
                                "    - {} ({:?}): {}\n",
                                param.name,
                                param.param_type,
                                param.description.as_deref().unwrap_or("No description")
                            ));
                        }
                    }
                }
                message_with_tools.push_str(
                    "\nTo use a tool, respond with a JSON object in the following format:\n\
                     {\"tool_call\": {\"name\": \"tool_name\", \"parameters\": {...}}}\n\
                     After tool execution, I'll provide the result and you can continue.\n",
                );
            }
        }

        let max_tool_iterations = 5;
        let mut tool_iteration = 0;
        let mut total_input_tokens = 0;
        let mut total_output_tokens = 0;
        let mut total_tokens = 0;

        self.emit(AgentEvent::LLMCallStarted {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            iteration: 1,
        })
        .await;

        let response = self
            .session
            .send_message(Role::User, message_with_tools)
            .await?;

        if let Some(usage) = self.session.client().get_last_usage().await {
            total_input_tokens += usage.input_tokens;
            total_output_tokens += usage.output_tokens;
            total_tokens += usage.total_tokens;
        }

        let first_response_length = response.content.len();
        self.emit(AgentEvent::LLMCallCompleted {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            iteration: 1,
            tokens_used: usage_if_any(total_input_tokens, total_output_tokens, total_tokens),
            response_length: first_response_length,
        })
        .await;

        let mut current_response = response.content.to_string();

        loop {
            let tool_call = self.parse_tool_call(&current_response);
            let Some(tool_call) = tool_call else { break };

            if tool_iteration >= max_tool_iterations {
                self.emit(AgentEvent::ToolMaxIterationsReached {
                    agent_id: self.id.clone(),
                    agent_name: self.name.clone(),
                })
                .await;
                current_response = format!(
                    "{}\n\n[Warning: Maximum tool iterations reached]",
                    current_response
                );
                break;
            }
            tool_iteration += 1;

            let tool_params_snapshot = tool_call.parameters.clone();
            let tool_name = tool_call.name.clone();

            self.emit(AgentEvent::ToolCallDetected {
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                tool_name: tool_name.clone(),
                parameters: tool_params_snapshot.clone(),
                iteration: tool_iteration,
            })
            .await;

            let tool_result = {
                let registry = self.tool_registry.read().await;
                registry.execute_tool(&tool_call.name, tool_call.parameters).await
            };

            let (tool_result_message, tool_success, tool_error) = match &tool_result {
                Ok(result) if result.success => (
                    format!(
                        "Tool '{}' executed successfully. Result: {}",
                        tool_name,
                        serde_json::to_string_pretty(&result.output)
                            .unwrap_or_else(|_| format!("{:?}", result.output))
                    ),
                    true,
                    None,
                ),
                Ok(result) => {
                    let err = result.error.clone().unwrap_or_else(|| "Unknown error".to_string());
                    (format!("Tool '{}' failed. Error: {}", tool_name, err), false, Some(err))
                }
                Err(e) => (format!("Tool execution error: {}", e), false, Some(e.to_string())),
            };

            self.emit(AgentEvent::ToolExecutionCompleted {
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                tool_name: tool_name.clone(),
                parameters: tool_params_snapshot,
                success: tool_success,
                error: tool_error,
                iteration: tool_iteration,
            })
            .await;

            let next_iteration = tool_iteration + 1;
            self.emit(AgentEvent::LLMCallStarted {
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                iteration: next_iteration,
            })
            .await;

            let follow_up = self
                .session
                .send_message(Role::User, tool_result_message)
                .await?;

            if let Some(usage) = self.session.client().get_last_usage().await {
                total_input_tokens += usage.input_tokens;
                total_output_tokens += usage.output_tokens;
                total_tokens += usage.total_tokens;
            }

            let follow_up_len = follow_up.content.len();
            self.emit(AgentEvent::LLMCallCompleted {
                agent_id: self.id.clone(),
                agent_name: self.name.clone(),
                iteration: next_iteration,
                tokens_used: usage_if_any(total_input_tokens, total_output_tokens, total_tokens),
                response_length: follow_up_len,
            })
            .await;

            current_response = follow_up.content.to_string();
        }

        let tokens_used = usage_if_any(total_input_tokens, total_output_tokens, total_tokens);
        let final_response_length = current_response.len();
        self.emit(AgentEvent::SendCompleted {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            tokens_used: tokens_used.clone(),
            tool_calls_made: tool_iteration,
            response_length: final_response_length,
        })
        .await;

        Ok(AgentResponse {
            content: current_response,
            tokens_used,
        })
    }

    /// Borrow the underlying [`ClientWrapper`] from the session.
    pub fn client(&self) -> &Arc<dyn ClientWrapper> {
        self.session.client()
    }

    fn augment_system_prompt(&self, base_prompt: &str) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!("You are {}.\n", self.name));
        if let Some(expertise) = &self.expertise {
            prompt.push_str(&format!("Your expertise: {}\n", expertise));
        }
        if let Some(personality) = &self.personality {
            prompt.push_str(&format!("Your approach: {}\n", personality));
        }
        prompt.push('\n');
        prompt.push_str(base_prompt);
        prompt
    }

    /// Send a one-shot message with an explicit system prompt and history, bypassing
    /// the agent's own session state entirely. Used by pattern executors (pipeline,
    /// debate) that need precise control over exactly what context a given turn sees,
    /// rather than relying on the agent's accumulated session.
    pub async fn generate_with_tokens(
        &self,
        system_prompt: &str,
        user_message: &str,
        conversation_history: &[Message],
    ) -> Result<AgentResponse, Box<dyn Error + Send + Sync>> {
        let preview_len = 120.min(user_message.len());
        let preview_end = user_message
            .char_indices()
            .nth(preview_len)
            .map(|(i, _)| i)
            .unwrap_or(user_message.len());
        self.emit(AgentEvent::SendStarted {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            message_preview: user_message[..preview_end].to_string(),
        })
        .await;

        let augmented_system = self.augment_system_prompt(system_prompt);
        let mut messages = vec![Message {
            role: Role::System,
            content: Arc::from(augmented_system.as_str()),
            tool_calls: Vec::new(),
        }];
        messages.extend(conversation_history.iter().cloned());
        messages.push(Message {
            role: Role::User,
            content: Arc::from(user_message),
            tool_calls: Vec::new(),
        });

        self.emit(AgentEvent::LLMCallStarted {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            iteration: 1,
        })
        .await;

        let response = self.session.client().send_message(&messages, None).await?;
        let usage = self.session.client().get_last_usage().await;
        let response_length = response.content.len();

        self.emit(AgentEvent::LLMCallCompleted {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            iteration: 1,
            tokens_used: usage.clone(),
            response_length,
        })
        .await;
        self.emit(AgentEvent::SendCompleted {
            agent_id: self.id.clone(),
            agent_name: self.name.clone(),
            tokens_used: usage.clone(),
            tool_calls_made: 0,
            response_length,
        })
        .await;

        Ok(AgentResponse {
            content: response.content.to_string(),
            tokens_used: usage,
        })
    }

    /// Convenience wrapper around [`generate_with_tokens`](Agent::generate_with_tokens)
    /// that discards token usage and returns only the response text.
    pub async fn generate(
        &self,
        system_prompt: &str,
        user_message: &str,
        conversation_history: &[Message],
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let response = self
            .generate_with_tokens(system_prompt, user_message, conversation_history)
            .await?;
        Ok(response.content)
    }

    /// Parse a `{"tool_call": {"name": ..., "parameters": {...}}}` fragment from an
    /// LLM response via brace-counting, tolerating surrounding prose. Only the first
    /// tool call in the response is extracted.
    fn parse_tool_call(&self, response: &str) -> Option<ToolCall> {
        let start_idx = response.find("{\"tool_call\"")?;
        let mut brace_count = 0;
        let mut end_idx = start_idx;
        let chars: Vec<char> = response.chars().collect();

        for (i, ch) in chars.iter().enumerate().skip(start_idx) {
            if *ch == '{' {
                brace_count += 1;
            } else if *ch == '}' {
                brace_count -= 1;
                if brace_count == 0 {
                    end_idx = i + 1;
                    break;
                }
            }
        }

        if end_idx <= start_idx {
            return None;
        }
        let json_str = &response[start_idx..end_idx];
        let parsed: serde_json::Value = serde_json::from_str(json_str).ok()?;
        let tool_call_obj = parsed.get("tool_call")?;
        let name = tool_call_obj.get("name")?.as_str()?;
        let parameters = tool_call_obj.get("parameters")?;
        Some(ToolCall {
            name: name.to_string(),
            parameters: parameters.clone(),
        })
    }
}

fn usage_if_any(input_tokens: usize, output_tokens: usize, total_tokens: usize) -> Option<TokenUsage> {
    if total_tokens > 0 {
        Some(TokenUsage {
            input_tokens,
            output_tokens,
            total_tokens,
        })
    } else {
        None
    }
}
