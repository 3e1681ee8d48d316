//! Agent configuration lookup — the external "agent registry" boundary (spec §2,
//! §6: "agent registry (external) — load agent configs by id").
//!
//! Pattern executors never construct an [`Agent`](crate::cloudllm::agent::Agent)
//! from scratch; they resolve an `agent_id` through an [`AgentRegistry`] into an
//! [`AgentConfig`] and hand that to whatever factory builds the live `Agent` (a
//! concern this crate deliberately leaves to the hosting process, since it
//! requires a concrete [`ClientWrapper`](crate::cloudllm::client_wrapper::ClientWrapper)
//! and API credentials this core never holds).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cloudllm::error::OrchestrationError;

/// The minimal shape an [`AgentRegistry`] hands back for a given `agent_id` — just
/// enough for the hosting process to construct a live
/// [`Agent`](crate::cloudllm::agent::Agent): identity, its system prompt, which
/// model to target, and the names of tools it should be given access to. Not
/// specified in spec.md beyond "load agent configs by id"; filled in here because
/// every pattern executor needs to turn an `agent_id` into a chat participant.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Stable identifier matching a workflow spec's `agent_id`/`id` field.
    pub agent_id: String,
    /// Human-readable display name.
    pub display_name: String,
    /// Base system prompt for this agent, before any pattern-specific augmentation
    /// (role framing for debate/conditional/swarm, etc.).
    pub system_prompt: String,
    /// Model identifier to request from the configured `ClientWrapper`.
    pub model: String,
    /// Names of tools (resolved against a `ToolRegistry`) this agent may call.
    pub tool_names: Vec<String>,
}

impl AgentConfig {
    /// Convenience constructor for the common case of no tools configured.
    pub fn new(
        agent_id: impl Into<String>,
        display_name: impl Into<String>,
        system_prompt: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        AgentConfig {
            agent_id: agent_id.into(),
            display_name: display_name.into(),
            system_prompt: system_prompt.into(),
            model: model.into(),
            tool_names: Vec::new(),
        }
    }

    /// Attach tool names this agent may invoke.
    pub fn with_tools(mut self, tool_names: Vec<String>) -> Self {
        self.tool_names = tool_names;
        self
    }
}

/// External boundary: load [`AgentConfig`]s by id (spec §2, §6).
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Look up a single agent's configuration.
    async fn load(&self, agent_id: &str) -> Result<AgentConfig, OrchestrationError>;
}

/// An [`AgentRegistry`] backed by an in-memory map, suitable for tests and for
/// embedding this crate without a separate config-loading service.
#[derive(Default)]
pub struct InMemoryAgentRegistry {
    configs: RwLock<HashMap<String, AgentConfig>>,
}

impl InMemoryAgentRegistry {
    /// Construct an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryAgentRegistry {
            configs: RwLock::new(HashMap::new()),
        })
    }

    /// Register (or replace) an agent's configuration.
    pub async fn register(&self, config: AgentConfig) {
        self.configs.write().await.insert(config.agent_id.clone(), config);
    }
}

#[async_trait]
impl AgentRegistry for InMemoryAgentRegistry {
    async fn load(&self, agent_id: &str) -> Result<AgentConfig, OrchestrationError> {
        self.configs
            .read()
            .await
            .get(agent_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::InvalidSpec(format!("unknown agent_id: {}", agent_id)))
    }
}
