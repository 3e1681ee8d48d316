//! Builtin tools (spec §4.6): `spawn_agent`, `send_message`, `publish` — the
//! three operations a hosted agent can call mid-turn to spawn children and
//! exchange messages through the bus.
//!
//! Implemented as one [`ToolProtocol`] rather than bespoke dispatch, grounded
//! in `tool_protocol.rs`'s existing multi-protocol `ToolRegistry` — each
//! [`Agent`](crate::cloudllm::agent::Agent) that should be able to spawn
//! children or message peers is given a [`BuiltinToolProtocol`] scoped to its
//! own identity (its `agent_id`, live `session_id`, and `workflow_id`/depth in
//! the spawn forest), so routing never has to thread "who is calling" through
//! the protocol's `execute` signature.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::cloudllm::bus::MessageBus;
use crate::cloudllm::error::OrchestrationError;
use crate::cloudllm::spawn::{SpawnManager, SpawnRequest};
use crate::cloudllm::tool_protocol::{ToolMetadata, ToolParameter, ToolParameterType, ToolProtocol, ToolResult};

pub const SPAWN_AGENT_TOOL: &str = "spawn_agent";
pub const SEND_MESSAGE_TOOL: &str = "send_message";
pub const PUBLISH_TOOL: &str = "publish";

/// Default buffer capacity for a child's direct queue and the calling agent's
/// own direct queue, when the hosting process hasn't configured one
/// explicitly. Mirrors [`crate::cloudllm::bus::DEFAULT_DIRECT_QUEUE_CAPACITY`].
const DEFAULT_QUEUE_CAPACITY: usize = crate::cloudllm::bus::DEFAULT_DIRECT_QUEUE_CAPACITY;

/// The identity a [`BuiltinToolProtocol`] acts on behalf of: which agent/session
/// is making the call, and where it sits in the spawn forest (needed to
/// enforce `MAX_SPAWN_DEPTH` on further spawns).
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub agent_id: String,
    pub session_id: String,
    pub workflow_id: Option<String>,
    pub depth: usize,
}

/// `ToolProtocol` implementation backing `spawn_agent`/`send_message`/`publish`
/// (spec §4.6), scoped to one calling agent's [`CallerContext`].
pub struct BuiltinToolProtocol {
    spawn_manager: Arc<SpawnManager>,
    bus: Arc<MessageBus>,
    caller: CallerContext,
}

impl BuiltinToolProtocol {
    pub fn new(spawn_manager: Arc<SpawnManager>, bus: Arc<MessageBus>, caller: CallerContext) -> Self {
        BuiltinToolProtocol { spawn_manager, bus, caller }
    }
}

#[derive(Debug, Deserialize)]
struct SpawnAgentArgs {
    agent_id: String,
    #[serde(default)]
    workflow_id: Option<String>,
    #[serde(default)]
    initial_message: Option<String>,
    #[serde(default)]
    auto_subscribe: Vec<String>,
    #[serde(default)]
    metadata: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SendMessageArgs {
    to_agent: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct PublishArgs {
    topic: String,
    body: String,
}

/// Render an [`OrchestrationError`] as the `ToolResult` failure shape spec §4.6
/// requires: `{code, message, suggestion, retryable}` surfaced as structured
/// data rather than thrown.
fn tool_error(err: OrchestrationError) -> ToolResult {
    let user_error = err.to_user_error();
    ToolResult::failure(user_error.message.clone())
        .with_metadata("code", json!(user_error.code))
        .with_metadata("suggestion", json!(user_error.suggestion))
        .with_metadata("retryable", json!(user_error.retryable))
}

#[async_trait]
impl ToolProtocol for BuiltinToolProtocol {
    async fn execute(&self, tool_name: &str, parameters: serde_json::Value) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        match tool_name {
            SPAWN_AGENT_TOOL => {
                let args: SpawnAgentArgs = match serde_json::from_value(parameters) {
                    Ok(args) => args,
                    Err(e) => return Ok(tool_error(OrchestrationError::InvalidSpec(format!("spawn_agent arguments: {}", e)))),
                };
                Ok(self.spawn_agent(args).await)
            }
            SEND_MESSAGE_TOOL => {
                let args: SendMessageArgs = match serde_json::from_value(parameters) {
                    Ok(args) => args,
                    Err(e) => return Ok(tool_error(OrchestrationError::InvalidSpec(format!("send_message arguments: {}", e)))),
                };
                Ok(self.send_message(args).await)
            }
            PUBLISH_TOOL => {
                let args: PublishArgs = match serde_json::from_value(parameters) {
                    Ok(args) => args,
                    Err(e) => return Ok(tool_error(OrchestrationError::InvalidSpec(format!("publish arguments: {}", e)))),
                };
                Ok(self.publish(args).await)
            }
            other => Ok(ToolResult::failure(format!("unknown builtin tool: {}", other))),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolMetadata>, Box<dyn Error + Send + Sync>> {
        Ok(vec![
            ToolMetadata::new(SPAWN_AGENT_TOOL, "Spawn a child agent session under the calling agent.")
                .with_parameter(ToolParameter::new("agent_id", ToolParameterType::String).required().with_description("Registry id of the agent to spawn."))
                .with_parameter(ToolParameter::new("workflow_id", ToolParameterType::String).with_description("Namespaces the child as workflow_id:agent_id."))
                .with_parameter(ToolParameter::new("initial_message", ToolParameterType::String).with_description("Dispatched to the child's queue immediately on spawn."))
                .with_parameter(ToolParameter::new("auto_subscribe", ToolParameterType::Array).with_items(ToolParameterType::String).with_description("Topics to auto-subscribe the child to."))
                .with_parameter(ToolParameter::new("metadata", ToolParameterType::Object).with_description("Opaque key/value metadata to attach to the spawn.")),
            ToolMetadata::new(SEND_MESSAGE_TOOL, "Send a directed message to another agent's live session.")
                .with_parameter(ToolParameter::new("to_agent", ToolParameterType::String).required())
                .with_parameter(ToolParameter::new("body", ToolParameterType::String).required()),
            ToolMetadata::new(PUBLISH_TOOL, "Publish a message to a topic; non-blocking, no error if there are zero subscribers.")
                .with_parameter(ToolParameter::new("topic", ToolParameterType::String).required())
                .with_parameter(ToolParameter::new("body", ToolParameterType::String).required()),
        ])
    }

    async fn get_tool_metadata(&self, tool_name: &str) -> Result<ToolMetadata, Box<dyn Error + Send + Sync>> {
        self.list_tools()
            .await?
            .into_iter()
            .find(|m| m.name == tool_name)
            .ok_or_else(|| format!("unknown builtin tool: {}", tool_name).into())
    }

    fn protocol_name(&self) -> &str {
        "builtin"
    }
}

impl BuiltinToolProtocol {
    async fn spawn_agent(&self, args: SpawnAgentArgs) -> ToolResult {
        if args.agent_id.is_empty() {
            return tool_error(OrchestrationError::InvalidSpec("agent_id must not be empty".into()));
        }
        let request = SpawnRequest {
            parent_session_id: self.caller.session_id.clone(),
            parent_agent_id: self.caller.agent_id.clone(),
            agent_id: args.agent_id,
            workflow_id: args.workflow_id.or_else(|| self.caller.workflow_id.clone()),
            initial_message: args.initial_message,
            auto_subscribe: args.auto_subscribe,
            metadata: args.metadata,
            parent_depth: self.caller.depth,
        };
        match self.spawn_manager.spawn_sub_agent(request).await {
            Ok(outcome) => ToolResult::success(json!({
                "sub_agent_id": outcome.sub_agent_id,
                "session_id": outcome.sub_session_id,
                "status": "spawned",
                "subscribed_topics": outcome.subscribed_topics,
            })),
            Err(err) => tool_error(err),
        }
    }

    async fn send_message(&self, args: SendMessageArgs) -> ToolResult {
        let Some(target_session) = self.spawn_manager.session_id_for_agent(&args.to_agent).await else {
            return tool_error(OrchestrationError::RecipientNotFound(args.to_agent));
        };
        match self
            .bus
            .send_message(&self.caller.agent_id, &target_session, args.body, DEFAULT_QUEUE_CAPACITY)
            .await
        {
            Ok(()) => ToolResult::success(json!({"delivered": true})),
            Err(err) => tool_error(err),
        }
    }

    async fn publish(&self, args: PublishArgs) -> ToolResult {
        self.bus.publish(&self.caller.agent_id, &args.topic, args.body).await;
        ToolResult::success(json!({"published": true}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::config::RuntimeConfig;
    use crate::cloudllm::session::InMemorySessionStore;

    fn protocol_for(agent_id: &str, session_id: &str) -> BuiltinToolProtocol {
        let bus = MessageBus::new();
        let spawn_manager = SpawnManager::new(RuntimeConfig::default(), bus.clone(), InMemorySessionStore::new(), None);
        BuiltinToolProtocol::new(
            spawn_manager,
            bus,
            CallerContext { agent_id: agent_id.to_string(), session_id: session_id.to_string(), workflow_id: None, depth: 0 },
        )
    }

    #[tokio::test]
    async fn spawn_agent_returns_structured_outcome() {
        let protocol = protocol_for("parent", "sess-parent");
        let result = protocol.execute(SPAWN_AGENT_TOOL, json!({"agent_id": "analyst"})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output["status"], "spawned");
        assert!(result.output["session_id"].is_string());
    }

    #[tokio::test]
    async fn spawn_agent_empty_agent_id_is_structured_failure() {
        let protocol = protocol_for("parent", "sess-parent");
        let result = protocol.execute(SPAWN_AGENT_TOOL, json!({"agent_id": ""})).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.metadata["code"], "invalid_spec");
        assert_eq!(result.metadata["retryable"], false);
    }

    #[tokio::test]
    async fn spawn_limit_reached_is_structured_not_thrown() {
        let bus = MessageBus::new();
        let mut config = RuntimeConfig::default();
        config.max_spawns_per_parent = 1;
        let spawn_manager = SpawnManager::new(config, bus.clone(), InMemorySessionStore::new(), None);
        let protocol = BuiltinToolProtocol::new(
            spawn_manager,
            bus,
            CallerContext { agent_id: "parent".into(), session_id: "sess-parent".into(), workflow_id: None, depth: 0 },
        );
        protocol.execute(SPAWN_AGENT_TOOL, json!({"agent_id": "a"})).await.unwrap();
        let result = protocol.execute(SPAWN_AGENT_TOOL, json!({"agent_id": "b"})).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.metadata["code"], "spawn_limit_reached");
    }

    #[tokio::test]
    async fn send_message_to_unknown_agent_is_recipient_not_found() {
        let protocol = protocol_for("parent", "sess-parent");
        let result = protocol
            .execute(SEND_MESSAGE_TOOL, json!({"to_agent": "ghost", "body": "hi"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.metadata["code"], "recipient_not_found");
    }

    #[tokio::test]
    async fn send_message_to_spawned_child_is_delivered() {
        let bus = MessageBus::new();
        let spawn_manager = SpawnManager::new(RuntimeConfig::default(), bus.clone(), InMemorySessionStore::new(), None);
        let protocol = BuiltinToolProtocol::new(
            spawn_manager.clone(),
            bus.clone(),
            CallerContext { agent_id: "parent".into(), session_id: "sess-parent".into(), workflow_id: None, depth: 0 },
        );
        let spawn_result = protocol.execute(SPAWN_AGENT_TOOL, json!({"agent_id": "analyst"})).await.unwrap();
        let child_session = spawn_result.output["session_id"].as_str().unwrap().to_string();

        let result = protocol
            .execute(SEND_MESSAGE_TOOL, json!({"to_agent": "analyst", "body": "start working"}))
            .await
            .unwrap();
        assert!(result.success);

        let drained = bus.drain_for_agent("analyst", &child_session).await;
        assert!(drained.iter().any(|d| d.message.body == "start working"));
    }

    #[tokio::test]
    async fn publish_with_zero_subscribers_still_succeeds() {
        let protocol = protocol_for("parent", "sess-parent");
        let result = protocol.execute(PUBLISH_TOOL, json!({"topic": "news", "body": "hello"})).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn list_tools_exposes_all_three_builtins() {
        let protocol = protocol_for("parent", "sess-parent");
        let tools = protocol.list_tools().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&SPAWN_AGENT_TOOL));
        assert!(names.contains(&SEND_MESSAGE_TOOL));
        assert!(names.contains(&PUBLISH_TOOL));
    }
}
