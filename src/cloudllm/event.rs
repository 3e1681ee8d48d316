//! Agent and orchestration event system.
//!
//! Provides a callback-based observability layer for agents and the orchestration
//! engine. Implement [`EventHandler`] to receive real-time notifications about:
//!
//! - **LLM round-trips**: when each agent sends to and receives from its LLM
//! - **Tool operations**: tool call detection, execution outcomes, iteration limits
//! - **ThoughtChain**: thought commits to persistent memory
//! - **Tool mutations**: protocol additions and removals at runtime
//! - **Agent lifecycle**: fork, system prompt changes, message injection
//! - **Orchestration lifecycle**: run start/end, pattern-branch semaphore
//!   acquire/release, debate convergence, swarm tallies, spawn/cleanup, bus delivery
//!
//! # Architecture
//!
//! Events flow through a single [`EventHandler`] trait with two methods:
//! - [`on_agent_event`](EventHandler::on_agent_event) — [`AgentEvent`]s from individual agents
//! - [`on_orchestration_event`](EventHandler::on_orchestration_event) — [`OrchestrationEvent`]s from the orchestrator and its executors
//!
//! Both methods have default no-op implementations, so you only override what you
//! care about. The handler is wrapped in `Arc<dyn EventHandler>` and shared across
//! agents and the orchestrator.

use crate::cloudllm::client_wrapper::TokenUsage;
use crate::cloudllm::thought_chain::ThoughtType;
use async_trait::async_trait;

/// Events emitted by an [`Agent`](crate::cloudllm::agent::Agent) during its lifecycle.
///
/// Every variant carries `agent_id` and `agent_name` so handlers can identify the
/// source agent without external state.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// Fired at the start of [`Agent::send`](crate::cloudllm::agent::Agent::send).
    SendStarted {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
        /// First ~120 characters of the user message.
        message_preview: String,
    },

    /// Fired when `send()` returns successfully.
    SendCompleted {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
        /// Cumulative token usage across all LLM calls in this generation.
        tokens_used: Option<TokenUsage>,
        /// Number of tool calls executed during this generation.
        tool_calls_made: usize,
        /// Character length of the final response text.
        response_length: usize,
    },

    /// Fired before each LLM round-trip inside the tool loop.
    LLMCallStarted {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
        /// 1-based iteration counter (1 = initial call, 2+ = tool follow-ups).
        iteration: usize,
    },

    /// Fired after each LLM round-trip completes.
    LLMCallCompleted {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
        /// 1-based iteration counter matching the corresponding `LLMCallStarted`.
        iteration: usize,
        /// Cumulative token usage up to and including this call.
        tokens_used: Option<TokenUsage>,
        /// Character length of this specific LLM response.
        response_length: usize,
    },

    /// A tool call was parsed from the LLM response.
    ToolCallDetected {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
        /// Name of the tool being invoked.
        tool_name: String,
        /// Raw JSON parameters extracted from the LLM's tool call request.
        parameters: serde_json::Value,
        /// 1-based tool iteration.
        iteration: usize,
    },

    /// A tool finished executing (success or failure).
    ToolExecutionCompleted {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
        /// Name of the tool that was executed.
        tool_name: String,
        /// The parameters that were passed to the tool.
        parameters: serde_json::Value,
        /// `true` if the tool executed without error.
        success: bool,
        /// Error message if the tool failed.
        error: Option<String>,
        /// 1-based tool iteration matching the corresponding `ToolCallDetected`.
        iteration: usize,
    },

    /// The tool loop hit its iteration cap.
    ToolMaxIterationsReached {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
    },

    /// A thought was appended to the agent's [`ThoughtChain`](crate::cloudllm::thought_chain::ThoughtChain).
    ThoughtCommitted {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
        /// Type of thought that was committed.
        thought_type: ThoughtType,
    },

    /// A new protocol was added to the agent's tool registry at runtime.
    ProtocolAdded {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
        /// Name under which the protocol was registered.
        protocol_name: String,
    },

    /// A protocol was removed from the agent's tool registry at runtime.
    ProtocolRemoved {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
        /// Name of the protocol that was removed.
        protocol_name: String,
    },

    /// The agent's system prompt was set or replaced.
    SystemPromptSet {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
    },

    /// A message was injected into the agent's session history (hub-routing or bus
    /// auto-injection) without calling the LLM.
    MessageReceived {
        /// Stable identifier of the agent.
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
    },

    /// The agent was forked via [`Agent::fork`](crate::cloudllm::agent::Agent::fork).
    Forked {
        /// Stable identifier of the agent (same for original and fork).
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
    },

    /// The agent was forked with context carried forward.
    ForkedWithContext {
        /// Stable identifier of the agent (same for original and fork).
        agent_id: String,
        /// Human-readable display name.
        agent_name: String,
    },
}

/// Events emitted by the orchestrator, its pattern executors, the spawn manager, and
/// the message bus.
///
/// Every variant carries enough identifying context (`orchestration_id`,
/// `session_id`, etc.) for handlers to correlate events without external state.
#[derive(Debug, Clone)]
pub enum OrchestrationEvent {
    /// A pattern run has started.
    RunStarted {
        /// Stable identifier of the orchestration run.
        orchestration_id: String,
        /// Pattern tag (`"pipeline"`, `"fork_join"`, `"debate"`, ...).
        pattern: String,
        /// Number of agents participating.
        agent_count: usize,
    },

    /// A pattern run has completed (successfully or after exhausting recovery).
    RunCompleted {
        /// Stable identifier of the orchestration run.
        orchestration_id: String,
        /// Approximate total tokens consumed across all branches.
        total_tokens: usize,
        /// Whether the run completed its full contract (no unrecovered failure).
        is_complete: bool,
    },

    /// A branch (pipeline stage, fork-join/parallel/swarm branch, debate turn) is
    /// requesting the LLM semaphore.
    SemaphoreAcquireRequested {
        /// Stable identifier of the orchestration run.
        orchestration_id: String,
        /// 0-based branch index within the current pattern execution.
        branch_index: usize,
    },

    /// A branch acquired the LLM semaphore and may now issue its chat call.
    SemaphoreAcquired {
        /// Stable identifier of the orchestration run.
        orchestration_id: String,
        /// 0-based branch index within the current pattern execution.
        branch_index: usize,
    },

    /// A branch released the LLM semaphore (success, error, timeout, or cancellation).
    SemaphoreReleased {
        /// Stable identifier of the orchestration run.
        orchestration_id: String,
        /// 0-based branch index within the current pattern execution.
        branch_index: usize,
    },

    /// A pipeline stage completed (or failed) its turn.
    StageCompleted {
        /// Stable identifier of the orchestration run.
        orchestration_id: String,
        /// 0-based stage index.
        stage_index: usize,
        /// `true` if the stage's chat call succeeded.
        success: bool,
    },

    /// A debate round has started.
    DebateRoundStarted {
        /// Stable identifier of the orchestration run.
        orchestration_id: String,
        /// 1-based round number.
        round: usize,
    },

    /// Convergence was checked at the end of a debate round.
    ConvergenceChecked {
        /// Stable identifier of the orchestration run.
        orchestration_id: String,
        /// 1-based round in which convergence was checked.
        round: usize,
        /// Jaccard similarity score between this and the previous round.
        score: f32,
        /// Threshold `score` must meet or exceed for convergence.
        threshold: f32,
        /// `true` if `score >= threshold`.
        converged: bool,
    },

    /// The conditional pattern's classifier produced a branch key.
    BranchSelected {
        /// Stable identifier of the orchestration run.
        orchestration_id: String,
        /// The classifier's raw output used to select the branch.
        branch_key: String,
        /// `true` if the key matched a declared branch (false ⇒ fell through to `default`).
        matched_declared_branch: bool,
    },

    /// A swarm voter's ballot was tallied.
    VoteTallied {
        /// Stable identifier of the orchestration run.
        orchestration_id: String,
        /// 0-based voter branch index.
        branch_index: usize,
        /// Parsed vote value.
        vote: String,
        /// Parsed confidence in `[0,1]`.
        confidence: f32,
        /// `true` if confidence met the configured threshold.
        qualified: bool,
    },

    /// A swarm tally reached (or failed to reach) consensus.
    ConsensusReached {
        /// Stable identifier of the orchestration run.
        orchestration_id: String,
        /// `true` if the configured strategy's threshold was met.
        reached: bool,
        /// Whether a judge was invoked as a tie-breaker.
        judge_invoked: bool,
    },

    /// A child agent session was spawned.
    AgentSpawned {
        /// Parent session id.
        parent_session_id: String,
        /// Newly created child session id.
        sub_session_id: String,
        /// Namespaced sub-agent id (`workflow_id:agent_id` or plain `agent_id`).
        sub_agent_id: String,
    },

    /// A spawned child session was cleaned up (idle expiry, cascading parent
    /// cleanup, or explicit close).
    AgentCleanedUp {
        /// Session id that was cleaned up.
        session_id: String,
        /// Human-readable reason (`"idle_timeout"`, `"parent_terminated"`, `"explicit"`).
        reason: String,
    },

    /// A message was published or sent and delivered (or dropped) by the bus.
    MessageDelivered {
        /// Recipient agent id, or topic name for a fan-out publish.
        to: String,
        /// `false` when the subscription buffer was full and the message was dropped.
        delivered: bool,
    },

    /// The pattern recommender decided whether to invoke the LLM reranker.
    RecommenderGateEvaluated {
        /// The user query that was scored.
        query_preview: String,
        /// `true` if any gate condition triggered an LLM rerank call.
        rerank_invoked: bool,
    },
}

/// Trait for receiving agent and orchestration events.
///
/// Both methods have default no-op implementations — override only what you need.
/// The `Send + Sync` bound allows sharing via `Arc<dyn EventHandler>` across agents,
/// the orchestrator, the spawn manager, and the bus.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Called when an agent emits an event. Default: no-op.
    async fn on_agent_event(&self, _event: &AgentEvent) {}

    /// Called when the orchestration engine emits an event. Default: no-op.
    async fn on_orchestration_event(&self, _event: &OrchestrationEvent) {}
}

/// An [`EventHandler`] that logs every event at debug level via the `log` facade.
///
/// This is the ambient default handler wired up when no application-specific
/// handler is supplied, satisfying this crate's "log acquire/release of the
/// semaphore at debug level with the branch index" requirement out of the box.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn on_agent_event(&self, event: &AgentEvent) {
        log::debug!("agent event: {:?}", event);
    }

    async fn on_orchestration_event(&self, event: &OrchestrationEvent) {
        log::debug!("orchestration event: {:?}", event);
    }
}
