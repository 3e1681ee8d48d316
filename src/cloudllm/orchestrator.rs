//! The orchestrator (spec §4.1): validates a workflow spec, selects the pattern
//! executor matching its `type` tag, and drives it with a shared
//! [`ExecutionContext`] carrying the one process-wide LLM semaphore, the agent
//! resolver, the message bus, the event handler, and the clock — nothing in the
//! pattern executors reaches for a hidden global (spec §9: "avoid hidden
//! singletons — pass them as context on every executor call").

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cloudllm::agent::Agent;
use crate::cloudllm::bus::MessageBus;
use crate::cloudllm::client_wrapper::ClientWrapper;
use crate::cloudllm::config::RuntimeConfig;
use crate::cloudllm::error::OrchestrationError;
use crate::cloudllm::event::{EventHandler, OrchestrationEvent};
use crate::cloudllm::registry::{AgentConfig, AgentRegistry};
use crate::cloudllm::semaphore::LlmSemaphore;
use crate::cloudllm::spawn::CancellationHandle;
use crate::cloudllm::workflow_spec::WorkflowSpec;

/// Injected time source (spec §6: "clock" is one of the external capabilities
/// the core consumes, never instantiates). Lets debate-convergence and
/// recommender-cache-TTL logic be driven by a fake clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// `Clock` backed by the real wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Turns a workflow spec's `agent_id` into a live chat participant.
///
/// This is the seam between the orchestration core and the two external
/// capabilities spec §6 names but never instantiates: the agent registry
/// (`agent_id → AgentConfig`) and the LLM provider (a concrete
/// [`ClientWrapper`]). A [`RegistryAgentResolver`] composes both; tests can
/// substitute a resolver that hands back a pre-wired `Agent` directly.
#[async_trait]
pub trait AgentResolver: Send + Sync {
    async fn resolve(&self, agent_id: &str) -> Result<Agent, OrchestrationError>;
}

/// Default [`AgentResolver`]: loads an [`AgentConfig`] from an
/// [`AgentRegistry`], then hands it to a caller-supplied factory to obtain a
/// concrete [`ClientWrapper`] (e.g. one `HttpChatClient` per model, or a pool
/// keyed by provider). The factory is the one place API credentials enter this
/// crate, and it is never reached for internally.
pub struct RegistryAgentResolver {
    registry: Arc<dyn AgentRegistry>,
    client_factory: Arc<dyn Fn(&AgentConfig) -> Arc<dyn ClientWrapper> + Send + Sync>,
}

impl RegistryAgentResolver {
    pub fn new(
        registry: Arc<dyn AgentRegistry>,
        client_factory: Arc<dyn Fn(&AgentConfig) -> Arc<dyn ClientWrapper> + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new(RegistryAgentResolver { registry, client_factory })
    }
}

#[async_trait]
impl AgentResolver for RegistryAgentResolver {
    async fn resolve(&self, agent_id: &str) -> Result<Agent, OrchestrationError> {
        let config = self.registry.load(agent_id).await?;
        let client = (self.client_factory)(&config);
        let agent = Agent::new(config.agent_id.clone(), config.display_name.clone(), client);
        let mut agent = agent;
        agent.set_system_prompt(&config.system_prompt);
        Ok(agent)
    }
}

/// Shared state every pattern executor call receives (spec §4.1, §9).
pub struct ExecutionContext {
    pub orchestration_id: String,
    pub llm_semaphore: Arc<LlmSemaphore>,
    pub resolver: Arc<dyn AgentResolver>,
    pub bus: Arc<MessageBus>,
    pub event_handler: Option<Arc<dyn EventHandler>>,
    pub config: RuntimeConfig,
    pub clock: Arc<dyn Clock>,
    pub cancellation: CancellationHandle,
}

impl ExecutionContext {
    pub(crate) async fn emit(&self, event: OrchestrationEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_orchestration_event(&event).await;
        }
    }
}

/// Per-branch execution record returned alongside a pattern's output (spec §4.2:
/// "return `(output, per_branch_trace)`").
#[derive(Debug, Clone)]
pub struct BranchTrace {
    pub branch_index: usize,
    pub agent_id: String,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl BranchTrace {
    pub fn ok(branch_index: usize, agent_id: impl Into<String>, output: String) -> Self {
        BranchTrace {
            branch_index,
            agent_id: agent_id.into(),
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(branch_index: usize, agent_id: impl Into<String>, error: String) -> Self {
        BranchTrace {
            branch_index,
            agent_id: agent_id.into(),
            output: None,
            error: Some(error),
        }
    }
}

/// What a pattern executor hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct PatternOutput {
    pub output: String,
    pub branch_trace: Vec<BranchTrace>,
}

/// Dispatches a validated workflow spec to its pattern executor (spec §4.1).
pub struct Orchestrator {
    llm_semaphore: Arc<LlmSemaphore>,
    resolver: Arc<dyn AgentResolver>,
    bus: Arc<MessageBus>,
    event_handler: Option<Arc<dyn EventHandler>>,
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
}

impl Orchestrator {
    /// Construct an orchestrator. The LLM semaphore's capacity is fixed at
    /// startup from `config.llm_semaphore_capacity` and is immutable thereafter
    /// (spec §4.1).
    pub fn new(
        config: RuntimeConfig,
        resolver: Arc<dyn AgentResolver>,
        bus: Arc<MessageBus>,
        event_handler: Option<Arc<dyn EventHandler>>,
    ) -> Self {
        let mut semaphore = LlmSemaphore::new(config.llm_semaphore_capacity);
        if let Some(handler) = &event_handler {
            semaphore = semaphore.with_event_handler(Arc::clone(handler));
        }
        Orchestrator {
            llm_semaphore: Arc::new(semaphore),
            resolver,
            bus,
            event_handler,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Override the clock (for deterministic tests of debate convergence /
    /// recommender cache TTL logic).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run `spec` against `initial_input` (spec §4.1).
    ///
    /// Fails with `InvalidSpec` if validation rejects the spec, or
    /// `UnknownPattern` if a future pattern-kind addition isn't yet wired into
    /// this `match` (today every `WorkflowSpec` variant is handled, so this is
    /// unreachable for the current tagged union — kept as a guard for forward
    /// compatibility per spec §4.1's documented error kind).
    pub async fn run(
        &self,
        spec: &WorkflowSpec,
        initial_input: &str,
    ) -> Result<PatternOutput, OrchestrationError> {
        spec.validate()?;

        let orchestration_id = Uuid::new_v4().to_string();
        let ctx = ExecutionContext {
            orchestration_id: orchestration_id.clone(),
            llm_semaphore: Arc::clone(&self.llm_semaphore),
            resolver: Arc::clone(&self.resolver),
            bus: Arc::clone(&self.bus),
            event_handler: self.event_handler.clone(),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            cancellation: CancellationHandle::new(),
        };

        ctx.emit(OrchestrationEvent::RunStarted {
            orchestration_id: orchestration_id.clone(),
            pattern: spec.type_tag().to_string(),
            agent_count: agent_count(spec),
        })
        .await;

        let result = match spec {
            WorkflowSpec::Pipeline { .. } => crate::cloudllm::patterns::pipeline::run(&ctx, spec, initial_input).await,
            WorkflowSpec::ForkJoin { .. } | WorkflowSpec::Parallel { .. } => {
                crate::cloudllm::patterns::fork_join::run(&ctx, spec, initial_input).await
            }
            WorkflowSpec::Debate { .. } => crate::cloudllm::patterns::debate::run(&ctx, spec, initial_input).await,
            WorkflowSpec::Conditional { .. } => {
                crate::cloudllm::patterns::conditional::run(&ctx, spec, initial_input).await
            }
            WorkflowSpec::Swarm { .. } => crate::cloudllm::patterns::swarm::run(&ctx, spec, initial_input).await,
        };

        let is_complete = result.is_ok();
        ctx.emit(OrchestrationEvent::RunCompleted {
            orchestration_id,
            total_tokens: 0,
            is_complete,
        })
        .await;

        result
    }
}

fn agent_count(spec: &WorkflowSpec) -> usize {
    match spec {
        WorkflowSpec::Pipeline { stages, .. } => stages.len(),
        WorkflowSpec::ForkJoin { agents, agent_ids, .. } | WorkflowSpec::Parallel { agents, agent_ids, .. } => {
            agents.len().max(agent_ids.len())
        }
        WorkflowSpec::Debate { agents, .. } => agents.len(),
        WorkflowSpec::Conditional { agents, .. } => agents.len(),
        WorkflowSpec::Swarm { agents, .. } => agents.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::registry::InMemoryAgentRegistry;
    use crate::cloudllm::session::InMemorySessionStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn run_rejects_invalid_spec_before_dispatch() {
        let registry = InMemoryAgentRegistry::new();
        let resolver = RegistryAgentResolver::new(registry, Arc::new(|_: &AgentConfig| -> Arc<dyn ClientWrapper> {
            unreachable!("client factory should never be called for an invalid spec")
        }));
        let orchestrator = Orchestrator::new(RuntimeConfig::default(), resolver, MessageBus::new(), None);

        let spec = WorkflowSpec::Pipeline {
            agents: vec![],
            initial_prompt: "x".to_string(),
            stages: vec![],
            pass_full_history: false,
        };
        let err = orchestrator.run(&spec, "x").await.unwrap_err();
        assert_eq!(err.code(), "invalid_spec");
        let _ = InMemorySessionStore::new();
    }
}
