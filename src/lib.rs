// src/lib.rs

// Import the top-level `cloudllm` module.
pub mod cloudllm;

// Re-exporting key items for easier external access, so callers can write
// `loomweave::Agent` instead of `loomweave::cloudllm::agent::Agent`.
pub use cloudllm::client_wrapper::{ClientWrapper, Message, Role};
pub use cloudllm::{
    agent, builtin_tools, bus, client_wrapper, clients, config, context_strategy, error, event, http_client_pool,
    llm_session, orchestrator, pattern_library, patterns, recommender, registry, resource_protocol, semaphore,
    session, spawn, thought_chain, tool_protocol, workflow_spec,
};
pub use cloudllm::{Agent, LLMSession};
pub use cloudllm::bus::MessageBus;
pub use cloudllm::error::{OrchestrationError, UserError};
pub use cloudllm::orchestrator::Orchestrator;
pub use cloudllm::pattern_library::{PatternLibrary, PatternTemplate};
pub use cloudllm::recommender::PatternRecommender;
pub use cloudllm::semaphore::LlmSemaphore;
pub use cloudllm::spawn::SpawnManager;
pub use cloudllm::thought_chain::ThoughtChain;
pub use cloudllm::workflow_spec::WorkflowSpec;
pub use config::CloudLLMConfig;
