//! Conditional executor (spec §4.2): a classifier agent runs first, its raw
//! output text is matched (trimmed, case-sensitive) against the declared
//! `branches` map's keys, and the matching branch's agent then runs against
//! the original input. A `"default"` key is the documented fallback — spec's
//! Open Question on the branches schema resolved to `HashMap<String,
//! BranchSpec>` keyed by classification label with `"default"` reserved as the
//! catch-all (see DESIGN.md).

use crate::cloudllm::error::OrchestrationError;
use crate::cloudllm::event::OrchestrationEvent;
use crate::cloudllm::orchestrator::{BranchTrace, ExecutionContext, PatternOutput};
use crate::cloudllm::patterns::render_template;
use crate::cloudllm::workflow_spec::WorkflowSpec;

const DEFAULT_BRANCH_KEY: &str = "default";

pub async fn run(
    ctx: &ExecutionContext,
    spec: &WorkflowSpec,
    initial_input: &str,
) -> Result<PatternOutput, OrchestrationError> {
    let (agents, branches) = match spec {
        WorkflowSpec::Conditional { agents, branches } => (agents, branches),
        _ => return Err(OrchestrationError::Internal("conditional executor received non-conditional spec".into())),
    };

    let classifier_spec = agents
        .iter()
        .find(|a| a.role.as_deref() == Some("classifier"))
        .or_else(|| agents.first())
        .ok_or_else(|| OrchestrationError::InvalidSpec("conditional spec has no classifier agent".into()))?;

    let classifier = ctx.resolver.resolve(&classifier_spec.id).await?;
    let classifier_system_prompt = classifier.base_system_prompt.clone();
    let classifier_prompt = match &classifier_spec.prompt_template {
        Some(template) => render_template(template, initial_input),
        None => initial_input.to_string(),
    };

    let classification = ctx
        .llm_semaphore
        .run_gated(&ctx.orchestration_id, 0, || async {
            classifier.generate(&classifier_system_prompt, &classifier_prompt, &[]).await
        })
        .await
        .map_err(|e| OrchestrationError::Upstream(format!("conditional classifier failed: {}", e)))?;

    let branch_key = classification.trim().to_string();
    let matched_declared_branch = branches.contains_key(&branch_key);
    let mut trace = vec![BranchTrace::ok(0, classifier_spec.id.clone(), classification.clone())];

    ctx.emit(OrchestrationEvent::BranchSelected {
        orchestration_id: ctx.orchestration_id.clone(),
        branch_key: branch_key.clone(),
        matched_declared_branch,
    })
    .await;

    let resolved_key = if matched_declared_branch {
        branch_key.clone()
    } else {
        DEFAULT_BRANCH_KEY.to_string()
    };

    let branch = branches.get(&resolved_key).ok_or_else(|| {
        OrchestrationError::ClassificationUnmatched(format!(
            "classifier produced \"{}\", which matches no declared branch and no \"default\" branch is configured",
            branch_key
        ))
    })?;

    let agent = ctx.resolver.resolve(&branch.agent_id).await?;
    let system_prompt = agent.base_system_prompt.clone();
    let prompt = match &branch.prompt_template {
        Some(template) => render_template(template, initial_input),
        None => initial_input.to_string(),
    };

    let output = ctx
        .llm_semaphore
        .run_gated(&ctx.orchestration_id, 1, || async { agent.generate(&system_prompt, &prompt, &[]).await })
        .await
        .map_err(|e| {
            OrchestrationError::Upstream(format!("conditional branch \"{}\" agent failed: {}", resolved_key, e))
        })?;

    trace.push(BranchTrace::ok(1, branch.agent_id.clone(), output.clone()));

    Ok(PatternOutput { output, branch_trace: trace })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::agent::Agent;
    use crate::cloudllm::bus::MessageBus;
    use crate::cloudllm::client_wrapper::{ClientWrapper, Message, Role};
    use crate::cloudllm::config::RuntimeConfig;
    use crate::cloudllm::orchestrator::{AgentResolver, SystemClock};
    use crate::cloudllm::semaphore::LlmSemaphore;
    use crate::cloudllm::spawn::CancellationHandle;
    use crate::cloudllm::workflow_spec::{AgentSpec, BranchSpec};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::error::Error;
    use std::sync::Arc;

    struct FixedReplyClient(String);

    #[async_trait]
    impl ClientWrapper for FixedReplyClient {
        async fn send_message(
            &self,
            _messages: &[Message],
            _tools: Option<Vec<crate::cloudllm::client_wrapper::ToolDefinition>>,
        ) -> Result<Message, Box<dyn Error>> {
            Ok(Message {
                role: Role::Assistant,
                content: std::sync::Arc::from(self.0.as_str()),
                tool_calls: Vec::new(),
            })
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    struct FixedResolver {
        replies: HashMap<String, String>,
    }

    #[async_trait]
    impl AgentResolver for FixedResolver {
        async fn resolve(&self, agent_id: &str) -> Result<Agent, OrchestrationError> {
            let reply = self
                .replies
                .get(agent_id)
                .cloned()
                .unwrap_or_else(|| format!("{}-output", agent_id));
            Ok(Agent::new(agent_id, agent_id, Arc::new(FixedReplyClient(reply))))
        }
    }

    fn ctx(replies: HashMap<String, String>) -> ExecutionContext {
        ExecutionContext {
            orchestration_id: "run-1".to_string(),
            llm_semaphore: Arc::new(LlmSemaphore::new(2)),
            resolver: Arc::new(FixedResolver { replies }),
            bus: MessageBus::new(),
            event_handler: None,
            config: RuntimeConfig::default(),
            clock: Arc::new(SystemClock),
            cancellation: CancellationHandle::new(),
        }
    }

    fn spec_with_branches(branches: HashMap<String, BranchSpec>) -> WorkflowSpec {
        WorkflowSpec::Conditional {
            agents: vec![AgentSpec {
                id: "classifier".to_string(),
                name: None,
                system_prompt: None,
                prompt_template: None,
                role: Some("classifier".to_string()),
            }],
            branches,
        }
    }

    #[tokio::test]
    async fn matched_branch_routes_to_its_agent() {
        let mut replies = HashMap::new();
        replies.insert("classifier".to_string(), "billing".to_string());
        let ctx = ctx(replies);
        let mut branches = HashMap::new();
        branches.insert(
            "billing".to_string(),
            BranchSpec { agent_id: "billing_agent".to_string(), prompt_template: None },
        );
        let spec = spec_with_branches(branches);
        let result = run(&ctx, &spec, "my invoice is wrong").await.unwrap();
        assert_eq!(result.output, "billing_agent-output");
    }

    #[tokio::test]
    async fn unmatched_key_falls_back_to_default_branch() {
        let mut replies = HashMap::new();
        replies.insert("classifier".to_string(), "unknown_category".to_string());
        let ctx = ctx(replies);
        let mut branches = HashMap::new();
        branches.insert(
            "billing".to_string(),
            BranchSpec { agent_id: "billing_agent".to_string(), prompt_template: None },
        );
        branches.insert(
            "default".to_string(),
            BranchSpec { agent_id: "fallback_agent".to_string(), prompt_template: None },
        );
        let spec = spec_with_branches(branches);
        let result = run(&ctx, &spec, "something else").await.unwrap();
        assert_eq!(result.output, "fallback_agent-output");
    }

    #[tokio::test]
    async fn unmatched_key_with_no_default_is_classification_unmatched_error() {
        let mut replies = HashMap::new();
        replies.insert("classifier".to_string(), "unknown_category".to_string());
        let ctx = ctx(replies);
        let mut branches = HashMap::new();
        branches.insert(
            "billing".to_string(),
            BranchSpec { agent_id: "billing_agent".to_string(), prompt_template: None },
        );
        let spec = spec_with_branches(branches);
        let err = run(&ctx, &spec, "something else").await.unwrap_err();
        assert_eq!(err.code(), "classification_unmatched");
    }
}
