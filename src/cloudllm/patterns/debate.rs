//! Debate executor (spec §4.2): `rounds` rounds of sequential debater turns, each
//! debater seeing the full transcript accumulated so far, with an optional
//! moderator turn governed by `moderator_cadence` (`final_only` fires once after
//! the last round; `every_round` fires after each one).
//!
//! Agents participate as debaters unless their declared `role` is exactly
//! `"moderator"` — at most one moderator is expected; if more than one agent is
//! tagged `"moderator"`, the first one wins and the rest debate.

use crate::cloudllm::error::OrchestrationError;
use crate::cloudllm::event::OrchestrationEvent;
use crate::cloudllm::orchestrator::{BranchTrace, ExecutionContext, PatternOutput};
use crate::cloudllm::patterns::render_template;
use crate::cloudllm::workflow_spec::{ModeratorCadence, WorkflowSpec};

pub async fn run(
    ctx: &ExecutionContext,
    spec: &WorkflowSpec,
    initial_input: &str,
) -> Result<PatternOutput, OrchestrationError> {
    let (agents, rounds, cadence) = match spec {
        WorkflowSpec::Debate { agents, rounds, moderator_cadence } => (agents, *rounds, moderator_cadence),
        _ => return Err(OrchestrationError::Internal("debate executor received non-debate spec".into())),
    };

    let moderator = agents.iter().find(|a| a.role.as_deref() == Some("moderator"));
    let debaters: Vec<_> = agents
        .iter()
        .filter(|a| a.role.as_deref() != Some("moderator"))
        .collect();
    if debaters.is_empty() {
        return Err(OrchestrationError::InvalidSpec("debate spec has no non-moderator debaters".into()));
    }

    let mut transcript_lines: Vec<String> = vec![format!("Topic: {}", initial_input)];
    let mut trace = Vec::new();
    let mut last_moderator_output: Option<String> = None;
    let mut branch_index = 0;

    'rounds: for round in 0..rounds {
        ctx.emit(OrchestrationEvent::DebateRoundStarted {
            orchestration_id: ctx.orchestration_id.clone(),
            round: round as usize,
        })
        .await;

        for debater in &debaters {
            if ctx.cancellation.is_canceled() {
                break 'rounds;
            }
            let transcript_so_far = transcript_lines.join("\n");
            let prompt = match &debater.prompt_template {
                Some(template) => render_template(template, &transcript_so_far),
                None => format!(
                    "Debate transcript so far:\n{}\n\nRespond to the debate above as {}.",
                    transcript_so_far, debater.id
                ),
            };
            let agent = ctx.resolver.resolve(&debater.id).await?;
            let system_prompt = agent.base_system_prompt.clone();
            let index = branch_index;
            branch_index += 1;
            let result = ctx
                .llm_semaphore
                .run_gated(&ctx.orchestration_id, index, || async { agent.generate(&system_prompt, &prompt, &[]).await })
                .await;
            match result {
                Ok(output) => {
                    transcript_lines.push(format!("{}: {}", debater.id, output));
                    trace.push(BranchTrace::ok(index, debater.id.clone(), output));
                }
                Err(e) => {
                    let error_text = e.to_string();
                    trace.push(BranchTrace::failed(index, debater.id.clone(), error_text.clone()));
                    return Err(OrchestrationError::Upstream(format!(
                        "debate round {} debater {} failed: {}",
                        round, debater.id, error_text
                    )));
                }
            }
        }

        let should_run_moderator = matches!(cadence, ModeratorCadence::EveryRound)
            || (matches!(cadence, ModeratorCadence::FinalOnly) && round + 1 == rounds);

        if should_run_moderator {
            if let Some(moderator) = moderator {
                if ctx.cancellation.is_canceled() {
                    break 'rounds;
                }
                let transcript_so_far = transcript_lines.join("\n");
                let prompt = match &moderator.prompt_template {
                    Some(template) => render_template(template, &transcript_so_far),
                    None => format!("Moderate and summarize this debate:\n{}", transcript_so_far),
                };
                let agent = ctx.resolver.resolve(&moderator.id).await?;
                let system_prompt = agent.base_system_prompt.clone();
                let index = branch_index;
                branch_index += 1;
                let result = ctx
                    .llm_semaphore
                    .run_gated(&ctx.orchestration_id, index, || async {
                        agent.generate(&system_prompt, &prompt, &[]).await
                    })
                    .await;
                match result {
                    Ok(output) => {
                        transcript_lines.push(format!("{}: {}", moderator.id, output));
                        trace.push(BranchTrace::ok(index, moderator.id.clone(), output.clone()));
                        last_moderator_output = Some(output);
                    }
                    Err(e) => {
                        let error_text = e.to_string();
                        trace.push(BranchTrace::failed(index, moderator.id.clone(), error_text.clone()));
                        return Err(OrchestrationError::Upstream(format!(
                            "debate moderator failed in round {}: {}",
                            round, error_text
                        )));
                    }
                }
            }
        }
    }

    let output = last_moderator_output.unwrap_or_else(|| transcript_lines.join("\n"));
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
    use crate::cloudllm::workflow_spec::AgentSpec;
    use async_trait::async_trait;
    use std::error::Error;
    use std::sync::Arc;

    struct TaggedEchoClient(String);

    #[async_trait]
    impl ClientWrapper for TaggedEchoClient {
        async fn send_message(
            &self,
            _messages: &[Message],
            _tools: Option<Vec<crate::cloudllm::client_wrapper::ToolDefinition>>,
        ) -> Result<Message, Box<dyn Error>> {
            Ok(Message {
                role: Role::Assistant,
                content: std::sync::Arc::from(format!("[{}] reply", self.0).as_str()),
                tool_calls: Vec::new(),
            })
        }
        fn model_name(&self) -> &str {
            "echo"
        }
    }

    struct TaggedResolver;

    #[async_trait]
    impl AgentResolver for TaggedResolver {
        async fn resolve(&self, agent_id: &str) -> Result<Agent, OrchestrationError> {
            Ok(Agent::new(agent_id, agent_id, Arc::new(TaggedEchoClient(agent_id.to_string()))))
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            orchestration_id: "run-1".to_string(),
            llm_semaphore: Arc::new(LlmSemaphore::new(4)),
            resolver: Arc::new(TaggedResolver),
            bus: MessageBus::new(),
            event_handler: None,
            config: RuntimeConfig::default(),
            clock: Arc::new(SystemClock),
            cancellation: CancellationHandle::new(),
        }
    }

    fn agent_spec(id: &str, role: Option<&str>) -> AgentSpec {
        AgentSpec {
            id: id.to_string(),
            name: None,
            system_prompt: None,
            prompt_template: None,
            role: role.map(String::from),
        }
    }

    #[tokio::test]
    async fn final_only_moderator_runs_once_after_last_round() {
        let spec = WorkflowSpec::Debate {
            agents: vec![
                agent_spec("d1", Some("debater")),
                agent_spec("d2", Some("debater")),
                agent_spec("mod1", Some("moderator")),
            ],
            rounds: 2,
            moderator_cadence: ModeratorCadence::FinalOnly,
        };
        let ctx = ctx();
        let result = run(&ctx, &spec, "should we do X").await.unwrap();
        let moderator_turns = result.branch_trace.iter().filter(|t| t.agent_id == "mod1").count();
        assert_eq!(moderator_turns, 1);
        assert!(result.output.contains("[mod1] reply"));
    }

    #[tokio::test]
    async fn every_round_moderator_runs_after_each_round() {
        let spec = WorkflowSpec::Debate {
            agents: vec![agent_spec("d1", Some("debater")), agent_spec("mod1", Some("moderator"))],
            rounds: 3,
            moderator_cadence: ModeratorCadence::EveryRound,
        };
        let ctx = ctx();
        let result = run(&ctx, &spec, "topic").await.unwrap();
        let moderator_turns = result.branch_trace.iter().filter(|t| t.agent_id == "mod1").count();
        assert_eq!(moderator_turns, 3);
    }

    #[tokio::test]
    async fn no_moderator_falls_back_to_full_transcript() {
        let spec = WorkflowSpec::Debate {
            agents: vec![agent_spec("d1", None), agent_spec("d2", None)],
            rounds: 1,
            moderator_cadence: ModeratorCadence::FinalOnly,
        };
        let ctx = ctx();
        let result = run(&ctx, &spec, "topic").await.unwrap();
        assert!(result.output.contains("[d1] reply"));
        assert!(result.output.contains("[d2] reply"));
    }

    #[tokio::test]
    async fn debater_failure_aborts_the_whole_debate() {
        struct FailingFirstResolver;
        #[async_trait]
        impl AgentResolver for FailingFirstResolver {
            async fn resolve(&self, agent_id: &str) -> Result<Agent, OrchestrationError> {
                if agent_id == "d1" {
                    Err(OrchestrationError::Upstream("down".into()))
                } else {
                    Ok(Agent::new(agent_id, agent_id, Arc::new(TaggedEchoClient(agent_id.to_string()))))
                }
            }
        }
        let mut ctx = ctx();
        ctx.resolver = Arc::new(FailingFirstResolver);
        let spec = WorkflowSpec::Debate {
            agents: vec![agent_spec("d1", None)],
            rounds: 1,
            moderator_cadence: ModeratorCadence::FinalOnly,
        };
        let err = run(&ctx, &spec, "topic").await.unwrap_err();
        assert_eq!(err.code(), "upstream");
    }
}
