//! Pipeline executor (spec §4.2): strictly sequential stages, each fed the prior
//! stage's output through its own `prompt_template`.
//!
//! Stage 0 is special-cased: it receives `initial_prompt` verbatim rather than
//! through its own template, matching spec §8 scenario 2 exactly ("A is called
//! with `\"x\"`, B with `\"got:<A_out>\"`" for templates `"got:{{previous}}"`) —
//! `{previous}` only becomes a substitution target from stage 1 onward, since
//! stage 0 has no prior stage to bind it to.

use crate::cloudllm::client_wrapper::{Message, Role};
use crate::cloudllm::error::OrchestrationError;
use crate::cloudllm::event::OrchestrationEvent;
use crate::cloudllm::orchestrator::{BranchTrace, ExecutionContext, PatternOutput};
use crate::cloudllm::patterns::render_template;
use crate::cloudllm::workflow_spec::WorkflowSpec;

pub async fn run(
    ctx: &ExecutionContext,
    spec: &WorkflowSpec,
    _initial_input: &str,
) -> Result<PatternOutput, OrchestrationError> {
    let (stages, pass_full_history, initial_prompt) = match spec {
        WorkflowSpec::Pipeline {
            stages,
            pass_full_history,
            initial_prompt,
            ..
        } => (stages, *pass_full_history, initial_prompt.as_str()),
        _ => return Err(OrchestrationError::Internal("pipeline executor received non-pipeline spec".into())),
    };

    let mut history: Vec<Message> = Vec::new();
    let mut previous_output = initial_prompt.to_string();
    let mut trace = Vec::with_capacity(stages.len());

    for (index, stage) in stages.iter().enumerate() {
        if ctx.cancellation.is_canceled() {
            return Err(OrchestrationError::Canceled(format!(
                "pipeline canceled before stage {}",
                index
            )));
        }

        let rendered_prompt = if index == 0 {
            previous_output.clone()
        } else {
            render_template(&stage.prompt_template, &previous_output)
        };

        let call_history: Vec<Message> = if pass_full_history { history.clone() } else { Vec::new() };

        // Resolution failures must flow through the same `continue_on_error`
        // handling as generation failures, so both are folded into one
        // fallible step rather than letting `resolve`'s `?` bypass the match
        // below.
        let result: Result<String, Box<dyn std::error::Error + Send + Sync>> = async {
            let agent = ctx
                .resolver
                .resolve(&stage.agent_id)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            let system_prompt = agent.base_system_prompt.clone();
            ctx.llm_semaphore
                .run_gated(&ctx.orchestration_id, index, || async {
                    agent.generate(&system_prompt, &rendered_prompt, &call_history).await
                })
                .await
        }
        .await;

        match result {
            Ok(output) => {
                trace.push(BranchTrace::ok(index, stage.agent_id.clone(), output.clone()));
                ctx.emit(OrchestrationEvent::StageCompleted {
                    orchestration_id: ctx.orchestration_id.clone(),
                    stage_index: index,
                    success: true,
                })
                .await;

                if pass_full_history {
                    history.push(Message {
                        role: Role::User,
                        content: std::sync::Arc::from(rendered_prompt.as_str()),
                        tool_calls: Vec::new(),
                    });
                    history.push(Message {
                        role: Role::Assistant,
                        content: std::sync::Arc::from(output.as_str()),
                        tool_calls: Vec::new(),
                    });
                }
                previous_output = output;
            }
            Err(e) => {
                let error_text = e.to_string();
                trace.push(BranchTrace::failed(index, stage.agent_id.clone(), error_text.clone()));
                ctx.emit(OrchestrationEvent::StageCompleted {
                    orchestration_id: ctx.orchestration_id.clone(),
                    stage_index: index,
                    success: false,
                })
                .await;

                if stage.continue_on_error {
                    previous_output = error_text;
                    continue;
                }
                return Err(OrchestrationError::Upstream(format!(
                    "pipeline stage {} ({}) failed: {}",
                    index, stage.agent_id, error_text
                )));
            }
        }
    }

    Ok(PatternOutput {
        output: previous_output,
        branch_trace: trace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::bus::MessageBus;
    use crate::cloudllm::client_wrapper::ClientWrapper;
    use crate::cloudllm::config::RuntimeConfig;
    use crate::cloudllm::orchestrator::{AgentResolver, SystemClock};
    use crate::cloudllm::registry::AgentConfig;
    use crate::cloudllm::semaphore::LlmSemaphore;
    use crate::cloudllm::spawn::CancellationHandle;
    use crate::cloudllm::workflow_spec::StageSpec;
    use async_trait::async_trait;
    use std::error::Error;
    use std::sync::Arc;

    struct EchoTemplateClient;

    #[async_trait]
    impl ClientWrapper for EchoTemplateClient {
        async fn send_message(
            &self,
            messages: &[Message],
            _tools: Option<Vec<crate::cloudllm::client_wrapper::ToolDefinition>>,
        ) -> Result<Message, Box<dyn Error>> {
            let last = messages.last().map(|m| m.content.to_string()).unwrap_or_default();
            Ok(Message {
                role: Role::Assistant,
                content: Arc::from(last.as_str()),
                tool_calls: Vec::new(),
            })
        }
        fn model_name(&self) -> &str {
            "echo"
        }
    }

    struct DirectResolver;

    #[async_trait]
    impl AgentResolver for DirectResolver {
        async fn resolve(&self, agent_id: &str) -> Result<crate::cloudllm::agent::Agent, OrchestrationError> {
            Ok(crate::cloudllm::agent::Agent::new(agent_id, agent_id, Arc::new(EchoTemplateClient)))
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl AgentResolver for FailingResolver {
        async fn resolve(&self, agent_id: &str) -> Result<crate::cloudllm::agent::Agent, OrchestrationError> {
            if agent_id == "a" {
                Err(OrchestrationError::Upstream("boom".into()))
            } else {
                Ok(crate::cloudllm::agent::Agent::new(agent_id, agent_id, Arc::new(EchoTemplateClient)))
            }
        }
    }

    fn ctx(resolver: Arc<dyn AgentResolver>) -> ExecutionContext {
        ExecutionContext {
            orchestration_id: "run-1".to_string(),
            llm_semaphore: Arc::new(LlmSemaphore::new(2)),
            resolver,
            bus: MessageBus::new(),
            event_handler: None,
            config: RuntimeConfig::default(),
            clock: Arc::new(SystemClock),
            cancellation: CancellationHandle::new(),
        }
    }

    #[tokio::test]
    async fn stage_zero_receives_raw_initial_prompt_stage_one_receives_rendered_template() {
        let spec = WorkflowSpec::Pipeline {
            agents: vec![],
            initial_prompt: "x".to_string(),
            stages: vec![
                StageSpec {
                    agent_id: "a".to_string(),
                    prompt_template: "got:{{previous}}".to_string(),
                    continue_on_error: false,
                },
                StageSpec {
                    agent_id: "b".to_string(),
                    prompt_template: "got:{{previous}}".to_string(),
                    continue_on_error: false,
                },
            ],
            pass_full_history: false,
        };
        let ctx = ctx(Arc::new(DirectResolver));
        let result = run(&ctx, &spec, "unused").await.unwrap();
        assert_eq!(result.output, "got:x");
        assert_eq!(result.branch_trace[0].output.as_deref(), Some("x"));
        assert_eq!(result.branch_trace[1].output.as_deref(), Some("got:x"));
    }

    #[tokio::test]
    async fn stage_error_stops_pipeline_without_continue_on_error() {
        let spec = WorkflowSpec::Pipeline {
            agents: vec![],
            initial_prompt: "x".to_string(),
            stages: vec![
                StageSpec {
                    agent_id: "a".to_string(),
                    prompt_template: "got:{{previous}}".to_string(),
                    continue_on_error: false,
                },
                StageSpec {
                    agent_id: "b".to_string(),
                    prompt_template: "got:{{previous}}".to_string(),
                    continue_on_error: false,
                },
            ],
            pass_full_history: false,
        };
        let ctx = ctx(Arc::new(FailingResolver));
        let err = run(&ctx, &spec, "unused").await.unwrap_err();
        assert_eq!(err.code(), "upstream");
    }

    #[tokio::test]
    async fn continue_on_error_lets_pipeline_proceed_to_next_stage() {
        let spec = WorkflowSpec::Pipeline {
            agents: vec![],
            initial_prompt: "x".to_string(),
            stages: vec![
                StageSpec {
                    agent_id: "a".to_string(),
                    prompt_template: "got:{{previous}}".to_string(),
                    continue_on_error: true,
                },
                StageSpec {
                    agent_id: "b".to_string(),
                    prompt_template: "got:{{previous}}".to_string(),
                    continue_on_error: false,
                },
            ],
            pass_full_history: false,
        };
        let ctx = ctx(Arc::new(FailingResolver));
        let result = run(&ctx, &spec, "unused").await.unwrap();
        assert!(result.branch_trace[0].error.is_some());
        assert!(result.output.starts_with("got:"));
    }
}
