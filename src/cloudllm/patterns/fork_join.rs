//! Fork-join / parallel executor (spec §4.2): one branch per agent, each
//! independently acquiring the LLM semaphore — the launch dispatch itself is
//! not serialized, so once the branch count exceeds semaphore capacity, the
//! surplus branches are observably blocked waiting on `acquire` (spec §8
//! scenario 1, a required visible behavior, not an implementation detail to
//! optimize away).
//!
//! `fork_join` and `parallel` share this executor: spec.md documents them with
//! identical fields and semantics, differing only in name.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::cloudllm::error::OrchestrationError;
use crate::cloudllm::orchestrator::{BranchTrace, ExecutionContext, PatternOutput};
use crate::cloudllm::workflow_spec::{AgentSpec, MergeStrategy, WorkflowSpec};

struct Branch {
    agent_id: String,
    prompt: String,
}

pub async fn run(
    ctx: &ExecutionContext,
    spec: &WorkflowSpec,
    _initial_input: &str,
) -> Result<PatternOutput, OrchestrationError> {
    let (agents, agent_ids, shared_prompt, merge_strategy, timeout_seconds) = match spec {
        WorkflowSpec::ForkJoin {
            agents,
            agent_ids,
            prompt,
            merge_strategy,
            timeout_seconds,
        }
        | WorkflowSpec::Parallel {
            agents,
            agent_ids,
            prompt,
            merge_strategy,
            timeout_seconds,
        } => (agents, agent_ids, prompt, merge_strategy, timeout_seconds),
        _ => return Err(OrchestrationError::Internal("fork_join executor received non-fork_join spec".into())),
    };

    let branches = resolve_branches(agents, agent_ids, shared_prompt.as_deref())?;
    let n = branches.len();

    let mut join_set: JoinSet<(usize, String, Result<String, String>)> = JoinSet::new();
    for (index, branch) in branches.into_iter().enumerate() {
        let resolver = Arc::clone(&ctx.resolver);
        let semaphore = ctx.llm_semaphore.clone();
        let orchestration_id = ctx.orchestration_id.clone();
        let agent_id = branch.agent_id.clone();
        let prompt = branch.prompt.clone();
        join_set.spawn(async move {
            let outcome = async {
                let agent = resolver.resolve(&agent_id).await.map_err(|e| e.to_string())?;
                let system_prompt = agent.base_system_prompt.clone();
                semaphore
                    .run_gated(&orchestration_id, index, || async {
                        agent
                            .generate(&system_prompt, &prompt, &[])
                            .await
                            .map_err(|e| e.to_string())
                    })
                    .await
            }
            .await;
            (index, agent_id, outcome)
        });
    }

    let deadline = timeout_seconds.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut results: Vec<Option<Result<String, String>>> = (0..n).map(|_| None).collect();
    let mut agent_ids_by_index: Vec<String> = vec![String::new(); n];
    let mut timed_out = false;

    loop {
        let next = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    timed_out = true;
                    join_set.abort_all();
                    break;
                }
                match tokio::time::timeout(remaining, join_set.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        join_set.abort_all();
                        break;
                    }
                }
            }
            None => join_set.join_next().await,
        };

        match next {
            Some(Ok((index, agent_id, outcome))) => {
                agent_ids_by_index[index] = agent_id;
                results[index] = Some(outcome);
            }
            Some(Err(_join_error)) => {
                // Task was aborted or panicked; leave its slot as None so the
                // merge step records it as an incomplete branch.
            }
            None => break,
        }
    }

    let mut trace = Vec::with_capacity(n);
    let mut outputs: Vec<Option<String>> = Vec::with_capacity(n);
    let mut any_success = false;
    for (index, result) in results.into_iter().enumerate() {
        match result {
            Some(Ok(output)) => {
                any_success = true;
                trace.push(BranchTrace::ok(index, agent_ids_by_index[index].clone(), output.clone()));
                outputs.push(Some(output));
            }
            Some(Err(error)) => {
                trace.push(BranchTrace::failed(index, agent_ids_by_index[index].clone(), error));
                outputs.push(None);
            }
            None => {
                trace.push(BranchTrace::failed(
                    index,
                    agent_ids_by_index[index].clone(),
                    "branch did not complete before timeout or was canceled".to_string(),
                ));
                outputs.push(None);
            }
        }
    }

    // A deadline that cuts branches off (including `timeout_seconds: 0`, which
    // elapses before any branch can even be awaited) always yields the merge
    // of whatever completed, even if that's nothing (spec §8 boundary
    // behavior: "timeout 0 returns empty merge"). The "all branches failed"
    // error only applies when every branch actually ran to completion and
    // every one of them errored — not when the deadline preempted them.
    if !any_success && !timed_out {
        return Err(OrchestrationError::Upstream(
            "all fork-join branches failed or timed out".to_string(),
        ));
    }

    let output = merge(merge_strategy, &outputs, &agent_ids_by_index);
    Ok(PatternOutput {
        output,
        branch_trace: trace,
    })
}

fn resolve_branches(
    agents: &[AgentSpec],
    agent_ids: &[String],
    shared_prompt: Option<&str>,
) -> Result<Vec<Branch>, OrchestrationError> {
    if !agents.is_empty() {
        agents
            .iter()
            .map(|a| {
                let prompt = a
                    .prompt_template
                    .clone()
                    .or_else(|| shared_prompt.map(|p| p.to_string()))
                    .ok_or_else(|| {
                        OrchestrationError::InvalidSpec(format!(
                            "agent {} has no prompt_template and no shared `prompt` was provided",
                            a.id
                        ))
                    })?;
                Ok(Branch {
                    agent_id: a.id.clone(),
                    prompt,
                })
            })
            .collect()
    } else {
        let prompt = shared_prompt
            .ok_or_else(|| OrchestrationError::InvalidSpec("fork_join with agent_ids requires a shared `prompt`".into()))?
            .to_string();
        Ok(agent_ids
            .iter()
            .map(|id| Branch {
                agent_id: id.clone(),
                prompt: prompt.clone(),
            })
            .collect())
    }
}

/// Fold branch outputs per `merge_strategy` (spec §4.2). `concatenate` merges
/// in declared spec order, not completion order, so the result is deterministic
/// regardless of which branch happened to finish first (spec §8: "Concatenate
/// merge is deterministic").
fn merge(strategy: &MergeStrategy, outputs: &[Option<String>], agent_ids: &[String]) -> String {
    match strategy {
        MergeStrategy::Concatenate => outputs
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().map(|text| format!("## {}\n{}", agent_ids[i], text)))
            .collect::<Vec<_>>()
            .join("\n\n"),
        MergeStrategy::Vote => {
            // Ballot tallying is swarm's concern (spec §4.2's "treats outputs as
            // ballots (see swarm)"); without confidence/strategy parameters this
            // degenerates to a plain plurality over verbatim output text.
            let mut tallies: Vec<(String, usize)> = Vec::new();
            for output in outputs.iter().flatten() {
                if let Some(entry) = tallies.iter_mut().find(|(v, _)| v == output) {
                    entry.1 += 1;
                } else {
                    tallies.push((output.clone(), 1));
                }
            }
            tallies
                .into_iter()
                .max_by_key(|(_, count)| *count)
                .map(|(v, _)| v)
                .unwrap_or_default()
        }
        MergeStrategy::Custom => outputs
            .iter()
            .filter_map(|o| o.clone())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
