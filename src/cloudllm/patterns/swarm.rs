//! Swarm executor (spec §4.2): parallel voters, each asked to return a
//! `{"vote": ..., "confidence": ...}` ballot, tallied against `strategy`
//! (`majority`/`supermajority`/`unanimous`) with ballots below
//! `confidence_threshold` excluded from the tally. An optional `judge` agent
//! breaks a tie or a missed threshold; `share_votes` controls whether the judge
//! sees every ballot verbatim or only the aggregated tally.
//!
//! Voters use the same semaphore discipline as fork-join: one independent
//! `acquire` per voter, no serialization of the launch dispatch.

use std::collections::HashMap;

use serde::Deserialize;
use tokio::task::JoinSet;

use crate::cloudllm::error::OrchestrationError;
use crate::cloudllm::event::OrchestrationEvent;
use crate::cloudllm::orchestrator::{BranchTrace, ExecutionContext, PatternOutput};
use crate::cloudllm::workflow_spec::{SwarmStrategy, WorkflowSpec};

#[derive(Debug, Deserialize)]
struct Ballot {
    vote: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

pub async fn run(
    ctx: &ExecutionContext,
    spec: &WorkflowSpec,
    initial_input: &str,
) -> Result<PatternOutput, OrchestrationError> {
    let (agents, strategy, confidence_threshold, share_votes, judge) = match spec {
        WorkflowSpec::Swarm { agents, strategy, confidence_threshold, share_votes, judge } => {
            (agents, strategy, *confidence_threshold, *share_votes, judge)
        }
        _ => return Err(OrchestrationError::Internal("swarm executor received non-swarm spec".into())),
    };

    let mut join_set: JoinSet<(usize, String, Result<String, String>)> = JoinSet::new();
    for (index, voter) in agents.iter().enumerate() {
        let resolver = std::sync::Arc::clone(&ctx.resolver);
        let semaphore = std::sync::Arc::clone(&ctx.llm_semaphore);
        let orchestration_id = ctx.orchestration_id.clone();
        let agent_id = voter.id.clone();
        let prompt = voter
            .prompt_template
            .clone()
            .unwrap_or_else(|| initial_input.to_string());
        join_set.spawn(async move {
            let outcome = async {
                let agent = resolver.resolve(&agent_id).await.map_err(|e| e.to_string())?;
                let system_prompt = agent.base_system_prompt.clone();
                semaphore
                    .run_gated(&orchestration_id, index, || async {
                        agent.generate(&system_prompt, &prompt, &[]).await.map_err(|e| e.to_string())
                    })
                    .await
            }
            .await;
            (index, agent_id, outcome)
        });
    }

    let mut raw_outputs: Vec<Option<(String, String)>> = (0..agents.len()).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        if let Ok((index, agent_id, outcome)) = joined {
            if let Ok(output) = outcome {
                raw_outputs[index] = Some((agent_id, output));
            } else if let Err(error) = outcome {
                raw_outputs[index] = Some((agent_id, format!("{{\"vote\": \"\", \"error\": {:?}}}", error)));
            }
        }
    }

    let mut trace = Vec::with_capacity(agents.len());
    let mut ballots: Vec<(String, Ballot)> = Vec::new();
    for (index, entry) in raw_outputs.into_iter().enumerate() {
        let (agent_id, text) = entry.unwrap_or_else(|| (agents[index].id.clone(), String::new()));
        match parse_ballot(&text) {
            Some(ballot) => {
                let qualified = ballot.confidence >= confidence_threshold;
                ctx.emit(OrchestrationEvent::VoteTallied {
                    orchestration_id: ctx.orchestration_id.clone(),
                    branch_index: index,
                    vote: ballot.vote.clone(),
                    confidence: ballot.confidence,
                    qualified,
                })
                .await;
                trace.push(BranchTrace::ok(index, agent_id.clone(), text.clone()));
                if qualified {
                    ballots.push((agent_id, ballot));
                }
            }
            None => {
                trace.push(BranchTrace::failed(index, agent_id, format!("unparseable ballot: {}", text)));
            }
        }
    }

    let tally = tally_votes(&ballots);
    let (winner, reached) = evaluate_strategy(strategy, &tally, ballots.len());

    let (final_output, judge_invoked) = if reached {
        (winner.unwrap_or_default(), false)
    } else if let Some(judge_spec) = judge {
        let judge_prompt = if share_votes {
            let lines: Vec<String> = ballots.iter().map(|(id, b)| format!("{}: {} ({:.2})", id, b.vote, b.confidence)).collect();
            format!("No consensus was reached. Ballots:\n{}\n\nDecide the final answer.", lines.join("\n"))
        } else {
            let lines: Vec<String> = tally.iter().map(|(v, c)| format!("{}: {} votes", v, c)).collect();
            format!("No consensus was reached. Tally:\n{}\n\nDecide the final answer.", lines.join("\n"))
        };
        let agent = ctx.resolver.resolve(&judge_spec.id).await?;
        let system_prompt = agent.base_system_prompt.clone();
        let output = ctx
            .llm_semaphore
            .run_gated(&ctx.orchestration_id, agents.len(), || async {
                agent.generate(&system_prompt, &judge_prompt, &[]).await
            })
            .await
            .map_err(|e| OrchestrationError::Upstream(format!("swarm judge failed: {}", e)))?;
        trace.push(BranchTrace::ok(agents.len(), judge_spec.id.clone(), output.clone()));
        (output, true)
    } else {
        ctx.emit(OrchestrationEvent::ConsensusReached {
            orchestration_id: ctx.orchestration_id.clone(),
            reached: false,
            judge_invoked: false,
        })
        .await;
        return Err(OrchestrationError::Upstream(
            "swarm failed to reach consensus and no judge was configured".to_string(),
        ));
    };

    ctx.emit(OrchestrationEvent::ConsensusReached {
        orchestration_id: ctx.orchestration_id.clone(),
        reached: true,
        judge_invoked,
    })
    .await;

    Ok(PatternOutput { output: final_output, branch_trace: trace })
}

fn parse_ballot(text: &str) -> Option<Ballot> {
    let trimmed = strip_code_fence(text.trim());
    serde_json::from_str(trimmed).ok()
}

fn strip_code_fence(text: &str) -> &str {
    let text = text.strip_prefix("```json").or_else(|| text.strip_prefix("```")).unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

fn tally_votes(ballots: &[(String, Ballot)]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for (_, ballot) in ballots {
        *counts.entry(ballot.vote.as_str()).or_insert(0) += 1;
    }
    let mut tally: Vec<(String, usize)> = counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    tally.sort_by(|a, b| b.1.cmp(&a.1));
    tally
}

fn evaluate_strategy(strategy: &SwarmStrategy, tally: &[(String, usize)], total_qualified: usize) -> (Option<String>, bool) {
    if total_qualified == 0 || tally.is_empty() {
        return (None, false);
    }
    let (top_vote, top_count) = &tally[0];
    let reached = match strategy {
        SwarmStrategy::Majority => *top_count * 2 > total_qualified,
        SwarmStrategy::Supermajority => *top_count as f32 >= 0.66 * total_qualified as f32,
        SwarmStrategy::Unanimous => *top_count == total_qualified,
    };
    (Some(top_vote.clone()), reached)
}
