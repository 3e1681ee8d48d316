//! Workflow spec parsing.
//!
//! Pattern templates are authored as YAML with a `type` discriminator (`pipeline`,
//! `fork_join`, `parallel`, `debate`, `conditional`, `swarm`) and pattern-specific
//! fields. Field names here are bit-exact with the documented format — `type` (not
//! `pattern`), `prompt_template`, `timeout_seconds`, etc. — since external tooling
//! (validators, editors, the `workflow validate`/`workflow run` CLI) round-trips
//! these files and any rename breaks that compatibility.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cloudllm::error::OrchestrationError;

/// One participant declared in a workflow spec.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub prompt_template: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// One pipeline stage: which agent runs it and how its prompt is rendered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSpec {
    pub agent_id: String,
    pub prompt_template: String,
    #[serde(default)]
    pub continue_on_error: bool,
}

/// How a fork-join/parallel/swarm run folds its branch outputs into one result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Concatenate,
    Vote,
    Custom,
}

/// How a debate's moderator is invoked across rounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModeratorCadence {
    FinalOnly,
    EveryRound,
}

impl Default for ModeratorCadence {
    fn default() -> Self {
        ModeratorCadence::FinalOnly
    }
}

/// Swarm consensus strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStrategy {
    Majority,
    Supermajority,
    Unanimous,
}

/// One branch of a conditional workflow, keyed by the classifier's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchSpec {
    pub agent_id: String,
    #[serde(default)]
    pub prompt_template: Option<String>,
}

/// Tagged union over every supported pattern's template. The `type` field is the
/// discriminator, matching the documented external format exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowSpec {
    Pipeline {
        #[serde(default)]
        agents: Vec<AgentSpec>,
        initial_prompt: String,
        stages: Vec<StageSpec>,
        #[serde(default)]
        pass_full_history: bool,
    },
    ForkJoin {
        #[serde(default)]
        agents: Vec<AgentSpec>,
        #[serde(default)]
        agent_ids: Vec<String>,
        #[serde(default)]
        prompt: Option<String>,
        merge_strategy: MergeStrategy,
        #[serde(default)]
        timeout_seconds: Option<u64>,
    },
    Parallel {
        #[serde(default)]
        agents: Vec<AgentSpec>,
        #[serde(default)]
        agent_ids: Vec<String>,
        #[serde(default)]
        prompt: Option<String>,
        merge_strategy: MergeStrategy,
        #[serde(default)]
        timeout_seconds: Option<u64>,
    },
    Debate {
        agents: Vec<AgentSpec>,
        rounds: u32,
        #[serde(default)]
        moderator_cadence: ModeratorCadence,
    },
    Conditional {
        agents: Vec<AgentSpec>,
        #[serde(default)]
        branches: HashMap<String, BranchSpec>,
    },
    Swarm {
        agents: Vec<AgentSpec>,
        strategy: SwarmStrategy,
        confidence_threshold: f32,
        #[serde(default)]
        share_votes: bool,
        #[serde(default)]
        judge: Option<AgentSpec>,
    },
}

impl WorkflowSpec {
    /// The `type` discriminator string for this spec, as it would appear in YAML.
    pub fn type_tag(&self) -> &'static str {
        match self {
            WorkflowSpec::Pipeline { .. } => "pipeline",
            WorkflowSpec::ForkJoin { .. } => "fork_join",
            WorkflowSpec::Parallel { .. } => "parallel",
            WorkflowSpec::Debate { .. } => "debate",
            WorkflowSpec::Conditional { .. } => "conditional",
            WorkflowSpec::Swarm { .. } => "swarm",
        }
    }

    /// Parse a workflow spec from its YAML text (the `spec:` document body, not
    /// the wrapping envelope).
    pub fn from_yaml(yaml: &str) -> Result<Self, OrchestrationError> {
        let spec: WorkflowSpec =
            serde_yaml::from_str(yaml).map_err(|e| OrchestrationError::InvalidSpec(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Serialize back to YAML. Used for the `workflow validate` round-trip check
    /// and for caching resolved templates to disk.
    pub fn to_yaml(&self) -> Result<String, OrchestrationError> {
        serde_yaml::to_string(self).map_err(|e| OrchestrationError::Internal(e.to_string()))
    }

    /// Structural validation beyond what serde's required-field deserialization
    /// already enforces — the checks a `workflow validate` CLI call needs before a
    /// spec is handed to an executor.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        match self {
            WorkflowSpec::Pipeline { stages, .. } => {
                if stages.is_empty() {
                    return Err(OrchestrationError::InvalidSpec(
                        "pipeline spec requires at least one stage".into(),
                    ));
                }
            }
            WorkflowSpec::ForkJoin { agents, agent_ids, .. }
            | WorkflowSpec::Parallel { agents, agent_ids, .. } => {
                if agents.is_empty() && agent_ids.is_empty() {
                    return Err(OrchestrationError::InvalidSpec(
                        "fork_join/parallel spec requires agents or agent_ids".into(),
                    ));
                }
            }
            WorkflowSpec::Debate { agents, rounds, .. } => {
                if *rounds < 1 {
                    return Err(OrchestrationError::InvalidSpec("debate rounds must be >= 1".into()));
                }
                if agents.is_empty() {
                    return Err(OrchestrationError::InvalidSpec("debate spec requires agents".into()));
                }
            }
            WorkflowSpec::Conditional { branches, .. } => {
                if branches.is_empty() {
                    return Err(OrchestrationError::InvalidSpec(
                        "conditional spec requires a non-empty branches map".into(),
                    ));
                }
            }
            WorkflowSpec::Swarm {
                agents,
                confidence_threshold,
                ..
            } => {
                if agents.is_empty() {
                    return Err(OrchestrationError::InvalidSpec("swarm spec requires agents".into()));
                }
                if !(0.0..=1.0).contains(confidence_threshold) {
                    return Err(OrchestrationError::InvalidSpec(
                        "swarm confidence_threshold must be in [0,1]".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The wrapping envelope most workflow files use: a top-level `spec:` key holding
/// the tagged union.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFile {
    pub spec: WorkflowSpec,
}

impl WorkflowFile {
    pub fn from_yaml(yaml: &str) -> Result<Self, OrchestrationError> {
        let file: WorkflowFile =
            serde_yaml::from_str(yaml).map_err(|e| OrchestrationError::InvalidSpec(e.to_string()))?;
        file.spec.validate()?;
        Ok(file)
    }
}

/// How agents in a pub/sub communication workflow are wired together (spec §6
/// "Communication spec").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CommunicationPattern {
    PeerToPeerPubSub,
    HubAndSpoke,
}

/// One named participant in a communication-spec workflow: a display name
/// bound to an `agent_id` the registry resolves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunicationAgentRef {
    pub name: String,
    pub agent: String,
}

/// The `communication:` block of a communication-spec workflow: the topology
/// and the single topic every participant subscribes to / publishes on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunicationTopology {
    pub pattern: CommunicationPattern,
    pub topic: String,
}

/// Pub/sub workflow format (spec §6, distinct from the pattern-executor
/// `WorkflowSpec`): names an `entrypoint` agent, the roster of participating
/// agents, and how they communicate. This format has no `type` discriminator
/// and is not dispatched by the orchestrator's pattern executors — it
/// describes a bus topology the hosting server wires up directly via
/// `MessageBus::subscribe`/`publish`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunicationSpec {
    pub entrypoint: String,
    pub agents: Vec<CommunicationAgentRef>,
    pub communication: CommunicationTopology,
}

impl CommunicationSpec {
    pub fn from_yaml(yaml: &str) -> Result<Self, OrchestrationError> {
        let spec: CommunicationSpec =
            serde_yaml::from_str(yaml).map_err(|e| OrchestrationError::InvalidSpec(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn to_yaml(&self) -> Result<String, OrchestrationError> {
        serde_yaml::to_string(self).map_err(|e| OrchestrationError::Internal(e.to_string()))
    }

    /// The `entrypoint` must name one of the declared `agents`, and at least
    /// one agent must be declared.
    pub fn validate(&self) -> Result<(), OrchestrationError> {
        if self.agents.is_empty() {
            return Err(OrchestrationError::InvalidSpec(
                "communication spec requires at least one agent".into(),
            ));
        }
        if !self.agents.iter().any(|a| a.name == self.entrypoint) {
            return Err(OrchestrationError::InvalidSpec(format!(
                "entrypoint \"{}\" does not name a declared agent",
                self.entrypoint
            )));
        }
        if self.communication.topic.is_empty() {
            return Err(OrchestrationError::InvalidSpec(
                "communication spec requires a non-empty topic".into(),
            ));
        }
        Ok(())
    }
}

/// Wrapping `spec:` envelope for [`CommunicationSpec`], mirroring
/// [`WorkflowFile`] for the pattern-executor format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationFile {
    pub spec: CommunicationSpec,
}

impl CommunicationFile {
    pub fn from_yaml(yaml: &str) -> Result<Self, OrchestrationError> {
        let file: CommunicationFile =
            serde_yaml::from_str(yaml).map_err(|e| OrchestrationError::InvalidSpec(e.to_string()))?;
        file.spec.validate()?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipeline_spec_with_bit_exact_field_names() {
        let yaml = r#"
type: pipeline
initial_prompt: "x"
pass_full_history: false
stages:
  - agent_id: a
    prompt_template: "got:{{previous}}"
  - agent_id: b
    prompt_template: "got:{{previous}}"
"#;
        let spec = WorkflowSpec::from_yaml(yaml).unwrap();
        match &spec {
            WorkflowSpec::Pipeline { stages, initial_prompt, .. } => {
                assert_eq!(initial_prompt, "x");
                assert_eq!(stages.len(), 2);
                assert_eq!(stages[0].agent_id, "a");
            }
            _ => panic!("expected pipeline"),
        }
        assert_eq!(spec.type_tag(), "pipeline");
    }

    #[test]
    fn round_trip_yaml_preserves_structure() {
        let yaml = r#"
type: swarm
agents:
  - id: v1
  - id: v2
strategy: unanimous
confidence_threshold: 0.7
share_votes: true
"#;
        let spec = WorkflowSpec::from_yaml(yaml).unwrap();
        let serialized = spec.to_yaml().unwrap();
        let reparsed = WorkflowSpec::from_yaml(&serialized).unwrap();
        assert_eq!(spec, reparsed);
    }

    #[test]
    fn empty_pipeline_stages_rejected() {
        let yaml = r#"
type: pipeline
initial_prompt: "x"
stages: []
"#;
        let err = WorkflowSpec::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "invalid_spec");
    }

    #[test]
    fn conditional_requires_non_empty_branches() {
        let yaml = r#"
type: conditional
agents:
  - id: classifier
    role: classifier
branches: {}
"#;
        let err = WorkflowSpec::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "invalid_spec");
    }

    #[test]
    fn unknown_type_tag_is_invalid_spec_not_panic() {
        let yaml = "type: not_a_real_pattern\n";
        let err = WorkflowSpec::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "invalid_spec");
    }

    #[test]
    fn wrapping_envelope_parses_through_spec_key() {
        let yaml = r#"
spec:
  type: debate
  rounds: 2
  agents:
    - id: d1
      role: debater
    - id: mod1
      role: moderator
"#;
        let file = WorkflowFile::from_yaml(yaml).unwrap();
        assert_eq!(file.spec.type_tag(), "debate");
    }

    #[test]
    fn parses_communication_spec_with_bit_exact_field_names() {
        let yaml = r#"
spec:
  entrypoint: coordinator
  agents:
    - name: coordinator
      agent: coordinator-agent
    - name: worker
      agent: worker-agent
  communication:
    pattern: peer-to-peer-pub-sub
    topic: tasks
"#;
        let file = CommunicationFile::from_yaml(yaml).unwrap();
        assert_eq!(file.spec.entrypoint, "coordinator");
        assert_eq!(file.spec.agents.len(), 2);
        assert_eq!(file.spec.communication.pattern, CommunicationPattern::PeerToPeerPubSub);
        assert_eq!(file.spec.communication.topic, "tasks");
    }

    #[test]
    fn communication_spec_rejects_unknown_entrypoint() {
        let yaml = r#"
entrypoint: ghost
agents:
  - name: worker
    agent: worker-agent
communication:
  pattern: hub-and-spoke
  topic: tasks
"#;
        let err = CommunicationSpec::from_yaml(yaml).unwrap_err();
        assert_eq!(err.code(), "invalid_spec");
    }

    #[test]
    fn communication_spec_round_trips() {
        let spec = CommunicationSpec {
            entrypoint: "hub".to_string(),
            agents: vec![CommunicationAgentRef {
                name: "hub".to_string(),
                agent: "hub-agent".to_string(),
            }],
            communication: CommunicationTopology {
                pattern: CommunicationPattern::HubAndSpoke,
                topic: "broadcast".to_string(),
            },
        };
        let yaml = spec.to_yaml().unwrap();
        let reparsed = CommunicationSpec::from_yaml(&yaml).unwrap();
        assert_eq!(spec, reparsed);
    }
}
