//! Pattern template library (spec §2 "Pattern library + recommender" / §6
//! `LOOM_DATA_DIR`): loads workflow pattern templates from disk so the
//! recommender has a candidate set to score, and so a selected pattern name
//! resolves back to an executable [`WorkflowSpec`].
//!
//! A template file is a workflow YAML file (the same `spec:`-enveloped format
//! `WorkflowFile` parses) with recommender metadata attached at the top level:
//!
//! ```yaml
//! name: research-pipeline
//! title: Research Pipeline
//! category: research
//! description: Sequential research-then-write pipeline.
//! use_cases:
//!   - summarize a topic end to end
//! spec:
//!   type: pipeline
//!   initial_prompt: "{{query}}"
//!   stages:
//!     - agent_id: researcher
//!       prompt_template: "{{previous}}"
//! ```
//!
//! Loading never fails the whole library over one bad file: a template that
//! fails to parse is skipped and logged, matching the recommender's own
//! "degrade, never propagate" posture (spec §7) for the template source it
//! reads from.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::cloudllm::error::OrchestrationError;
use crate::cloudllm::recommender::PatternSummary;
use crate::cloudllm::workflow_spec::WorkflowSpec;

/// One template on disk: recommender-facing metadata plus the executable spec.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternTemplate {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub use_cases: Vec<String>,
    pub spec: WorkflowSpec,
}

impl PatternTemplate {
    fn from_yaml(yaml: &str) -> Result<Self, OrchestrationError> {
        let template: PatternTemplate =
            serde_yaml::from_str(yaml).map_err(|e| OrchestrationError::InvalidSpec(e.to_string()))?;
        template.spec.validate()?;
        Ok(template)
    }

    pub fn summary(&self) -> PatternSummary {
        PatternSummary {
            name: self.name.clone(),
            title: self.title.clone().unwrap_or_else(|| self.name.clone()),
            category: self.category.clone().unwrap_or_else(|| "general".to_string()),
            description: self.description.clone().unwrap_or_default(),
            use_cases: self.use_cases.clone(),
        }
    }
}

/// An in-memory collection of loaded templates, keyed by `name`.
#[derive(Debug, Clone, Default)]
pub struct PatternLibrary {
    templates: HashMap<String, PatternTemplate>,
}

impl PatternLibrary {
    pub fn new() -> Self {
        PatternLibrary {
            templates: HashMap::new(),
        }
    }

    /// Load every `*.yaml` / `*.yml` file directly under `dir` as a
    /// [`PatternTemplate`]. Missing directories yield an empty library rather
    /// than an error — a fresh `LOOM_DATA_DIR` with no templates installed yet
    /// is a normal starting state, not a fault.
    pub fn load_from_dir(dir: &Path) -> Result<Self, OrchestrationError> {
        let mut library = PatternLibrary::new();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(library),
            Err(e) => return Err(OrchestrationError::Internal(format!("reading {}: {}", dir.display(), e))),
        };

        for entry in entries {
            let entry = entry.map_err(|e| OrchestrationError::Internal(e.to_string()))?;
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(contents) => match PatternTemplate::from_yaml(&contents) {
                    Ok(template) => {
                        library.templates.insert(template.name.clone(), template);
                    }
                    Err(e) => log::warn!("pattern_library: skipping {}: {}", path.display(), e),
                },
                Err(e) => log::warn!("pattern_library: could not read {}: {}", path.display(), e),
            }
        }
        Ok(library)
    }

    pub fn insert(&mut self, template: PatternTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Recommender-facing summaries for every loaded template, in insertion
    /// order via a stable name sort (deterministic candidate ordering for
    /// scoring/merge tie-breaks).
    pub fn summaries(&self) -> Vec<PatternSummary> {
        let mut names: Vec<&String> = self.templates.keys().collect();
        names.sort();
        names.into_iter().map(|n| self.templates[n].summary()).collect()
    }

    /// Resolve a recommender-selected pattern name back to its executable spec.
    pub fn get(&self, name: &str) -> Option<&WorkflowSpec> {
        self.templates.get(name).map(|t| &t.spec)
    }

    pub fn template(&self, name: &str) -> Option<&PatternTemplate> {
        self.templates.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_template(dir: &Path, filename: &str, contents: &str) {
        let mut f = fs::File::create(dir.join(filename)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    const PIPELINE_TEMPLATE: &str = r#"
name: research-pipeline
title: Research Pipeline
category: research
description: Sequential research-then-write pipeline.
use_cases:
  - summarize a topic end to end
spec:
  type: pipeline
  initial_prompt: "{{query}}"
  stages:
    - agent_id: researcher
      prompt_template: "{{previous}}"
"#;

    #[test]
    fn loads_templates_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "research.yaml", PIPELINE_TEMPLATE);
        write_template(dir.path(), "notes.txt", "not a template");

        let library = PatternLibrary::load_from_dir(dir.path()).unwrap();
        assert_eq!(library.len(), 1);
        let summaries = library.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].name, "research-pipeline");
        assert_eq!(summaries[0].category, "research");
        assert!(library.get("research-pipeline").is_some());
    }

    #[test]
    fn missing_directory_yields_empty_library() {
        let library = PatternLibrary::load_from_dir(Path::new("/nonexistent/loom/dir")).unwrap();
        assert!(library.is_empty());
    }

    #[test]
    fn malformed_template_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "good.yaml", PIPELINE_TEMPLATE);
        write_template(dir.path(), "bad.yaml", "name: broken\nspec:\n  type: pipeline\n  stages: []\n");

        let library = PatternLibrary::load_from_dir(dir.path()).unwrap();
        assert_eq!(library.len(), 1);
        assert!(library.get("broken").is_none());
    }

    #[test]
    fn get_resolves_name_back_to_executable_spec() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), "research.yaml", PIPELINE_TEMPLATE);
        let library = PatternLibrary::load_from_dir(dir.path()).unwrap();
        match library.get("research-pipeline") {
            Some(WorkflowSpec::Pipeline { initial_prompt, .. }) => {
                assert_eq!(initial_prompt, "{{query}}");
            }
            other => panic!("expected pipeline spec, got {:?}", other),
        }
    }
}
