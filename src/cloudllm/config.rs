//! Configuration for CloudLLM.
//!
//! Provides the [`CloudLLMConfig`] struct for configuring
//! [`ThoughtChain`](crate::ThoughtChain) storage, and [`RuntimeConfig`] for the
//! process-wide settings the orchestration engine, spawn manager, and pattern
//! recommender are parameterized by (semaphore capacity, spawn limits, monitor
//! intervals, recommender gate thresholds, and `LOOM_DATA_DIR`). Both are plain
//! structs users construct manually — no TOML/YAML config-file parsing is
//! introduced here; reading an actual config file is left to the external CLI
//! collaborator named in spec §6.
//!
//! # Example
//!
//! ```rust
//! use loomweave::CloudLLMConfig;
//! use std::path::PathBuf;
//!
//! // Use the default ("thought_chains" in the current directory)
//! let config = CloudLLMConfig::default();
//!
//! // Or specify a custom directory
//! let config = CloudLLMConfig {
//!     thought_chain_dir: PathBuf::from("/var/data/agent_chains"),
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Global configuration for CloudLLM features.
///
/// This struct is intentionally minimal and users construct it however they want.
/// No TOML, YAML, or other config-file parsing dependencies are introduced.
///
/// # Example
///
/// ```rust
/// use loomweave::CloudLLMConfig;
/// use std::path::PathBuf;
///
/// let config = CloudLLMConfig {
///     thought_chain_dir: PathBuf::from("/tmp/my_chains"),
/// };
/// ```
pub struct CloudLLMConfig {
    /// Directory where [`ThoughtChain`](crate::ThoughtChain) `.jsonl` files
    /// are stored.  Passed to [`ThoughtChain::open`](crate::ThoughtChain::open)
    /// as the `chain_dir` argument.
    pub thought_chain_dir: PathBuf,
}

impl Default for CloudLLMConfig {
    /// Create a config pointing at `"thought_chains"` in the current working
    /// directory.
    ///
    /// # Example
    ///
    /// ```rust
    /// use loomweave::CloudLLMConfig;
    /// use std::path::PathBuf;
    ///
    /// let config = CloudLLMConfig::default();
    /// assert_eq!(config.thought_chain_dir, PathBuf::from("thought_chains"));
    /// ```
    fn default() -> Self {
        Self {
            thought_chain_dir: PathBuf::from("thought_chains"),
        }
    }
}

/// Name of the environment variable the core consults to locate pattern
/// templates on disk (spec §6).
pub const LOOM_DATA_DIR_ENV: &str = "LOOM_DATA_DIR";

/// Process-wide, immutable-after-startup settings shared by the orchestrator,
/// the spawn manager, and the pattern recommender.
///
/// `RuntimeConfig` is constructed once by the hosting process (the server or a
/// test harness) and handed to `Orchestrator::new` / `SpawnManager::new` /
/// `PatternRecommender::new` as plain data — nothing in this crate reaches for
/// a hidden global. Defaults mirror the values named throughout spec.md.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Capacity of the process-wide LLM semaphore (spec §4.1). Default: `2`.
    pub llm_semaphore_capacity: usize,
    /// Maximum live children a single parent session may hold (spec §3). Default: `10`.
    pub max_spawns_per_parent: usize,
    /// Maximum spawn depth recorded alongside each child (spec §9). Default: `4`.
    pub max_spawn_depth: usize,
    /// How often the per-child monitor task ticks (spec §4.4). Default: `5s`.
    pub spawn_monitor_tick: Duration,
    /// How long a session may go without activity before the monitor reclaims it
    /// (spec §3). Default: `10min`.
    pub spawn_idle_timeout: Duration,
    /// Recommender gate: rerank when the top keyword score is below this (spec §4.5). Default: `0.70`.
    pub recommender_top_score_min: f32,
    /// Recommender gate: rerank when the top two scores are within this of each
    /// other (spec §4.5). Default: `0.20`.
    pub recommender_top_two_gap_max: f32,
    /// Recommender gate: score threshold used by the "three or more candidates"
    /// rule (spec §4.5). Default: `0.60`.
    pub recommender_high_score_threshold: f32,
    /// Recommender gate: how many candidates must clear
    /// `recommender_high_score_threshold` to trigger a rerank (spec §4.5). Default: `3`.
    pub recommender_high_score_count: usize,
    /// How long an LLM rerank decision is cached for the same `(query, candidates)`
    /// pair (spec §4.5). Default: `30min`.
    pub rerank_cache_ttl: Duration,
    /// Directory holding workflow pattern templates, resolved from `LOOM_DATA_DIR`
    /// (tilde-expanded, normalized to an absolute path) or `$HOME/.loom` if unset.
    pub data_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            llm_semaphore_capacity: 2,
            max_spawns_per_parent: 10,
            max_spawn_depth: 4,
            spawn_monitor_tick: Duration::from_secs(5),
            spawn_idle_timeout: Duration::from_secs(600),
            recommender_top_score_min: 0.70,
            recommender_top_two_gap_max: 0.20,
            recommender_high_score_threshold: 0.60,
            recommender_high_score_count: 3,
            rerank_cache_ttl: Duration::from_secs(1800),
            data_dir: resolve_data_dir(std::env::var(LOOM_DATA_DIR_ENV).ok()),
        }
    }
}

impl RuntimeConfig {
    /// Build a config from the process environment, applying the same
    /// `LOOM_DATA_DIR` resolution rules as [`Default`] but allowing callers to
    /// start from defaults and override individual fields afterward.
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Resolve `LOOM_DATA_DIR` into an absolute path: expand a leading `~`, and
/// normalize a relative path against the current working directory. Falls
/// back to `$HOME/.loom` when the variable is unset.
fn resolve_data_dir(raw: Option<String>) -> PathBuf {
    let raw = match raw {
        Some(v) if !v.is_empty() => v,
        _ => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            return PathBuf::from(home).join(".loom");
        }
    };

    let expanded = expand_tilde(&raw);
    if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(expanded)
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else if path == "~" {
        PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
    } else {
        PathBuf::from(path)
    }
}
