//! Orchestration error taxonomy.
//!
//! Every pattern executor, the message bus, and the spawn manager report failures
//! through [`OrchestrationError`], a closed set of kinds mirroring the cases an
//! operator actually needs to distinguish: a malformed workflow spec, an unknown
//! pattern tag, a classifier output that didn't map to a declared branch, a spawn
//! quota breach, an unroutable recipient, a full subscription buffer, an upstream LLM
//! failure, a deadline, or a cancellation. [`OrchestrationError::to_user_error`]
//! renders any of these as a small structured payload suitable for returning across
//! an API boundary without leaking internal detail.

use std::error::Error;
use std::fmt;

/// Closed set of orchestration-level failure kinds.
#[derive(Debug, Clone)]
pub enum OrchestrationError {
    /// A workflow spec failed validation (e.g. empty `branches`, missing required
    /// field, unknown merge strategy).
    InvalidSpec(String),
    /// The `type` discriminator in a workflow spec did not match any known pattern.
    UnknownPattern(String),
    /// A conditional pattern's classifier output did not match any declared branch
    /// and no `"default"` branch was configured.
    ClassificationUnmatched(String),
    /// A spawn request would exceed `MAX_SPAWNS_PER_PARENT` or `MAX_SPAWN_DEPTH`.
    SpawnLimitReached(String),
    /// A direct-message send targeted a session id with no registered queue.
    RecipientNotFound(String),
    /// A publish or send could not be buffered because the target was full.
    QueueFull(String),
    /// The underlying LLM call failed (network, auth, malformed response).
    Upstream(String),
    /// An operation did not complete before its deadline.
    Timeout(String),
    /// An operation was explicitly canceled.
    Canceled(String),
    /// An invariant was violated that should be unreachable in correct usage.
    Internal(String),
}

impl OrchestrationError {
    /// Stable machine-readable code for this error kind, for structured APIs.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestrationError::InvalidSpec(_) => "invalid_spec",
            OrchestrationError::UnknownPattern(_) => "unknown_pattern",
            OrchestrationError::ClassificationUnmatched(_) => "classification_unmatched",
            OrchestrationError::SpawnLimitReached(_) => "spawn_limit_reached",
            OrchestrationError::RecipientNotFound(_) => "recipient_not_found",
            OrchestrationError::QueueFull(_) => "queue_full",
            OrchestrationError::Upstream(_) => "upstream",
            OrchestrationError::Timeout(_) => "timeout",
            OrchestrationError::Canceled(_) => "canceled",
            OrchestrationError::Internal(_) => "internal",
        }
    }

    /// Whether a caller should expect a retry to plausibly succeed.
    ///
    /// Validation and routing errors are never retryable — retrying without
    /// changing the request just reproduces the same failure. Upstream and timeout
    /// errors usually are.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            OrchestrationError::Upstream(_) | OrchestrationError::Timeout(_) | OrchestrationError::QueueFull(_)
        )
    }

    fn suggestion(&self) -> Option<&'static str> {
        match self {
            OrchestrationError::InvalidSpec(_) => {
                Some("check the workflow spec against the documented schema for its `type`")
            }
            OrchestrationError::UnknownPattern(_) => {
                Some("use one of: pipeline, fork_join, debate, conditional, swarm")
            }
            OrchestrationError::ClassificationUnmatched(_) => {
                Some("add a \"default\" branch or broaden the classifier's prompt")
            }
            OrchestrationError::SpawnLimitReached(_) => {
                Some("clean up idle children or raise MAX_SPAWNS_PER_PARENT / MAX_SPAWN_DEPTH")
            }
            OrchestrationError::RecipientNotFound(_) => {
                Some("confirm the target session id was registered with the bus before sending")
            }
            OrchestrationError::QueueFull(_) => Some("retry after a short backoff"),
            OrchestrationError::Upstream(_) => Some("retry with backoff; check provider status"),
            OrchestrationError::Timeout(_) => Some("retry with a longer deadline or smaller request"),
            OrchestrationError::Canceled(_) | OrchestrationError::Internal(_) => None,
        }
    }

    /// Render a structured `{code, message, suggestion, retryable}` payload.
    pub fn to_user_error(&self) -> UserError {
        UserError {
            code: self.code().to_string(),
            message: self.to_string(),
            suggestion: self.suggestion().map(|s| s.to_string()),
            retryable: self.retryable(),
        }
    }
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestrationError::InvalidSpec(msg) => write!(f, "invalid workflow spec: {}", msg),
            OrchestrationError::UnknownPattern(tag) => write!(f, "unknown pattern type: {}", tag),
            OrchestrationError::ClassificationUnmatched(key) => {
                write!(f, "classifier output did not match a declared branch: {}", key)
            }
            OrchestrationError::SpawnLimitReached(msg) => write!(f, "spawn limit reached: {}", msg),
            OrchestrationError::RecipientNotFound(id) => write!(f, "recipient not found: {}", id),
            OrchestrationError::QueueFull(target) => write!(f, "queue full: {}", target),
            OrchestrationError::Upstream(msg) => write!(f, "upstream LLM error: {}", msg),
            OrchestrationError::Timeout(msg) => write!(f, "operation timed out: {}", msg),
            OrchestrationError::Canceled(msg) => write!(f, "operation canceled: {}", msg),
            OrchestrationError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl Error for OrchestrationError {}

/// Structured, API-safe rendering of an [`OrchestrationError`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserError {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message. Safe to display, contains no internal paths/secrets.
    pub message: String,
    /// Optional actionable next step.
    pub suggestion: Option<String>,
    /// Whether retrying the same request might succeed.
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_errors_are_retryable_validation_errors_are_not() {
        assert!(OrchestrationError::Upstream("boom".into()).retryable());
        assert!(OrchestrationError::Timeout("slow".into()).retryable());
        assert!(!OrchestrationError::InvalidSpec("bad".into()).retryable());
        assert!(!OrchestrationError::UnknownPattern("x".into()).retryable());
    }

    #[test]
    fn to_user_error_carries_code_and_suggestion() {
        let err = OrchestrationError::SpawnLimitReached("parent p1 at 10/10".into());
        let user = err.to_user_error();
        assert_eq!(user.code, "spawn_limit_reached");
        assert!(user.suggestion.is_some());
        assert!(!user.retryable);
        assert!(user.message.contains("p1"));
    }

    #[test]
    fn classification_unmatched_has_no_retry() {
        let err = OrchestrationError::ClassificationUnmatched("unexpected_key".into());
        assert!(!err.retryable());
        assert!(err.to_string().contains("unexpected_key"));
    }
}
