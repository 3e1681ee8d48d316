//! Pattern executors (spec §4.2): pipeline, fork-join, parallel, debate,
//! conditional, and swarm, each conforming to the common contract named in
//! spec §4.2 — accept `(ctx, spec, input)`, return `(output, per_branch_trace)`
//! or an error, honor cancellation, and log semaphore acquire/release at debug
//! level tagged with the branch index (the semaphore itself does the logging;
//! see [`crate::cloudllm::semaphore::LlmSemaphore`]).
//!
//! These are free functions over a shared
//! [`ExecutionContext`](crate::cloudllm::orchestrator::ExecutionContext) rather
//! than a trait object per pattern (spec §9: "no open-class inheritance is
//! required" — the orchestrator's `match` on [`WorkflowSpec`] is the dispatch).

pub mod conditional;
pub mod debate;
pub mod fork_join;
pub mod pipeline;
pub mod swarm;

/// Substitute the literal token `{{previous}}` in `template` with `previous`.
/// Deliberately not a templating-engine dependency (`handlebars`, `tera`, ...)
/// since spec §6 only documents this one placeholder across every pattern's
/// `prompt_template` field.
pub(crate) fn render_template(template: &str, previous: &str) -> String {
    template.replace("{{previous}}", previous)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_template_substitutes_previous_placeholder() {
        assert_eq!(render_template("got:{{previous}}", "x"), "got:x");
        assert_eq!(render_template("no placeholder", "x"), "no placeholder");
    }
}
