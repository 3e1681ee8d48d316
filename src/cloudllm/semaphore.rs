//! LLM-call concurrency gate shared across pattern executors.
//!
//! Every pattern executor (pipeline, fork-join, debate, conditional, swarm) routes its
//! actual LLM calls through one process-wide [`LlmSemaphore`] so that a fork-join over
//! twenty branches, or a swarm over a hundred agents, can't flood the provider with
//! concurrent requests just because the orchestration layer happens to run them
//! concurrently. It's a thin wrapper around `tokio::sync::Semaphore` that also emits
//! [`OrchestrationEvent`] checkpoints and logs acquire/release at debug level, tagged
//! with the orchestration run and branch index so a stalled run is diagnosable from
//! logs alone.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::cloudllm::event::{EventHandler, OrchestrationEvent};

/// Bounds how many LLM calls may be in flight across the whole orchestrator at once.
pub struct LlmSemaphore {
    inner: Semaphore,
    capacity: usize,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl LlmSemaphore {
    /// Create a semaphore admitting at most `capacity` concurrent LLM calls.
    pub fn new(capacity: usize) -> Self {
        LlmSemaphore {
            inner: Semaphore::new(capacity),
            capacity,
            event_handler: None,
        }
    }

    /// Attach an event handler; acquire/acquired/released checkpoints are emitted
    /// through it from this point on.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Total permit capacity this semaphore was constructed with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently available (not an exact live count under contention, but
    /// useful for logging and tests).
    pub fn available_permits(&self) -> usize {
        self.inner.available_permits()
    }

    /// Acquire one permit, blocking until one is free. `orchestration_id`/`branch_index`
    /// label the caller for logging and events.
    pub async fn acquire(&self, orchestration_id: &str, branch_index: usize) -> SemaphorePermit<'_> {
        log::debug!(
            "semaphore: run `{}` branch {} requesting permit ({} available of {})",
            orchestration_id,
            branch_index,
            self.inner.available_permits(),
            self.capacity
        );
        if let Some(handler) = &self.event_handler {
            handler
                .on_orchestration_event(&OrchestrationEvent::SemaphoreAcquireRequested {
                    orchestration_id: orchestration_id.to_string(),
                    branch_index,
                })
                .await;
        }

        let permit = self
            .inner
            .acquire()
            .await
            .expect("LlmSemaphore is never closed");

        log::debug!(
            "semaphore: run `{}` branch {} acquired permit",
            orchestration_id,
            branch_index
        );
        if let Some(handler) = &self.event_handler {
            handler
                .on_orchestration_event(&OrchestrationEvent::SemaphoreAcquired {
                    orchestration_id: orchestration_id.to_string(),
                    branch_index,
                })
                .await;
        }

        permit
    }

    /// Run `f` while holding one permit, releasing it (and emitting the release
    /// event) as soon as `f`'s future resolves, regardless of success or failure.
    pub async fn run_gated<F, Fut, T>(&self, orchestration_id: &str, branch_index: usize, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _permit = self.acquire(orchestration_id, branch_index).await;
        let result = f().await;
        log::debug!(
            "semaphore: run `{}` branch {} releasing permit",
            orchestration_id,
            branch_index
        );
        if let Some(handler) = &self.event_handler {
            handler
                .on_orchestration_event(&OrchestrationEvent::SemaphoreReleased {
                    orchestration_id: orchestration_id.to_string(),
                    branch_index,
                })
                .await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn run_gated_limits_concurrency_to_capacity() {
        let sem = Arc::new(LlmSemaphore::new(2));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_observed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let sem = sem.clone();
            let in_flight = in_flight.clone();
            let max_observed = max_observed.clone();
            handles.push(tokio::spawn(async move {
                sem.run_gated("run-1", i, || async {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
        assert_eq!(sem.available_permits(), 2);
    }

    #[tokio::test]
    async fn acquire_releases_permit_on_drop() {
        let sem = LlmSemaphore::new(1);
        assert_eq!(sem.available_permits(), 1);
        {
            let _permit = sem.acquire("run-1", 0).await;
            assert_eq!(sem.available_permits(), 0);
        }
        assert_eq!(sem.available_permits(), 1);
    }
}
