//! The spawn manager (spec §4.4): parent→child session graph, bounded fan-out,
//! idle/TTL cleanup, and cascading cleanup on parent termination.
//!
//! Owned by the hosting multi-agent server (spec §4.4: "owned by the
//! multi-agent server"). Every live child is recorded in a spawn table guarded by
//! a single lock; a per-child monitor task ticks on an interval and reclaims the
//! child once it has been idle past the configured timeout or its cancellation
//! token has fired. Spawn-table writes never call back into the session store or
//! the bus while holding the table lock (spec §5: "writes take a write lock and
//! never call back into other locks").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;

use crate::cloudllm::bus::MessageBus;
use crate::cloudllm::config::RuntimeConfig;
use crate::cloudllm::error::OrchestrationError;
use crate::cloudllm::event::{EventHandler, OrchestrationEvent};
use crate::cloudllm::session::{AgentSession, SessionStore};

/// A hand-rolled cancellation signal. A `tokio_util::sync::CancellationToken`
/// would do the same job; it isn't added as a dependency since the teacher
/// stack already gives us everything this needs (`tokio::sync::Notify` plus an
/// `AtomicBool` for the already-fired check) and no other module needs the rest
/// of `tokio-util`.
#[derive(Clone)]
pub struct CancellationHandle {
    fired: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        CancellationHandle {
            fired: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether `cancel()` has been called.
    pub fn is_canceled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Resolve once `cancel()` is called (or immediately, if already canceled).
    pub async fn canceled(&self) {
        if self.is_canceled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Request to spawn a child agent session under a parent (spec §4.4, §4.6).
pub struct SpawnRequest {
    pub parent_session_id: String,
    pub parent_agent_id: String,
    pub agent_id: String,
    /// Namespaces `sub_agent_id` as `workflow_id:agent_id` when present (spec §3).
    pub workflow_id: Option<String>,
    /// Dispatched to the child's direct queue immediately on spawn, and mirrored
    /// into `SpawnedAgentContext::metadata["initial_message"]` (Open Question
    /// resolution, see DESIGN.md).
    pub initial_message: Option<String>,
    /// Topics to auto-subscribe the child to. Failures are logged and do not
    /// abort the spawn (spec §4.4).
    pub auto_subscribe: Vec<String>,
    pub metadata: HashMap<String, String>,
    /// Depth of the spawning parent in the spawn forest (spec §9: `MAX_SPAWN_DEPTH`).
    pub parent_depth: usize,
}

/// Per-child bookkeeping the spawn manager keeps alongside each live child
/// (spec §3).
#[derive(Clone)]
pub struct SpawnedAgentContext {
    pub parent_session_id: String,
    pub parent_agent_id: String,
    pub sub_agent_id: String,
    pub sub_session_id: String,
    pub subscription_ids: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub cancellation: CancellationHandle,
    pub spawned_at: DateTime<Utc>,
    pub depth: usize,
}

/// Result handed back to the caller of `spawn_sub_agent` (mirrors the builtin
/// `spawn_agent` tool's return shape, spec §4.6).
pub struct SpawnOutcome {
    pub sub_agent_id: String,
    pub sub_session_id: String,
    pub subscribed_topics: Vec<String>,
}

struct ParentEntry {
    children: Vec<String>, // sub_session_id, in spawn order
}

/// Owns the parent→child spawn table and per-child monitor tasks.
pub struct SpawnManager {
    config: RuntimeConfig,
    bus: Arc<MessageBus>,
    session_store: Arc<dyn SessionStore>,
    event_handler: Option<Arc<dyn EventHandler>>,
    children: RwLock<HashMap<String, SpawnedAgentContext>>, // sub_session_id -> context
    parents: RwLock<HashMap<String, ParentEntry>>,          // parent_session_id -> its children
    monitors: RwLock<HashMap<String, JoinHandle<()>>>,      // sub_session_id -> monitor task
}

impl SpawnManager {
    /// Construct a spawn manager sharing `bus` and `session_store` with the rest
    /// of the runtime.
    pub fn new(
        config: RuntimeConfig,
        bus: Arc<MessageBus>,
        session_store: Arc<dyn SessionStore>,
        event_handler: Option<Arc<dyn EventHandler>>,
    ) -> Arc<Self> {
        Arc::new(SpawnManager {
            config,
            bus,
            session_store,
            event_handler,
            children: RwLock::new(HashMap::new()),
            parents: RwLock::new(HashMap::new()),
            monitors: RwLock::new(HashMap::new()),
        })
    }

    async fn emit(&self, event: OrchestrationEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_orchestration_event(&event).await;
        }
    }

    /// Current number of live children for `parent_session_id` (read-lock, copy;
    /// spec §5).
    pub async fn child_count(&self, parent_session_id: &str) -> usize {
        self.parents
            .read()
            .await
            .get(parent_session_id)
            .map(|p| p.children.len())
            .unwrap_or(0)
    }

    /// Spawn a child session under `req.parent_session_id` (spec §4.4).
    ///
    /// Enforces `MAX_SPAWNS_PER_PARENT` and `MAX_SPAWN_DEPTH` (spec §3, §9) before
    /// doing any work. Auto-subscribe failures are logged, not propagated (spec
    /// §4.4: "failures logged, do not abort spawn") — in this implementation
    /// `MessageBus::subscribe` cannot itself fail, so this is a structural no-op
    /// guard that keeps the contract honest if a future bus implementation can
    /// fail to subscribe.
    pub async fn spawn_sub_agent(
        self: &Arc<Self>,
        req: SpawnRequest,
    ) -> Result<SpawnOutcome, OrchestrationError> {
        if req.agent_id.is_empty() {
            return Err(OrchestrationError::InvalidSpec("agent_id must not be empty".into()));
        }

        if req.parent_depth + 1 > self.config.max_spawn_depth {
            return Err(OrchestrationError::SpawnLimitReached(format!(
                "max spawn depth {} exceeded for parent {}",
                self.config.max_spawn_depth, req.parent_session_id
            )));
        }

        {
            let parents = self.parents.read().await;
            let current = parents.get(&req.parent_session_id).map(|p| p.children.len()).unwrap_or(0);
            if current >= self.config.max_spawns_per_parent {
                return Err(OrchestrationError::SpawnLimitReached(format!(
                    "parent {} already has {}/{} live children",
                    req.parent_session_id, current, self.config.max_spawns_per_parent
                )));
            }
        }

        let sub_agent_id = match &req.workflow_id {
            Some(workflow_id) => format!("{}:{}", workflow_id, req.agent_id),
            None => req.agent_id.clone(),
        };

        let session = AgentSession::spawned(req.agent_id.clone(), req.parent_session_id.clone());
        let sub_session_id = session.session_id.clone();
        self.session_store.save_session(session).await?;

        let mut subscription_ids = Vec::new();
        let mut subscribed_topics = Vec::new();
        for topic in &req.auto_subscribe {
            let sub_id = self.bus.subscribe(sub_agent_id.clone(), topic.clone(), None, 64).await;
            subscription_ids.push(sub_id);
            subscribed_topics.push(topic.clone());
        }

        let mut metadata = req.metadata.clone();
        if let Some(initial) = &req.initial_message {
            metadata.insert("initial_message".to_string(), initial.clone());
        }

        let cancellation = CancellationHandle::new();
        let context = SpawnedAgentContext {
            parent_session_id: req.parent_session_id.clone(),
            parent_agent_id: req.parent_agent_id.clone(),
            sub_agent_id: sub_agent_id.clone(),
            sub_session_id: sub_session_id.clone(),
            subscription_ids: subscription_ids.clone(),
            metadata,
            cancellation: cancellation.clone(),
            spawned_at: Utc::now(),
            depth: req.parent_depth + 1,
        };

        self.children.write().await.insert(sub_session_id.clone(), context);
        self.parents
            .write()
            .await
            .entry(req.parent_session_id.clone())
            .or_insert_with(|| ParentEntry { children: Vec::new() })
            .children
            .push(sub_session_id.clone());

        if let Some(initial) = &req.initial_message {
            // Dispatched in addition to the metadata mirror above (Open Question
            // resolution, see DESIGN.md): delivered as if the parent had called
            // `send_message` right after spawn completed.
            let _ = self
                .bus
                .send_message_default(&req.parent_agent_id, &sub_session_id, initial.clone())
                .await;
        }

        self.emit(OrchestrationEvent::AgentSpawned {
            parent_session_id: req.parent_session_id.clone(),
            sub_session_id: sub_session_id.clone(),
            sub_agent_id: sub_agent_id.clone(),
        })
        .await;

        self.start_monitor(sub_session_id.clone(), cancellation).await;

        Ok(SpawnOutcome {
            sub_agent_id,
            sub_session_id,
            subscribed_topics,
        })
    }

    async fn start_monitor(self: &Arc<Self>, sub_session_id: String, cancellation: CancellationHandle) {
        let manager = Arc::clone(self);
        let tick = self.config.spawn_monitor_tick;
        let idle_timeout = self.config.spawn_idle_timeout;
        let session_id_for_task = sub_session_id.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(tick) => {}
                    _ = cancellation.canceled() => {
                        manager.cleanup(&session_id_for_task, "parent_terminated").await;
                        return;
                    }
                }

                let idle = manager
                    .session_store
                    .load_session(&session_id_for_task)
                    .await
                    .ok()
                    .flatten()
                    .map(|s| Utc::now().signed_duration_since(s.updated_at) > chrono_duration(idle_timeout))
                    .unwrap_or(true); // session vanished underneath us: treat as reclaimable

                if idle {
                    manager.cleanup(&session_id_for_task, "idle_timeout").await;
                    return;
                }
            }
        });
        // Inserted after the task is already spawned, never while holding the
        // children/parents table locks (spec §5: no nested locking across
        // shared tables and slow/async calls).
        self.monitors.write().await.insert(sub_session_id, handle);
    }

    /// Remove a child's bookkeeping: spawn table entry, cancellation, and every
    /// recorded subscription (each unsubscribe a no-op if already gone) (spec §4.4).
    pub async fn cleanup(&self, sub_session_id: &str, reason: &str) {
        let context = self.children.write().await.remove(sub_session_id);
        let Some(context) = context else { return };

        {
            let mut parents = self.parents.write().await;
            if let Some(entry) = parents.get_mut(&context.parent_session_id) {
                entry.children.retain(|id| id != sub_session_id);
                if entry.children.is_empty() {
                    parents.remove(&context.parent_session_id);
                }
            }
        }

        context.cancellation.cancel();
        for sub_id in &context.subscription_ids {
            self.bus.unsubscribe(sub_id).await;
        }
        let _ = self.session_store.delete_session(sub_session_id).await;

        if let Some(handle) = self.monitors.write().await.remove(sub_session_id) {
            handle.abort();
        }

        self.emit(OrchestrationEvent::AgentCleanedUp {
            session_id: sub_session_id.to_string(),
            reason: reason.to_string(),
        })
        .await;
    }

    /// Snapshot and clean up every child of `parent_session_id` (spec §4.4:
    /// `cleanup_by_parent`, invoked when a parent session ends so children
    /// terminate deterministically).
    pub async fn cleanup_by_parent(&self, parent_session_id: &str) {
        let snapshot = self
            .parents
            .read()
            .await
            .get(parent_session_id)
            .map(|p| p.children.clone())
            .unwrap_or_default();
        for sub_session_id in snapshot {
            self.cleanup(&sub_session_id, "parent_terminated").await;
        }
    }

    /// Look up a live child's context.
    pub async fn get(&self, sub_session_id: &str) -> Option<SpawnedAgentContext> {
        self.children.read().await.get(sub_session_id).cloned()
    }

    /// Resolve `sub_agent_id` (the namespaced spawn identity, not a session id)
    /// to its current live session, if any spawned child matches. Used by
    /// `builtin_tools::send_message` to route a directed message to "the
    /// recipient's current live session" (spec §4.6).
    pub async fn session_id_for_agent(&self, sub_agent_id: &str) -> Option<String> {
        self.children
            .read()
            .await
            .values()
            .find(|c| c.sub_agent_id == sub_agent_id)
            .map(|c| c.sub_session_id.clone())
    }
}

fn chrono_duration(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::seconds(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::session::InMemorySessionStore;

    fn test_manager() -> Arc<SpawnManager> {
        let mut config = RuntimeConfig::default();
        config.max_spawns_per_parent = 2;
        config.max_spawn_depth = 4;
        config.spawn_monitor_tick = Duration::from_millis(20);
        config.spawn_idle_timeout = Duration::from_millis(50);
        SpawnManager::new(config, MessageBus::new(), InMemorySessionStore::new(), None)
    }

    fn req(parent_session_id: &str, parent_agent_id: &str, agent_id: &str) -> SpawnRequest {
        SpawnRequest {
            parent_session_id: parent_session_id.to_string(),
            parent_agent_id: parent_agent_id.to_string(),
            agent_id: agent_id.to_string(),
            workflow_id: None,
            initial_message: None,
            auto_subscribe: Vec::new(),
            metadata: HashMap::new(),
            parent_depth: 0,
        }
    }

    #[tokio::test]
    async fn third_spawn_past_limit_fails() {
        let manager = test_manager();
        manager.spawn_sub_agent(req("p", "parent", "c1")).await.unwrap();
        manager.spawn_sub_agent(req("p", "parent", "c2")).await.unwrap();
        let err = manager.spawn_sub_agent(req("p", "parent", "c3")).await.unwrap_err();
        assert_eq!(err.code(), "spawn_limit_reached");
    }

    #[tokio::test]
    async fn workflow_id_namespaces_sub_agent_id() {
        let manager = test_manager();
        let mut r = req("p", "parent", "analyst");
        r.workflow_id = Some("wf1".to_string());
        let outcome = manager.spawn_sub_agent(r).await.unwrap();
        assert_eq!(outcome.sub_agent_id, "wf1:analyst");
    }

    #[tokio::test]
    async fn empty_agent_id_is_rejected() {
        let manager = test_manager();
        let err = manager.spawn_sub_agent(req("p", "parent", "")).await.unwrap_err();
        assert_eq!(err.code(), "invalid_spec");
    }

    #[tokio::test]
    async fn cleanup_by_parent_removes_every_child() {
        let manager = test_manager();
        manager.spawn_sub_agent(req("p", "parent", "c1")).await.unwrap();
        manager.spawn_sub_agent(req("p", "parent", "c2")).await.unwrap();
        assert_eq!(manager.child_count("p").await, 2);
        manager.cleanup_by_parent("p").await;
        assert_eq!(manager.child_count("p").await, 0);
    }

    #[tokio::test]
    async fn initial_message_is_dispatched_and_mirrored_in_metadata() {
        let manager = test_manager();
        let mut r = req("p", "parent", "c1");
        r.initial_message = Some("start here".to_string());
        let outcome = manager.spawn_sub_agent(r).await.unwrap();

        let context = manager.get(&outcome.sub_session_id).await.unwrap();
        assert_eq!(context.metadata.get("initial_message").unwrap(), "start here");

        let drained = manager
            .bus
            .drain_for_agent(&outcome.sub_agent_id, &outcome.sub_session_id)
            .await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message.body, "start here");
    }

    #[tokio::test]
    async fn depth_beyond_max_is_rejected() {
        let manager = test_manager();
        let mut r = req("p", "parent", "c1");
        r.parent_depth = 4; // config.max_spawn_depth == 4, so depth+1 == 5 exceeds it
        let err = manager.spawn_sub_agent(r).await.unwrap_err();
        assert_eq!(err.code(), "spawn_limit_reached");
    }

    #[tokio::test]
    async fn session_id_for_agent_resolves_namespaced_sub_agent_id() {
        let manager = test_manager();
        let mut r = req("p", "parent", "analyst");
        r.workflow_id = Some("wf1".to_string());
        let outcome = manager.spawn_sub_agent(r).await.unwrap();
        let resolved = manager.session_id_for_agent("wf1:analyst").await;
        assert_eq!(resolved, Some(outcome.sub_session_id));
        assert_eq!(manager.session_id_for_agent("nonexistent").await, None);
    }
}
