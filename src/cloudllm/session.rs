//! Session identity and the external session-store boundary.
//!
//! [`AgentSession`] is the data model spec.md §3 names: a `session_id` paired with
//! the `agent_id` it hosts, an optional `parent_session_id` recording a spawn link,
//! and `created_at`/`updated_at` timestamps. Persisting sessions across process
//! restarts is explicitly an external collaborator's job (spec §6: "session store
//! (external)") — this module only defines the shape and the [`SessionStore`] trait
//! the core consumes, plus an in-memory implementation suitable for tests and for
//! hosting a single, non-persistent process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::cloudllm::error::OrchestrationError;

/// Identified state container for an agent's conversation and metadata (spec §3).
///
/// Invariant (spec §3): when `parent_session_id` is set, it must refer to an
/// existing session whose lifetime fully contains this one — enforced by the
/// spawn manager (`spawn.rs`), not by this struct itself, since `AgentSession` is
/// a plain record with no back-reference to the store that holds it.
#[derive(Debug, Clone)]
pub struct AgentSession {
    /// Unique session identifier.
    pub session_id: String,
    /// Config reference this session hosts.
    pub agent_id: String,
    /// Spawn link to the parent session, if this session was created via spawn.
    pub parent_session_id: Option<String>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Last time the session saw activity (a turn, a bus delivery). Read by the
    /// spawn manager's idle monitor.
    pub updated_at: DateTime<Utc>,
}

impl AgentSession {
    /// Create a new root session (no parent) with a freshly generated id.
    pub fn new(agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        AgentSession {
            session_id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            parent_session_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a new child session under `parent_session_id`.
    pub fn spawned(agent_id: impl Into<String>, parent_session_id: impl Into<String>) -> Self {
        let mut session = AgentSession::new(agent_id);
        session.parent_session_id = Some(parent_session_id.into());
        session
    }

    /// Bump `updated_at` to now. Called on every message turn (spec §3).
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// External persistence boundary for [`AgentSession`]s (spec §6: `SaveSession`,
/// `LoadSession`). The core never assumes a particular backing store; it only
/// calls through this trait, injected by the hosting process.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist (create or update) a session record.
    async fn save_session(&self, session: AgentSession) -> Result<(), OrchestrationError>;

    /// Load a session by id, if it exists.
    async fn load_session(&self, session_id: &str) -> Result<Option<AgentSession>, OrchestrationError>;

    /// Remove a session record. Idempotent: removing an absent session is not an
    /// error, mirroring `unsubscribe`'s idempotence elsewhere in the bus.
    async fn delete_session(&self, session_id: &str) -> Result<(), OrchestrationError>;

    /// All sessions whose `parent_session_id` equals `parent_id`. Used by the
    /// spawn manager's `cleanup_by_parent`.
    async fn children_of(&self, parent_id: &str) -> Result<Vec<AgentSession>, OrchestrationError>;
}

/// A non-persistent [`SessionStore`] backed by an in-memory map, guarded by a
/// single `RwLock` per the "reads take a read lock and copy, writes take a write
/// lock" discipline spec §5 requires of shared tables.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, AgentSession>>,
}

impl InMemorySessionStore {
    /// Construct an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(InMemorySessionStore {
            sessions: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_session(&self, session: AgentSession) -> Result<(), OrchestrationError> {
        self.sessions.write().await.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<AgentSession>, OrchestrationError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), OrchestrationError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn children_of(&self, parent_id: &str) -> Result<Vec<AgentSession>, OrchestrationError> {
        let snapshot = self.sessions.read().await;
        Ok(snapshot
            .values()
            .filter(|s| s.parent_session_id.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let store = InMemorySessionStore::new();
        let session = AgentSession::new("agent-1");
        let id = session.session_id.clone();
        store.save_session(session).await.unwrap();
        let loaded = store.load_session(&id).await.unwrap();
        assert_eq!(loaded.unwrap().agent_id, "agent-1");
    }

    #[tokio::test]
    async fn load_missing_session_returns_none() {
        let store = InMemorySessionStore::new();
        assert!(store.load_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemorySessionStore::new();
        store.delete_session("never-existed").await.unwrap();
        store.delete_session("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn children_of_finds_spawned_sessions() {
        let store = InMemorySessionStore::new();
        let parent = AgentSession::new("parent-agent");
        let parent_id = parent.session_id.clone();
        store.save_session(parent).await.unwrap();

        let child = AgentSession::spawned("child-agent", parent_id.clone());
        store.save_session(child).await.unwrap();

        let other = AgentSession::new("unrelated-agent");
        store.save_session(other).await.unwrap();

        let children = store.children_of(&parent_id).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].agent_id, "child-agent");
    }

    #[test]
    fn touch_advances_updated_at() {
        let mut session = AgentSession::new("a");
        let before = session.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        session.touch();
        assert!(session.updated_at >= before);
    }
}
