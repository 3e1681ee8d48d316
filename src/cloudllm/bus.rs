//! The message fabric (spec §4.3): three communication modes sharing one bus —
//! directed queues, topic publish/subscribe, and auto-injection of pending
//! deliveries into a listening agent's next turn.
//!
//! Delivery semantics are in-process, at-most-once: a message is lost if the
//! process crashes between enqueue and consumption (spec §4.3, explicitly a
//! non-goal to change — see spec.md §1). The publisher-side full-buffer policy is
//! non-blocking drop-with-counter, never block-the-publisher (spec §4.3, §8
//! scenario 4). Direct queues are bounded FIFOs keyed by recipient session id;
//! subscription buffers are bounded FIFOs keyed by subscription id.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::cloudllm::error::OrchestrationError;
use crate::cloudllm::event::{EventHandler, OrchestrationEvent};

/// Default bound on a direct queue's length when a caller doesn't specify one.
pub const DEFAULT_DIRECT_QUEUE_CAPACITY: usize = 256;

/// A message exchanged through the bus, directed or topic-addressed (spec §3).
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Sender identity.
    pub from_agent: String,
    /// Routing target.
    pub to: MessageTarget,
    /// Message body.
    pub body: String,
    /// When the message was enqueued/published.
    pub timestamp: DateTime<Utc>,
}

/// Where a [`BusMessage`] is routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTarget {
    /// A directed message to a specific recipient's queue, keyed by session id.
    Direct(String),
    /// A topic fan-out.
    Topic(String),
}

/// A predicate a subscriber can attach to filter topic deliveries. Boxed so
/// callers can close over arbitrary state.
pub type MessageFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One subscriber's registration on a topic (spec §3).
#[derive(Clone)]
pub struct Subscription {
    pub subscription_id: String,
    pub agent_id: String,
    pub topic: String,
    pub capacity: usize,
    filter: Option<MessageFilter>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subscription_id", &self.subscription_id)
            .field("agent_id", &self.agent_id)
            .field("topic", &self.topic)
            .field("capacity", &self.capacity)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

struct SubscriptionState {
    info: Subscription,
    buffer: VecDeque<BusMessage>,
    dropped_count: u64,
}

/// A single drained item delivered into an agent's conversation context by
/// auto-injection, tagged with its mode so callers can render it distinctly
/// (e.g. `"[direct from X]"` vs `"[topic Y]"`).
#[derive(Debug, Clone)]
pub struct DrainedMessage {
    pub message: BusMessage,
    pub mode: DrainMode,
}

/// Which of the bus's two inbound channels a [`DrainedMessage`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    Direct,
    Topic,
}

/// The shared message bus. One instance serves every agent session in a process;
/// the spawn manager and builtin tools both hold a reference to the same bus.
pub struct MessageBus {
    direct_queues: RwLock<HashMap<String, VecDeque<BusMessage>>>,
    subscriptions: RwLock<HashMap<String, SubscriptionState>>,
    topic_index: RwLock<HashMap<String, Vec<String>>>,
    dropped_for_subscription: AtomicU64,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl MessageBus {
    /// Construct an empty bus.
    pub fn new() -> Arc<Self> {
        Arc::new(MessageBus {
            direct_queues: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            topic_index: RwLock::new(HashMap::new()),
            dropped_for_subscription: AtomicU64::new(0),
            event_handler: None,
        })
    }

    /// Construct a bus with an event handler wired in from the start. `MessageBus`
    /// is always handed out behind an `Arc` once subscriptions exist, so the
    /// handler must be supplied at construction rather than attached later.
    pub fn new_with_handler(handler: Arc<dyn EventHandler>) -> Arc<Self> {
        Arc::new(MessageBus {
            direct_queues: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            topic_index: RwLock::new(HashMap::new()),
            dropped_for_subscription: AtomicU64::new(0),
            event_handler: Some(handler),
        })
    }

    async fn emit(&self, event: OrchestrationEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_orchestration_event(&event).await;
        }
    }

    /// Enqueue a directed message on `to_session_id`'s queue (spec §4.3 mode 1).
    /// Fails with `QueueFull` if the recipient's bounded FIFO has no room; this
    /// mirrors `builtin_tools::send_message`'s `QueueFull` error kind (spec §4.6),
    /// distinct from the publisher-side non-blocking drop policy used for topics.
    pub async fn send_message(
        &self,
        from_agent: &str,
        to_session_id: &str,
        body: impl Into<String>,
        capacity: usize,
    ) -> Result<(), OrchestrationError> {
        let message = BusMessage {
            from_agent: from_agent.to_string(),
            to: MessageTarget::Direct(to_session_id.to_string()),
            body: body.into(),
            timestamp: Utc::now(),
        };
        let mut queues = self.direct_queues.write().await;
        let queue = queues.entry(to_session_id.to_string()).or_insert_with(VecDeque::new);
        if queue.len() >= capacity {
            self.emit(OrchestrationEvent::MessageDelivered {
                to: to_session_id.to_string(),
                delivered: false,
            })
            .await;
            return Err(OrchestrationError::QueueFull(to_session_id.to_string()));
        }
        queue.push_back(message);
        drop(queues);
        self.emit(OrchestrationEvent::MessageDelivered {
            to: to_session_id.to_string(),
            delivered: true,
        })
        .await;
        Ok(())
    }

    /// Convenience wrapper using [`DEFAULT_DIRECT_QUEUE_CAPACITY`].
    pub async fn send_message_default(
        &self,
        from_agent: &str,
        to_session_id: &str,
        body: impl Into<String>,
    ) -> Result<(), OrchestrationError> {
        self.send_message(from_agent, to_session_id, body, DEFAULT_DIRECT_QUEUE_CAPACITY)
            .await
    }

    /// Register a subscription. Returns a fresh `subscription_id`.
    pub async fn subscribe(
        &self,
        agent_id: impl Into<String>,
        topic: impl Into<String>,
        filter: Option<MessageFilter>,
        capacity: usize,
    ) -> String {
        let agent_id = agent_id.into();
        let topic = topic.into();
        let subscription_id = Uuid::new_v4().to_string();
        let info = Subscription {
            subscription_id: subscription_id.clone(),
            agent_id,
            topic: topic.clone(),
            capacity,
            filter,
        };
        self.subscriptions.write().await.insert(
            subscription_id.clone(),
            SubscriptionState {
                info,
                buffer: VecDeque::new(),
                dropped_count: 0,
            },
        );
        self.topic_index
            .write()
            .await
            .entry(topic)
            .or_insert_with(Vec::new)
            .push(subscription_id.clone());
        subscription_id
    }

    /// Remove a subscription. Idempotent (spec §4.3): removing an unknown or
    /// already-removed id succeeds silently.
    pub async fn unsubscribe(&self, subscription_id: &str) {
        let removed = self.subscriptions.write().await.remove(subscription_id);
        if let Some(state) = removed {
            let mut index = self.topic_index.write().await;
            if let Some(ids) = index.get_mut(&state.info.topic) {
                ids.retain(|id| id != subscription_id);
                if ids.is_empty() {
                    index.remove(&state.info.topic);
                }
            }
        }
    }

    /// Snapshot of every live subscription for `agent_id` (spec §4.3:
    /// `GetSubscriptionsByAgent`).
    pub async fn subscriptions_by_agent(&self, agent_id: &str) -> Vec<Subscription> {
        self.subscriptions
            .read()
            .await
            .values()
            .filter(|s| s.info.agent_id == agent_id)
            .map(|s| s.info.clone())
            .collect()
    }

    /// Fan out `body` to every current subscriber of `topic` whose filter
    /// matches. Non-blocking: a full subscriber buffer is dropped and its
    /// counter incremented; the publisher's call still returns success (spec §4.3,
    /// §8 scenario 4). Zero subscribers is not an error (spec §4.6).
    pub async fn publish(&self, from_agent: &str, topic: &str, body: impl Into<String>) {
        let body = body.into();
        let message = BusMessage {
            from_agent: from_agent.to_string(),
            to: MessageTarget::Topic(topic.to_string()),
            body,
            timestamp: Utc::now(),
        };

        let subscriber_ids = {
            let index = self.topic_index.read().await;
            index.get(topic).cloned().unwrap_or_default()
        };

        let mut subscriptions = self.subscriptions.write().await;
        for id in subscriber_ids {
            if let Some(state) = subscriptions.get_mut(&id) {
                let matches = match &state.info.filter {
                    Some(f) => f(&message.body),
                    None => true,
                };
                if !matches {
                    continue;
                }
                if state.buffer.len() >= state.info.capacity {
                    state.dropped_count += 1;
                    self.dropped_for_subscription.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                state.buffer.push_back(message.clone());
            }
        }
        drop(subscriptions);
        self.emit(OrchestrationEvent::MessageDelivered {
            to: topic.to_string(),
            delivered: true,
        })
        .await;
    }

    /// How many topic deliveries a specific subscription has dropped due to a
    /// full buffer (spec §4.3: `dropped_for_subscription` counter).
    pub async fn dropped_count_for(&self, subscription_id: &str) -> u64 {
        self.subscriptions
            .read()
            .await
            .get(subscription_id)
            .map(|s| s.dropped_count)
            .unwrap_or(0)
    }

    /// Total topic deliveries dropped across every subscription, process-wide.
    pub fn total_dropped(&self) -> u64 {
        self.dropped_for_subscription.load(Ordering::Relaxed)
    }

    /// Drain everything pending for `agent_id`/`session_id`: the direct queue
    /// keyed by `session_id`, plus every subscription buffer belonging to
    /// `agent_id`. Ordered `(timestamp ascending, direct-before-topic)` within
    /// this single drain (spec §4.3, §5). Called right before an agent's next
    /// LLM call — the bus's auto-injection point.
    pub async fn drain_for_agent(&self, agent_id: &str, session_id: &str) -> Vec<DrainedMessage> {
        let mut direct: Vec<DrainedMessage> = {
            let mut queues = self.direct_queues.write().await;
            match queues.get_mut(session_id) {
                Some(queue) => queue
                    .drain(..)
                    .map(|message| DrainedMessage {
                        message,
                        mode: DrainMode::Direct,
                    })
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut topic: Vec<DrainedMessage> = {
            let mut subscriptions = self.subscriptions.write().await;
            let mut drained = Vec::new();
            for state in subscriptions.values_mut() {
                if state.info.agent_id == agent_id {
                    drained.extend(state.buffer.drain(..).map(|message| DrainedMessage {
                        message,
                        mode: DrainMode::Topic,
                    }));
                }
            }
            drained
        };

        // Stable sort by timestamp keeps direct-before-topic for equal
        // timestamps, since `direct` was appended to the combined vec first.
        direct.append(&mut topic);
        direct.sort_by(|a, b| a.message.timestamp.cmp(&b.message.timestamp));
        direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_message_round_trips_through_drain() {
        let bus = MessageBus::new();
        bus.send_message_default("a1", "sess-1", "hello").await.unwrap();
        let drained = bus.drain_for_agent("a2", "sess-1").await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].mode, DrainMode::Direct);
        assert_eq!(drained[0].message.body, "hello");
    }

    #[tokio::test]
    async fn direct_queue_full_rejects_send() {
        let bus = MessageBus::new();
        bus.send_message("a", "sess", "m1", 1).await.unwrap();
        let err = bus.send_message("a", "sess", "m2", 1).await.unwrap_err();
        assert_eq!(err.code(), "queue_full");
    }

    #[tokio::test]
    async fn publish_drops_for_full_subscriber_but_still_delivers_to_one_with_room() {
        let bus = MessageBus::new();
        // s1 has room for both; s2's buffer is exhausted by the first publish.
        bus.subscribe("agent-1", "t", None, 4).await;
        let s2 = bus.subscribe("agent-2", "t", None, 1).await;

        bus.publish("pub", "t", "first").await;
        bus.publish("pub", "t", "second").await;

        let drained1 = bus.drain_for_agent("agent-1", "sess-1").await;
        assert_eq!(drained1.len(), 2);

        let dropped = bus.dropped_count_for(&s2).await;
        assert_eq!(dropped, 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_restores_baseline() {
        let bus = MessageBus::new();
        let id = bus.subscribe("agent-1", "topic", None, 4).await;
        bus.unsubscribe(&id).await;
        bus.unsubscribe(&id).await; // second call must not panic or error

        let id2 = bus.subscribe("agent-1", "topic", None, 4).await;
        assert_eq!(bus.subscriptions_by_agent("agent-1").await.len(), 1);
        bus.unsubscribe(&id2).await;
        assert_eq!(bus.subscriptions_by_agent("agent-1").await.len(), 0);
    }

    #[tokio::test]
    async fn filter_excludes_non_matching_messages() {
        let bus = MessageBus::new();
        let filter: MessageFilter = Arc::new(|body: &str| body.starts_with("keep"));
        bus.subscribe("agent-1", "t", Some(filter), 4).await;
        bus.publish("pub", "t", "drop-me").await;
        bus.publish("pub", "t", "keep-me").await;

        let drained = bus.drain_for_agent("agent-1", "sess").await;
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message.body, "keep-me");
    }

    #[tokio::test]
    async fn drain_orders_direct_before_topic_within_same_instant() {
        let bus = MessageBus::new();
        bus.subscribe("agent-1", "t", None, 4).await;
        bus.publish("pub", "t", "topic-msg").await;
        bus.send_message_default("pub", "sess-1", "direct-msg").await.unwrap();

        let drained = bus.drain_for_agent("agent-1", "sess-1").await;
        assert_eq!(drained.len(), 2);
        // Direct message enqueued after the topic publish still sorts by
        // timestamp; this test only asserts both arrive, ordering-by-time is
        // covered by `sort_by` and the direct-before-topic tie-break is
        // exercised implicitly by insertion order in `drain_for_agent`.
        assert!(drained.iter().any(|d| d.mode == DrainMode::Direct));
        assert!(drained.iter().any(|d| d.mode == DrainMode::Topic));
    }
}
