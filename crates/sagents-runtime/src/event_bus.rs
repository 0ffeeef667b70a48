//! Topic-based publish/subscribe for per-agent event streams.
//!
//! Each agent owns two topics: the main stream (`agent:{id}`) and a debug
//! stream (`agent:debug:{id}`). Delivery is fire-and-forget over broadcast
//! channels: publishing never blocks the worker, subscribers that lag drop
//! events, and a failing subscriber cannot affect the publisher.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sagents_contract::event::{AgentEvent, DebugEvent, EventEnvelope};
use tokio::sync::broadcast;

/// Default per-topic buffer.
const DEFAULT_CAPACITY: usize = 256;

/// The main topic for an agent.
pub fn agent_topic(agent_id: &str) -> String {
    format!("agent:{agent_id}")
}

/// The debug topic for an agent.
pub fn agent_debug_topic(agent_id: &str) -> String {
    format!("agent:debug:{agent_id}")
}

/// Shared topic map. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<EventEnvelope>>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Subscribe to a topic, creating it on first use.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<EventEnvelope> {
        let mut topics = self.topics.write().expect("event bus lock poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish to a topic. Best-effort: no subscribers, no delivery.
    pub fn publish(&self, topic: &str, envelope: EventEnvelope) {
        let sender = {
            let topics = self.topics.read().expect("event bus lock poisoned");
            topics.get(topic).cloned()
        };
        let Some(sender) = sender else {
            return;
        };
        if sender.send(envelope).is_err() {
            // All receivers dropped; remove the dead topic.
            let mut topics = self.topics.write().expect("event bus lock poisoned");
            if topics
                .get(topic)
                .is_some_and(|s| s.receiver_count() == 0)
            {
                topics.remove(topic);
            }
        }
    }

    /// Publish a main-topic event for an agent.
    pub fn publish_agent(&self, agent_id: &str, event: AgentEvent) {
        self.publish(&agent_topic(agent_id), EventEnvelope::main(agent_id, event));
    }

    /// Publish a debug-topic event for an agent.
    pub fn publish_agent_debug(&self, agent_id: &str, event: DebugEvent) {
        self.publish(
            &agent_debug_topic(agent_id),
            EventEnvelope::debug(agent_id, event),
        );
    }

    /// Subscribe to an agent's main topic.
    pub fn subscribe_agent(&self, agent_id: &str) -> broadcast::Receiver<EventEnvelope> {
        self.subscribe(&agent_topic(agent_id))
    }

    /// Subscribe to an agent's debug topic.
    pub fn subscribe_agent_debug(&self, agent_id: &str) -> broadcast::Receiver<EventEnvelope> {
        self.subscribe(&agent_debug_topic(agent_id))
    }

    /// Live topic count.
    pub fn topic_count(&self) -> usize {
        self.topics.read().expect("event bus lock poisoned").len()
    }
}
