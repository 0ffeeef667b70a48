//! In-memory persistence adapters for tests and examples.
//!
//! Production backends live in owner applications; these adapters implement
//! the same contracts over process memory.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sagents_contract::display::{display_items, DisplayItem, DisplayItemKind};
use sagents_contract::event::{ToolCallInfo, ToolExecutionPhase};
use sagents_contract::message::Message;
use sagents_contract::persistence::{
    AgentPersistence, DisplayMessagePersistence, PersistContext, PersistenceError,
};
use sagents_contract::state::SerializedState;
use serde_json::json;

/// Whole-state store keyed by agent id.
#[derive(Default)]
pub struct MemoryAgentPersistence {
    states: RwLock<HashMap<String, SerializedState>>,
    log: RwLock<Vec<(String, PersistContext)>>,
}

impl MemoryAgentPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored snapshot, if any.
    pub fn snapshot(&self, agent_id: &str) -> Option<SerializedState> {
        self.states
            .read()
            .expect("persistence lock poisoned")
            .get(agent_id)
            .cloned()
    }

    /// Seed a snapshot directly (e.g. simulating a previous host).
    pub fn seed(&self, state: SerializedState) {
        self.states
            .write()
            .expect("persistence lock poisoned")
            .insert(state.agent_id.clone(), state);
    }

    /// Every persist call in order: `(agent_id, context)`.
    pub fn persist_log(&self) -> Vec<(String, PersistContext)> {
        self.log.read().expect("persistence lock poisoned").clone()
    }
}

#[async_trait]
impl AgentPersistence for MemoryAgentPersistence {
    async fn persist(
        &self,
        agent_id: &str,
        state: &SerializedState,
        context: PersistContext,
    ) -> Result<(), PersistenceError> {
        self.states
            .write()
            .expect("persistence lock poisoned")
            .insert(agent_id.to_string(), state.clone());
        self.log
            .write()
            .expect("persistence lock poisoned")
            .push((agent_id.to_string(), context));
        Ok(())
    }

    async fn load(&self, agent_id: &str) -> Result<SerializedState, PersistenceError> {
        self.states
            .read()
            .expect("persistence lock poisoned")
            .get(agent_id)
            .cloned()
            .ok_or_else(|| PersistenceError::NotFound(agent_id.to_string()))
    }
}

/// Append-only display store.
#[derive(Default)]
pub struct MemoryDisplayPersistence {
    items: RwLock<Vec<DisplayItem>>,
    statuses: RwLock<Vec<(ToolExecutionPhase, ToolCallInfo)>>,
}

impl MemoryDisplayPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<DisplayItem> {
        self.items.read().expect("display lock poisoned").clone()
    }

    pub fn statuses(&self) -> Vec<(ToolExecutionPhase, ToolCallInfo)> {
        self.statuses.read().expect("display lock poisoned").clone()
    }
}

#[async_trait]
impl DisplayMessagePersistence for MemoryDisplayPersistence {
    async fn save_message(
        &self,
        _conversation_id: &str,
        message: &Message,
    ) -> Result<Vec<DisplayItem>, PersistenceError> {
        let items = display_items(message);
        self.items
            .write()
            .expect("display lock poisoned")
            .extend(items.clone());
        Ok(items)
    }

    async fn update_tool_status(
        &self,
        phase: ToolExecutionPhase,
        tool: &ToolCallInfo,
    ) -> Result<DisplayItem, PersistenceError> {
        self.statuses
            .write()
            .expect("display lock poisoned")
            .push((phase, tool.clone()));
        Ok(DisplayItem {
            message_id: tool.call_id.clone(),
            sequence: 0,
            kind: DisplayItemKind::ToolResult,
            content: json!({ "call_id": tool.call_id, "phase": phase }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagents_contract::state::State;

    #[tokio::test]
    async fn persist_then_load_roundtrips() {
        let store = MemoryAgentPersistence::new();
        let state = State::new("a-1").with_message(Message::user("hi"));
        store
            .persist("a-1", &state.to_serialized(), PersistContext::OnCompletion)
            .await
            .unwrap();

        let loaded = store.load("a-1").await.unwrap();
        assert_eq!(State::from_serialized(loaded).unwrap(), state);
        assert_eq!(store.persist_log().len(), 1);
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let store = MemoryAgentPersistence::new();
        assert!(matches!(
            store.load("ghost").await,
            Err(PersistenceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn display_store_expands_messages() {
        let store = MemoryDisplayPersistence::new();
        let saved = store
            .save_message("a-1", &Message::assistant("hello"))
            .await
            .unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(store.items().len(), 1);
    }
}
