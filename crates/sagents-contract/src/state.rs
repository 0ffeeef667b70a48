//! Mutable agent state and its serialized snapshot format.
//!
//! `State` is owned and mutated exclusively by the agent's worker. It is
//! deep-copyable (plain `Clone`) and JSON-serializable; live handles never
//! belong here — they go in the worker's ambient context instead.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::interrupt::InterruptRecord;
use crate::message::Message;

/// Serialized-state schema version written by this crate.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Todo completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// One todo entry tracked in agent state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

impl Todo {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            status: TodoStatus::Pending,
        }
    }
}

/// Mutable runtime data for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Matches the worker's registered key.
    pub agent_id: String,
    /// Conversation history, append-mostly.
    pub messages: Vec<Message>,
    #[serde(default)]
    pub todos: Vec<Todo>,
    /// String-keyed metadata that survives persistence. Values must be plain
    /// JSON; worker handles and other live references never go here.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Populated while the worker is `Interrupted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_data: Option<InterruptRecord>,
}

impl State {
    /// Create empty state for an agent.
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            messages: Vec::new(),
            todos: Vec::new(),
            metadata: Map::new(),
            interrupt_data: None,
        }
    }

    /// Add a message (builder style).
    #[must_use]
    pub fn with_message(mut self, msg: Message) -> Self {
        self.messages.push(msg);
        self
    }

    /// Add multiple messages (builder style).
    #[must_use]
    pub fn with_messages(mut self, msgs: impl IntoIterator<Item = Message>) -> Self {
        self.messages.extend(msgs);
        self
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::message::Role::Assistant)
    }

    /// Merge a tool-produced delta: messages append, todos replace when
    /// present, metadata map-merge with the delta winning on key conflicts.
    pub fn merge_delta(&mut self, delta: StateDelta) {
        self.messages.extend(delta.messages);
        if let Some(todos) = delta.todos {
            self.todos = todos;
        }
        for (key, value) in delta.metadata {
            self.metadata.insert(key, value);
        }
    }

    /// Snapshot this state into the versioned serialized form.
    pub fn to_serialized(&self) -> SerializedState {
        SerializedState {
            schema_version: STATE_SCHEMA_VERSION,
            agent_id: self.agent_id.clone(),
            messages: self.messages.clone(),
            todos: self.todos.clone(),
            metadata: self.metadata.clone(),
            interrupt_data: self.interrupt_data.clone(),
        }
    }

    /// Rebuild state from a serialized snapshot.
    pub fn from_serialized(serialized: SerializedState) -> Result<Self, StateCodecError> {
        if serialized.schema_version > STATE_SCHEMA_VERSION {
            return Err(StateCodecError::UnsupportedSchemaVersion(
                serialized.schema_version,
            ));
        }
        Ok(Self {
            agent_id: serialized.agent_id,
            messages: serialized.messages,
            todos: serialized.todos,
            metadata: serialized.metadata,
            interrupt_data: serialized.interrupt_data,
        })
    }
}

/// A delta a tool returns through `ProcessedContent::StateDelta`.
///
/// Deltas from one turn are merged in chronological order, right-wins: a
/// later tool's metadata write overrides an earlier one's for the same key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateDelta {
    /// Messages to append to the history.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    /// Replacement todo list, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todos: Option<Vec<Todo>>,
    /// Metadata entries to merge.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl StateDelta {
    /// Delta setting a single metadata key.
    pub fn metadata_entry(key: impl Into<String>, value: Value) -> Self {
        let mut metadata = Map::new();
        metadata.insert(key.into(), value);
        Self {
            metadata,
            ..Self::default()
        }
    }

    /// Delta replacing the todo list.
    pub fn todos(todos: Vec<Todo>) -> Self {
        Self {
            todos: Some(todos),
            ..Self::default()
        }
    }

    /// Whether the delta carries nothing.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.todos.is_none() && self.metadata.is_empty()
    }
}

/// The versioned JSON snapshot exchanged with [`crate::persistence::AgentPersistence`].
///
/// Tool-call arguments, display text, and provider-specific usage payloads
/// are preserved verbatim. `interrupt_data` captures the current and pending
/// interrupts so a restored worker can honor `resume` without an LLM call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedState {
    pub schema_version: u32,
    pub agent_id: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_data: Option<InterruptRecord>,
}

/// Errors converting between `State` and its serialized form.
#[derive(Debug, Error)]
pub enum StateCodecError {
    #[error("unsupported state schema version: {0}")]
    UnsupportedSchemaVersion(u32),

    #[error("state serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_appends_messages_and_merges_metadata_right_wins() {
        let mut state = State::new("a-1").with_message(Message::user("hi"));
        state.metadata.insert("x".to_string(), json!(1));

        let mut delta = StateDelta::metadata_entry("x", json!(2));
        delta.messages.push(Message::system("note"));
        state.merge_delta(delta);

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.metadata["x"], json!(2));
    }

    #[test]
    fn merge_replaces_todos_only_when_present() {
        let mut state = State::new("a-1");
        state.todos.push(Todo::new("t1", "first"));

        state.merge_delta(StateDelta::metadata_entry("k", json!(true)));
        assert_eq!(state.todos.len(), 1);

        state.merge_delta(StateDelta::todos(vec![
            Todo::new("t2", "second"),
            Todo::new("t3", "third"),
        ]));
        assert_eq!(state.todos.len(), 2);
        assert_eq!(state.todos[0].id, "t2");
    }

    #[test]
    fn serialized_roundtrip_preserves_state() {
        let mut state = State::new("a-1")
            .with_message(Message::user("hi"))
            .with_message(Message::assistant("hello"));
        state.metadata.insert("tenant".to_string(), json!("acme"));

        let serialized = state.to_serialized();
        assert_eq!(serialized.schema_version, STATE_SCHEMA_VERSION);

        let json = serde_json::to_string(&serialized).unwrap();
        let parsed: SerializedState = serde_json::from_str(&json).unwrap();
        let restored = State::from_serialized(parsed).unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn from_serialized_rejects_future_schema() {
        let mut serialized = State::new("a-1").to_serialized();
        serialized.schema_version = STATE_SCHEMA_VERSION + 1;
        assert!(matches!(
            State::from_serialized(serialized),
            Err(StateCodecError::UnsupportedSchemaVersion(_))
        ));
    }

    #[test]
    fn last_assistant_message_skips_tool_messages() {
        let state = State::new("a-1")
            .with_message(Message::user("hi"))
            .with_message(Message::assistant("hello"))
            .with_message(Message::tool_results(vec![]));
        assert_eq!(state.last_assistant_message().unwrap().content, "hello");
    }
}
