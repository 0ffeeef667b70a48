//! Event envelopes published on per-agent topics.
//!
//! Every main-topic envelope is `{agent, payload}`; the payload kinds form a
//! closed, stable list external consumers pattern-match on. Debug envelopes
//! wrap an inner debug payload and carry state snapshots and per-middleware
//! traces. Delivery is best-effort and never blocks the publisher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::display::DisplayItem;
use crate::message::{Message, ToolCall};
use crate::model::TokenUsage;
use crate::state::{State, Todo};
use crate::status::Status;

/// Why a worker shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownReason {
    Inactivity,
    NoViewers,
    Manual,
    Crash,
    NodeStop,
}

impl ShutdownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::Inactivity => "inactivity",
            ShutdownReason::NoViewers => "no_viewers",
            ShutdownReason::Manual => "manual",
            ShutdownReason::Crash => "crash",
            ShutdownReason::NodeStop => "node_stop",
        }
    }
}

/// Lifecycle phase of one tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionPhase {
    Executing,
    Completed,
    Failed,
}

/// Tool call metadata carried on tool lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallInfo {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
}

impl From<&ToolCall> for ToolCallInfo {
    fn from(call: &ToolCall) -> Self {
        Self {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            display_text: call.display_text.clone(),
        }
    }
}

/// Main-topic event payloads. This list is closed: additions are
/// backward-compatible, existing kinds are stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Emitted on every status transition.
    StatusChanged {
        new_status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<Value>,
    },
    /// Streaming tokens.
    LlmDeltas { deltas: Vec<String> },
    /// One complete assistant message.
    LlmMessage { message: Message },
    /// Per-call token accounting.
    LlmTokenUsage { usage: TokenUsage },
    /// A tool call was parsed from the stream.
    ToolCallIdentified { tool: ToolCallInfo },
    /// Unified tool lifecycle event.
    ToolExecutionUpdate {
        phase: ToolExecutionPhase,
        tool: ToolCallInfo,
    },
    /// Display persistence hand-off completed for one item.
    DisplayMessageSaved { item: DisplayItem },
    /// Display persistence hand-off completed for a batch.
    DisplayMessagesBatchSaved { items: Vec<DisplayItem> },
    TodosUpdated { todos: Vec<Todo> },
    StateRestored { state: State },
    /// Clustered mode only: a transfer window opened.
    NodeTransferring { info: Value },
    /// Clustered mode only: the transfer completed.
    NodeTransferred { info: Value },
    /// Terminal event, emitted immediately before the worker stops.
    AgentShutdown { reason: ShutdownReason },
}

impl AgentEvent {
    /// The stable kind string of this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::StatusChanged { .. } => "status_changed",
            AgentEvent::LlmDeltas { .. } => "llm_deltas",
            AgentEvent::LlmMessage { .. } => "llm_message",
            AgentEvent::LlmTokenUsage { .. } => "llm_token_usage",
            AgentEvent::ToolCallIdentified { .. } => "tool_call_identified",
            AgentEvent::ToolExecutionUpdate { .. } => "tool_execution_update",
            AgentEvent::DisplayMessageSaved { .. } => "display_message_saved",
            AgentEvent::DisplayMessagesBatchSaved { .. } => "display_messages_batch_saved",
            AgentEvent::TodosUpdated { .. } => "todos_updated",
            AgentEvent::StateRestored { .. } => "state_restored",
            AgentEvent::NodeTransferring { .. } => "node_transferring",
            AgentEvent::NodeTransferred { .. } => "node_transferred",
            AgentEvent::AgentShutdown { .. } => "agent_shutdown",
        }
    }
}

/// Debug-topic payloads: full snapshots and middleware action traces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DebugEvent {
    StateSnapshot { state: State },
    MiddlewareAction {
        middleware_id: String,
        action: String,
        detail: Value,
    },
    Raw { value: Value },
}

/// Envelope published on agent topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub agent: String,
    pub payload: EventPayload,
}

/// Main or debug payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum EventPayload {
    Main { event: AgentEvent },
    Debug { debug: DebugEvent },
}

impl EventEnvelope {
    /// Build a main-topic envelope.
    pub fn main(agent: impl Into<String>, event: AgentEvent) -> Self {
        Self {
            agent: agent.into(),
            payload: EventPayload::Main { event },
        }
    }

    /// Build a debug-topic envelope.
    pub fn debug(agent: impl Into<String>, debug: DebugEvent) -> Self {
        Self {
            agent: agent.into(),
            payload: EventPayload::Debug { debug },
        }
    }

    /// The main-topic event, if this is one.
    pub fn event(&self) -> Option<&AgentEvent> {
        match self.payload {
            EventPayload::Main { ref event } => Some(event),
            EventPayload::Debug { .. } => None,
        }
    }
}

/// Sink the pipeline publishes through. The worker wires this to the event
/// bus; tests collect events directly.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: AgentEvent);
    fn publish_debug(&self, event: DebugEvent);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: AgentEvent) {}
    fn publish_debug(&self, _event: DebugEvent) {}
}
