//! Persistence callback contracts.
//!
//! Concrete backends (SQL, KV) live in owner applications; the runtime only
//! invokes these traits at well-defined lifecycle points and never assumes
//! success — failures are logged and never alter `State` or command flow.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::display::DisplayItem;
use crate::event::{ToolCallInfo, ToolExecutionPhase};
use crate::message::Message;
use crate::state::SerializedState;

/// The lifecycle point a persistence call happens at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistContext {
    OnCompletion,
    OnError,
    OnInterrupt,
    OnTitleGenerated,
    OnShutdown,
}

impl PersistContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistContext::OnCompletion => "on_completion",
            PersistContext::OnError => "on_error",
            PersistContext::OnInterrupt => "on_interrupt",
            PersistContext::OnTitleGenerated => "on_title_generated",
            PersistContext::OnShutdown => "on_shutdown",
        }
    }
}

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Whole-state persistence: serialize at lifecycle points, restore at start.
#[async_trait]
pub trait AgentPersistence: Send + Sync {
    /// Persist a state snapshot.
    async fn persist(
        &self,
        agent_id: &str,
        state: &SerializedState,
        context: PersistContext,
    ) -> Result<(), PersistenceError>;

    /// Load the latest snapshot for an agent.
    async fn load(&self, agent_id: &str) -> Result<SerializedState, PersistenceError>;
}

/// Persistence for the user-facing display projection and tool statuses.
/// This history is append-only and may outlive the serialized state.
#[async_trait]
pub trait DisplayMessagePersistence: Send + Sync {
    /// Persist one message's display items. Returns the saved items.
    async fn save_message(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> Result<Vec<DisplayItem>, PersistenceError>;

    /// Record a tool execution status change.
    async fn update_tool_status(
        &self,
        phase: ToolExecutionPhase,
        tool: &ToolCallInfo,
    ) -> Result<DisplayItem, PersistenceError>;
}
