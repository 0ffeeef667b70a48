//! Core contracts for the Sagents agent runtime.
//!
//! This crate defines the data model and capability traits every other
//! Sagents crate builds on: conversation messages, mutable agent state and
//! its serialized snapshot, interrupt/resume types, the `ChatModel` and
//! `Tool` capabilities, the middleware behavior, event envelopes, ambient
//! context, and the persistence callback contracts.

pub mod agent;
pub mod context;
pub mod display;
pub mod event;
pub mod interrupt;
pub mod message;
pub mod middleware;
pub mod model;
pub mod persistence;
pub mod state;
pub mod status;
pub mod testing;
pub mod tool;

pub use agent::{AgentConfig, AgentConfigBuilder, ConfigError, PipelineMode};
pub use context::{AgentContext, ContextError, RestoreFn};
pub use display::{display_items, DisplayItem, DisplayItemKind};
pub use event::{
    AgentEvent, DebugEvent, EventEnvelope, EventPayload, EventSink, NullSink, ShutdownReason,
    ToolCallInfo, ToolExecutionPhase,
};
pub use interrupt::{
    ActionRequest, Decision, DecisionKind, HitlInterrupt, HitlPolicy, Interrupt, InterruptRecord,
    InterruptSignal,
};
pub use message::{gen_message_id, Message, ProcessedContent, Role, ToolCall, ToolResult};
pub use middleware::{
    fork_with_middleware, AfterModel, Middleware, MiddlewareEntry, MiddlewareError, ModelCallbacks,
};
pub use model::{
    BeforeFallbackFn, ChatModel, ChatModelError, ChatRequest, ChatStream, ChatStreamEvent,
    TokenUsage, ToolSpec,
};
pub use persistence::{
    AgentPersistence, DisplayMessagePersistence, PersistContext, PersistenceError,
};
pub use state::{
    SerializedState, State, StateCodecError, StateDelta, Todo, TodoStatus, STATE_SCHEMA_VERSION,
};
pub use status::Status;
pub use tool::{tool_map, Tool, ToolCallContext, ToolDescriptor, ToolError, ToolOutput};
