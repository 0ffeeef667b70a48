//! The `ChatModel` capability: the runtime's only view of an LLM provider.
//!
//! Provider bindings (wire protocol, auth, streaming decode) live outside the
//! kernel; the pipeline consumes this trait and nothing else.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::message::{Message, ToolCall};

/// Chat model errors.
#[derive(Debug, Clone, Error)]
pub enum ChatModelError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Per-call token accounting. Provider-specific extras ride in `extra`
/// verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// A tool advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments.
    pub parameters: Value,
}

/// One chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
}

impl ChatRequest {
    pub fn new(system_prompt: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages,
            tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// Streaming events produced by a chat call.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatStreamEvent {
    /// Incremental assistant text.
    TextDelta { delta: String },
    /// A tool call fully parsed from the stream.
    ToolCallIdentified { call: ToolCall },
    /// Token accounting for this call.
    Usage { usage: TokenUsage },
    /// Terminal event carrying the complete assistant message.
    Completed {
        message: Message,
        usage: Option<TokenUsage>,
    },
}

/// Stream of chat events. `Completed` is always the last item.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatStreamEvent, ChatModelError>> + Send>>;

/// A chat-completion capability.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Stable identifier for logging and fallback reporting.
    fn model_id(&self) -> &str;

    /// Dispatch one streaming chat request.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, ChatModelError>;
}

impl std::fmt::Debug for dyn ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<ChatModel {}>", self.model_id())
    }
}

/// Hook rewriting the request before a fallback model attempt (e.g. trimming
/// context for a cheaper model).
pub type BeforeFallbackFn = Arc<dyn Fn(ChatRequest) -> ChatRequest + Send + Sync>;
