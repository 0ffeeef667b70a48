//! Core message types for agent conversations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::interrupt::InterruptSignal;
use crate::state::StateDelta;

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Generate a time-ordered UUID v7 message identifier.
pub fn gen_message_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// A message in the conversation.
///
/// Assistant messages may carry `tool_calls`; tool messages carry the
/// `tool_results` produced for one assistant turn (all results for one turn
/// are packaged into a single tool-role message).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Stable message identifier (UUID v7, auto-generated).
    #[serde(default = "gen_message_id")]
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Assistant reasoning text, surfaced as a `thinking` display item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Tool calls made by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool results answering an assistant turn (for tool role).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            id: gen_message_id(),
            role: Role::System,
            content: content.into(),
            thinking: None,
            tool_calls: None,
            tool_results: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: gen_message_id(),
            role: Role::User,
            content: content.into(),
            thinking: None,
            tool_calls: None,
            tool_results: None,
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: gen_message_id(),
            role: Role::Assistant,
            content: content.into(),
            thinking: None,
            tool_calls: None,
            tool_results: None,
        }
    }

    /// Create an assistant message with tool calls.
    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            id: gen_message_id(),
            role: Role::Assistant,
            content: content.into(),
            thinking: None,
            tool_calls: if calls.is_empty() { None } else { Some(calls) },
            tool_results: None,
        }
    }

    /// Create a tool-role message carrying one turn's results.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            id: gen_message_id(),
            role: Role::Tool,
            content: String::new(),
            thinking: None,
            tool_calls: None,
            tool_results: Some(results),
        }
    }

    /// Attach reasoning text.
    #[must_use]
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    /// Whether this assistant message requests tool calls.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Tool calls requested by this message, if any.
    pub fn calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    /// Tool results carried by this message, if any.
    pub fn results(&self) -> &[ToolResult] {
        self.tool_results.as_deref().unwrap_or_default()
    }
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this tool call.
    pub call_id: String,
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool as JSON.
    pub arguments: Value,
    /// Optional UI-facing text describing the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_text: Option<String>,
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(call_id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
            display_text: None,
        }
    }

    /// Set the display text.
    #[must_use]
    pub fn with_display_text(mut self, text: impl Into<String>) -> Self {
        self.display_text = Some(text.into());
        self
    }
}

/// Outcome of one tool call.
///
/// `content` is the opaque text returned to the LLM. `processed_content` is a
/// typed payload lane for structured data the runtime consumes (state deltas,
/// sub-agent interrupt signals) without the LLM ever seeing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The tool call this result answers.
    pub call_id: String,
    /// Tool name.
    pub name: String,
    /// Text sent back to the LLM.
    pub content: String,
    /// Typed payload consumed by the runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_content: Option<ProcessedContent>,
    /// Whether the call failed.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful result.
    pub fn success(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            processed_content: None,
            is_error: false,
        }
    }

    /// Create an error result.
    pub fn error(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            content: content.into(),
            processed_content: None,
            is_error: true,
        }
    }

    /// Attach a processed payload.
    #[must_use]
    pub fn with_processed(mut self, processed: ProcessedContent) -> Self {
        self.processed_content = Some(processed);
        self
    }

    /// The embedded interrupt signal, if any.
    pub fn interrupt_signal(&self) -> Option<&InterruptSignal> {
        match self.processed_content {
            Some(ProcessedContent::Interrupt { ref signal }) => Some(signal),
            _ => None,
        }
    }

    /// The embedded state delta, if any.
    pub fn state_delta(&self) -> Option<&StateDelta> {
        match self.processed_content {
            Some(ProcessedContent::StateDelta { ref delta }) => Some(delta),
            _ => None,
        }
    }
}

/// Typed payload a tool returns alongside its text content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessedContent {
    /// A delta to merge into the owning agent's `State`.
    StateDelta { delta: StateDelta },
    /// A sub-agent interrupt lifted through the pipeline.
    Interrupt { signal: InterruptSignal },
    /// Opaque structured data for the caller.
    Value { value: Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_message_defaults() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(!msg.has_tool_calls());
        assert!(msg.results().is_empty());
    }

    #[test]
    fn message_ids_are_uuid_v7_and_unique() {
        let msgs = vec![
            Message::system("sys"),
            Message::user("usr"),
            Message::assistant("asst"),
            Message::assistant_with_tool_calls("tc", vec![]),
            Message::tool_results(vec![]),
        ];
        for msg in &msgs {
            assert_eq!(msg.id.len(), 36, "id should be UUID format: {}", msg.id);
            assert_eq!(&msg.id[14..15], "7", "UUID version should be 7: {}", msg.id);
        }
        let ids: std::collections::HashSet<&str> = msgs.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids.len(), msgs.len());
    }

    #[test]
    fn assistant_with_empty_calls_has_no_tool_calls() {
        let msg = Message::assistant_with_tool_calls("text", vec![]);
        assert!(msg.tool_calls.is_none());
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn serialization_omits_empty_optionals() {
        let msg = Message::user("test");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_results"));
        assert!(!json.contains("thinking"));
    }

    #[test]
    fn tool_result_roundtrip_with_processed_content() {
        let result = ToolResult::success("call_1", "search", "found it").with_processed(
            ProcessedContent::Value {
                value: json!({"hits": 3}),
            },
        );
        let json = serde_json::to_string(&result).unwrap();
        let parsed: ToolResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
        assert!(parsed.interrupt_signal().is_none());
    }

    #[test]
    fn tool_call_roundtrip_preserves_arguments_verbatim() {
        let call = ToolCall::new("c1", "write_file", json!({"path": "hello.txt", "content": "hi"}))
            .with_display_text("Writing hello.txt");
        let json = serde_json::to_string(&call).unwrap();
        let parsed: ToolCall = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.arguments["path"], "hello.txt");
        assert_eq!(parsed.display_text.as_deref(), Some("Writing hello.txt"));
    }
}
