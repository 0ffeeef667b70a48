//! UI-oriented projection of conversation messages.
//!
//! A single `Message` expands into one or more display items with a stable
//! `sequence` within the parent. The projection is append-only and may
//! outlive the serialized `State`: middleware that compacts `messages` never
//! rewrites display history.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::message::{Message, Role};

/// Kind of one display item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayItemKind {
    Text,
    Thinking,
    ToolCall,
    ToolResult,
}

/// One UI-facing item expanded from a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayItem {
    /// The message this item was expanded from.
    pub message_id: String,
    /// Stable position within the parent message.
    pub sequence: u32,
    pub kind: DisplayItemKind,
    pub content: Value,
}

/// Expand a message into its display items.
///
/// Order within a message: thinking, text, tool calls (assistant) or tool
/// results (tool role). System messages produce no items.
pub fn display_items(message: &Message) -> Vec<DisplayItem> {
    let mut items = Vec::new();
    let mut sequence = 0u32;
    let mut push = |kind: DisplayItemKind, content: Value| {
        items.push(DisplayItem {
            message_id: message.id.clone(),
            sequence,
            kind,
            content,
        });
        sequence += 1;
    };

    match message.role {
        Role::System => {}
        Role::User => push(DisplayItemKind::Text, json!({ "text": message.content })),
        Role::Assistant => {
            if let Some(ref thinking) = message.thinking {
                push(DisplayItemKind::Thinking, json!({ "text": thinking }));
            }
            if !message.content.is_empty() {
                push(DisplayItemKind::Text, json!({ "text": message.content }));
            }
            for call in message.calls() {
                push(
                    DisplayItemKind::ToolCall,
                    json!({
                        "call_id": call.call_id,
                        "name": call.name,
                        "arguments": call.arguments,
                        "display_text": call.display_text,
                    }),
                );
            }
        }
        Role::Tool => {
            for result in message.results() {
                push(
                    DisplayItemKind::ToolResult,
                    json!({
                        "call_id": result.call_id,
                        "name": result.name,
                        "content": result.content,
                        "is_error": result.is_error,
                    }),
                );
            }
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ToolCall, ToolResult};
    use serde_json::json;

    #[test]
    fn assistant_expands_thinking_text_and_calls_in_order() {
        let msg = Message::assistant_with_tool_calls(
            "Let me check",
            vec![ToolCall::new("c1", "search", json!({"q": "rust"}))],
        )
        .with_thinking("considering options");

        let items = display_items(&msg);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].kind, DisplayItemKind::Thinking);
        assert_eq!(items[1].kind, DisplayItemKind::Text);
        assert_eq!(items[2].kind, DisplayItemKind::ToolCall);
        assert_eq!(
            items.iter().map(|i| i.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(items.iter().all(|i| i.message_id == msg.id));
    }

    #[test]
    fn tool_message_expands_each_result() {
        let msg = Message::tool_results(vec![
            ToolResult::success("c1", "search", "ok"),
            ToolResult::error("c2", "write_file", "denied"),
        ]);
        let items = display_items(&msg);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.kind == DisplayItemKind::ToolResult));
        assert_eq!(items[1].content["is_error"], json!(true));
    }

    #[test]
    fn system_messages_produce_nothing() {
        assert!(display_items(&Message::system("prompt")).is_empty());
    }
}
