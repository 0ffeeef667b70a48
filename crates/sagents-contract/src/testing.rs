//! Test fixtures shared across the workspace.
//!
//! A scripted chat model, canned tools, and an event-collecting sink. These
//! live in the contract crate so every downstream crate's tests build agents
//! the same way.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::event::{AgentEvent, DebugEvent, EventSink};
use crate::message::{Message, ProcessedContent, ToolCall};
use crate::model::{ChatModel, ChatModelError, ChatRequest, ChatStream, ChatStreamEvent, TokenUsage};
use crate::tool::{Tool, ToolCallContext, ToolDescriptor, ToolError, ToolOutput};

/// One scripted model turn.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    pub deltas: Vec<String>,
    pub message: Message,
    pub usage: Option<TokenUsage>,
}

impl ScriptedTurn {
    /// A plain assistant reply, streamed word by word.
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        let deltas = content
            .split_inclusive(' ')
            .map(str::to_string)
            .collect::<Vec<_>>();
        Self {
            deltas,
            message: Message::assistant(content),
            usage: Some(TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
                extra: None,
            }),
        }
    }

    /// An assistant reply requesting tool calls.
    pub fn tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            deltas: Vec::new(),
            message: Message::assistant_with_tool_calls(content, calls),
            usage: None,
        }
    }

    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A chat model replaying a queue of scripted turns.
pub struct ScriptedChatModel {
    model_id: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    /// Errors returned before any scripted turn (for fallback tests).
    failures: Mutex<u32>,
}

impl ScriptedChatModel {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            turns: Mutex::new(VecDeque::new()),
            failures: Mutex::new(0),
        }
    }

    /// Queue a turn.
    #[must_use]
    pub fn with_turn(self, turn: ScriptedTurn) -> Self {
        self.push_turn(turn);
        self
    }

    /// Fail the first `count` calls with a provider error.
    #[must_use]
    pub fn with_failures(self, count: u32) -> Self {
        *self.failures.lock().unwrap() = count;
        self
    }

    /// Queue a turn on an existing model.
    pub fn push_turn(&self, turn: ScriptedTurn) {
        self.turns.lock().unwrap().push_back(turn);
    }

    /// Turns not yet consumed.
    pub fn remaining_turns(&self) -> usize {
        self.turns.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn chat_stream(&self, _request: ChatRequest) -> Result<ChatStream, ChatModelError> {
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(ChatModelError::Provider(format!(
                    "scripted failure from {}",
                    self.model_id
                )));
            }
        }
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatModelError::Provider("script exhausted".to_string()))?;

        let mut events = Vec::new();
        for delta in &turn.deltas {
            events.push(Ok(ChatStreamEvent::TextDelta {
                delta: delta.clone(),
            }));
        }
        for call in turn.message.calls() {
            events.push(Ok(ChatStreamEvent::ToolCallIdentified { call: call.clone() }));
        }
        if let Some(ref usage) = turn.usage {
            events.push(Ok(ChatStreamEvent::Usage {
                usage: usage.clone(),
            }));
        }
        events.push(Ok(ChatStreamEvent::Completed {
            message: turn.message,
            usage: turn.usage,
        }));
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// A tool returning fixed text.
pub struct StaticTool {
    name: String,
    content: String,
    processed: Option<ProcessedContent>,
}

impl StaticTool {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            processed: None,
        }
    }

    /// Also return a processed payload.
    #[must_use]
    pub fn with_processed(mut self, processed: ProcessedContent) -> Self {
        self.processed = Some(processed);
        self
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(&self.name, "static test tool")
    }

    async fn execute(&self, _args: Value, _ctx: &ToolCallContext) -> Result<ToolOutput, ToolError> {
        let mut out = ToolOutput::text(self.content.clone());
        out.processed = self.processed.clone();
        Ok(out)
    }
}

/// A tool that always fails.
pub struct FailingTool {
    name: String,
    reason: String,
}

impl FailingTool {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor::new(&self.name, "failing test tool")
    }

    async fn execute(&self, _args: Value, _ctx: &ToolCallContext) -> Result<ToolOutput, ToolError> {
        Err(ToolError::ExecutionFailed(self.reason.clone()))
    }
}

/// Sink collecting every published event.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<AgentEvent>>,
    debug_events: Mutex<Vec<DebugEvent>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn debug_events(&self) -> Vec<DebugEvent> {
        self.debug_events.lock().unwrap().clone()
    }

    /// Kind strings of collected main events, in publish order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.kind()).collect()
    }
}

impl EventSink for CollectingSink {
    fn publish(&self, event: AgentEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn publish_debug(&self, event: DebugEvent) {
        self.debug_events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripted_model_streams_deltas_then_completion() {
        let model = ScriptedChatModel::new("mock").with_turn(ScriptedTurn::text("hello world"));
        let mut stream = model
            .chat_stream(ChatRequest::new("", vec![]))
            .await
            .unwrap();

        let mut deltas = Vec::new();
        let mut completed = None;
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                ChatStreamEvent::TextDelta { delta } => deltas.push(delta),
                ChatStreamEvent::Completed { message, .. } => completed = Some(message),
                _ => {}
            }
        }
        assert_eq!(deltas.concat(), "hello world");
        assert_eq!(completed.unwrap().content, "hello world");
        assert_eq!(model.remaining_turns(), 0);
    }

    #[tokio::test]
    async fn scripted_model_fails_then_errors_when_exhausted() {
        let model = ScriptedChatModel::new("mock").with_failures(1);
        assert!(model.chat_stream(ChatRequest::new("", vec![])).await.is_err());
        assert!(model.chat_stream(ChatRequest::new("", vec![])).await.is_err());
    }
}
