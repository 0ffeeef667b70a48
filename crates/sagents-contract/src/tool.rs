//! Tool trait and execution context.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::AgentContext;
use crate::event::{AgentEvent, DebugEvent, EventSink, NullSink};
use crate::message::ProcessedContent;
use crate::model::ToolSpec;

/// Tool execution errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Tool descriptor containing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Unique tool name, as the LLM addresses it.
    pub name: String,
    /// Tool description shown to the model.
    pub description: String,
    /// JSON schema for arguments.
    pub parameters: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }
    }

    /// Set the parameters schema.
    #[must_use]
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    /// Advertise this tool to a model.
    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// What a tool returns: text for the LLM plus an optional typed payload for
/// the runtime (state delta or interrupt signal).
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub processed: Option<ProcessedContent>,
}

impl ToolOutput {
    /// Plain text output.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            processed: None,
        }
    }

    /// Attach a processed payload.
    #[must_use]
    pub fn with_processed(mut self, processed: ProcessedContent) -> Self {
        self.processed = Some(processed);
        self
    }
}

/// Execution context handed to each tool invocation.
///
/// Carries the owning agent's id, a fork of the worker's ambient context,
/// an event sink, and the run's cancellation token. Tools run in their own
/// tasks; long-running tools should observe cancellation within bounded time.
#[derive(Clone)]
pub struct ToolCallContext {
    agent_id: String,
    call_id: String,
    context: AgentContext,
    events: Arc<dyn EventSink>,
    cancellation: CancellationToken,
}

impl ToolCallContext {
    pub fn new(agent_id: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            call_id: call_id.into(),
            context: AgentContext::new(),
            events: Arc::new(NullSink),
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: AgentContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The owning agent's id.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// The tool call being executed.
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Ambient context forked from the worker.
    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    /// Publish a main-topic event on behalf of the owning agent.
    pub fn publish(&self, event: AgentEvent) {
        self.events.publish(event);
    }

    /// Publish a debug-topic event on behalf of the owning agent.
    pub fn publish_debug(&self, event: DebugEvent) {
        self.events.publish_debug(event);
    }

    /// The run's cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A named, schema-described function the LLM may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool descriptor.
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool.
    async fn execute(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput, ToolError>;
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Tool {}>", self.descriptor().name)
    }
}

/// Build a name-keyed tool map.
pub fn tool_map<I>(tools: I) -> HashMap<String, Arc<dyn Tool>>
where
    I: IntoIterator<Item = Arc<dyn Tool>>,
{
    tools
        .into_iter()
        .map(|t| (t.descriptor().name, t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("noop", "Does nothing")
        }

        async fn execute(
            &self,
            _args: Value,
            _ctx: &ToolCallContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text("done"))
        }
    }

    #[test]
    fn descriptor_spec_carries_schema() {
        let descriptor = ToolDescriptor::new("search", "Search the web")
            .with_parameters(json!({"type": "object", "properties": {"q": {"type": "string"}}}));
        let spec = descriptor.to_spec();
        assert_eq!(spec.name, "search");
        assert_eq!(spec.parameters["properties"]["q"]["type"], "string");
    }

    #[test]
    fn tool_map_keys_by_name() {
        let map = tool_map([Arc::new(NoopTool) as Arc<dyn Tool>]);
        assert!(map.contains_key("noop"));
    }

    #[tokio::test]
    async fn context_defaults_are_inert() {
        let ctx = ToolCallContext::new("agent-1", "call_1");
        assert_eq!(ctx.agent_id(), "agent-1");
        assert!(!ctx.is_cancelled());
        let out = NoopTool.execute(json!({}), &ctx).await.unwrap();
        assert_eq!(out.content, "done");
    }
}
