//! Tool execution with lifecycle events.
//!
//! Tools run concurrently by default, each in its own task so a panicking
//! tool is isolated and surfaces as an error result the LLM can react to.
//! The coordinating task publishes `executing` before a tool starts and
//! `completed`/`failed` after it joins, per call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sagents_contract::context::AgentContext;
use sagents_contract::event::{AgentEvent, EventSink, ToolCallInfo, ToolExecutionPhase};
use sagents_contract::message::{ToolCall, ToolResult};
use sagents_contract::tool::{Tool, ToolCallContext};
use tokio::task::JoinHandle;

use crate::cancel::{await_or_cancel, CancelAware, RunCancellationToken};

/// Tool scheduling strategy for one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolConcurrency {
    /// All calls of a turn run concurrently.
    #[default]
    Parallel,
    /// Calls run one-by-one in call order.
    Sequential,
}

/// The run was cancelled while tools were in flight. In-flight tasks are
/// signaled through the shared token; any late results are discarded.
#[derive(Debug)]
pub(crate) struct ToolRunCancelled;

pub(crate) struct ToolRunner<'a> {
    pub agent_id: &'a str,
    pub tools: &'a HashMap<String, Arc<dyn Tool>>,
    pub events: Arc<dyn EventSink>,
    pub context: &'a AgentContext,
    pub token: &'a RunCancellationToken,
    pub concurrency: ToolConcurrency,
}

enum Slot {
    Ready(ToolResult),
    Running(ToolCallInfo, JoinHandle<ToolResult>),
}

impl ToolRunner<'_> {
    /// Execute one turn's tool calls. `announced` holds call ids whose
    /// `tool_call_identified` event was already published during streaming.
    pub(crate) async fn run(
        &self,
        calls: &[ToolCall],
        announced: &HashSet<String>,
    ) -> Result<Vec<ToolResult>, ToolRunCancelled> {
        match self.concurrency {
            ToolConcurrency::Parallel => self.run_parallel(calls, announced).await,
            ToolConcurrency::Sequential => self.run_sequential(calls, announced).await,
        }
    }

    async fn run_parallel(
        &self,
        calls: &[ToolCall],
        announced: &HashSet<String>,
    ) -> Result<Vec<ToolResult>, ToolRunCancelled> {
        let slots: Vec<Slot> = calls.iter().map(|c| self.launch(c, announced)).collect();

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::Ready(result) => results.push(result),
                Slot::Running(info, handle) => {
                    match await_or_cancel(self.token, handle).await {
                        CancelAware::Cancelled => return Err(ToolRunCancelled),
                        CancelAware::Value(joined) => {
                            let result = unwrap_join(joined, &info);
                            self.publish_done(&info, &result);
                            results.push(result);
                        }
                    }
                }
            }
        }
        Ok(results)
    }

    async fn run_sequential(
        &self,
        calls: &[ToolCall],
        announced: &HashSet<String>,
    ) -> Result<Vec<ToolResult>, ToolRunCancelled> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            match self.launch(call, announced) {
                Slot::Ready(result) => results.push(result),
                Slot::Running(info, handle) => match await_or_cancel(self.token, handle).await {
                    CancelAware::Cancelled => return Err(ToolRunCancelled),
                    CancelAware::Value(joined) => {
                        let result = unwrap_join(joined, &info);
                        self.publish_done(&info, &result);
                        results.push(result);
                    }
                },
            }
        }
        Ok(results)
    }

    /// Announce and start one call. Unknown tools resolve immediately to an
    /// error result so the LLM can react.
    fn launch(&self, call: &ToolCall, announced: &HashSet<String>) -> Slot {
        let info = ToolCallInfo::from(call);
        if !announced.contains(&call.call_id) {
            self.events.publish(AgentEvent::ToolCallIdentified {
                tool: info.clone(),
            });
        }
        self.events.publish(AgentEvent::ToolExecutionUpdate {
            phase: ToolExecutionPhase::Executing,
            tool: info.clone(),
        });

        let Some(tool) = self.tools.get(&call.name) else {
            let result = ToolResult::error(
                &call.call_id,
                &call.name,
                format!("unknown tool: {}", call.name),
            );
            self.publish_done(&info, &result);
            return Slot::Ready(result);
        };

        let tool = tool.clone();
        let ctx = ToolCallContext::new(self.agent_id, &call.call_id)
            .with_context(AgentContext::init(self.context.fork()))
            .with_events(self.events.clone())
            .with_cancellation(self.token.clone());
        let call = call.clone();
        let handle = tokio::spawn(async move {
            match tool.execute(call.arguments.clone(), &ctx).await {
                Ok(output) => {
                    let mut result = ToolResult::success(&call.call_id, &call.name, output.content);
                    result.processed_content = output.processed;
                    result
                }
                Err(e) => ToolResult::error(&call.call_id, &call.name, e.to_string()),
            }
        });
        Slot::Running(info, handle)
    }

    fn publish_done(&self, info: &ToolCallInfo, result: &ToolResult) {
        let phase = if result.is_error {
            ToolExecutionPhase::Failed
        } else {
            ToolExecutionPhase::Completed
        };
        self.events.publish(AgentEvent::ToolExecutionUpdate {
            phase,
            tool: info.clone(),
        });
    }
}

fn unwrap_join(
    joined: Result<ToolResult, tokio::task::JoinError>,
    info: &ToolCallInfo,
) -> ToolResult {
    match joined {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(tool = %info.name, call_id = %info.call_id, error = %e, "tool task failed");
            ToolResult::error(&info.call_id, &info.name, format!("tool task failed: {e}"))
        }
    }
}
