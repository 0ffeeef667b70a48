//! The `task` tool: launch, await, and resume sub-agent workers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sagents_contract::agent::AgentConfig;
use sagents_contract::event::AgentEvent;
use sagents_contract::interrupt::{Decision, InterruptSignal};
use sagents_contract::message::{Message, ProcessedContent};
use sagents_contract::model::ChatModel;
use sagents_contract::state::State;
use sagents_contract::status::Status;
use sagents_contract::tool::{Tool, ToolCallContext, ToolDescriptor, ToolError, ToolOutput};
use sagents_runtime::{
    AgentHandle, AgentKey, PlacementError, RegistryError, Sagents, StartOutcome, StopOptions,
    WorkerOptions,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::SubAgentSpec;

/// Tool name the LLM addresses.
pub const TASK_TOOL_NAME: &str = "task";

#[derive(Debug, Deserialize)]
struct ResumeInfo {
    sub_agent_id: String,
    #[serde(default)]
    decisions: Vec<Decision>,
}

/// Launches one child worker per call; parallel calls in one assistant turn
/// run as parallel children. A paused child surfaces as an
/// [`InterruptSignal`] in the result payload rather than an error.
pub struct TaskTool {
    sagents: Sagents,
    default_model: Arc<dyn ChatModel>,
    specs: Arc<HashMap<String, SubAgentSpec>>,
}

impl TaskTool {
    pub(crate) fn new(
        sagents: Sagents,
        default_model: Arc<dyn ChatModel>,
        specs: Arc<HashMap<String, SubAgentSpec>>,
    ) -> Self {
        Self {
            sagents,
            default_model,
            specs,
        }
    }

    async fn launch(
        &self,
        subagent_type: &str,
        prompt: &str,
        ctx: &ToolCallContext,
    ) -> Result<ToolOutput, ToolError> {
        let spec = self
            .specs
            .get(subagent_type)
            .ok_or_else(|| ToolError::NotFound(format!("unknown sub-agent: {subagent_type}")))?;

        let candidates = [
            format!("sub-{subagent_type}"),
            format!("sub-{subagent_type}-{}", uuid::Uuid::now_v7()),
        ];
        for child_id in &candidates {
            match self.try_launch(spec, child_id, prompt, ctx).await? {
                Some(output) => return Ok(output),
                None => continue,
            }
        }
        Err(ToolError::Internal(
            "could not allocate a sub-agent id".to_string(),
        ))
    }

    /// Start a child under `child_id`. `Ok(None)` means the id is taken by
    /// a sibling and the caller should retry with a fresh one.
    async fn try_launch(
        &self,
        spec: &SubAgentSpec,
        child_id: &str,
        prompt: &str,
        ctx: &ToolCallContext,
    ) -> Result<Option<ToolOutput>, ToolError> {
        let key = AgentKey::AgentWorker(child_id.to_string());
        if self.sagents.registry().via(&key).is_ok() {
            return Ok(None);
        }

        let model = spec
            .chat_model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let mut builder = AgentConfig::builder(child_id, model)
            .name(&spec.subagent_type)
            .base_system_prompt(&spec.base_system_prompt)
            .tools(spec.tools.iter().cloned());
        for entry in &spec.middleware {
            builder = builder.middleware(entry.clone());
        }
        let config = builder
            .build()
            .map_err(|e| ToolError::Internal(format!("sub-agent config: {e}")))?;

        let mut state = State::new(child_id);
        state
            .metadata
            .insert("subagent_type".to_string(), json!(spec.subagent_type));
        let options = WorkerOptions {
            initial_state: Some(state),
            context: Some(ctx.context().fork()),
            max_runs: spec.max_runs,
            ..WorkerOptions::default()
        };

        let handle = match self
            .sagents
            .placement()
            .start_sub_agent(ctx.agent_id(), config, options)
            .await
        {
            Ok(StartOutcome::Started(handle)) => handle,
            Ok(StartOutcome::AlreadyStarted(_)) => return Ok(None),
            Err(PlacementError::Registry(RegistryError::AlreadyRegistered(_))) => return Ok(None),
            Err(e) => return Err(ToolError::ExecutionFailed(format!("sub-agent start: {e}"))),
        };

        let mut events = handle.subscribe();
        handle
            .add_message(Message::user(prompt))
            .map_err(|e| ToolError::ExecutionFailed(format!("sub-agent input: {e}")))?;
        let output = self
            .await_child(&handle, &mut events, &spec.subagent_type, ctx)
            .await?;
        Ok(Some(output))
    }

    async fn resume_child(
        &self,
        info: ResumeInfo,
        ctx: &ToolCallContext,
    ) -> Result<ToolOutput, ToolError> {
        let key = AgentKey::AgentWorker(info.sub_agent_id.clone());
        let handle = self
            .sagents
            .registry()
            .via(&key)
            .ok()
            .and_then(|w| w.as_agent().cloned())
            .ok_or_else(|| ToolError::NotFound(format!("sub-agent gone: {}", info.sub_agent_id)))?;

        let subagent_type = handle
            .get_state()
            .await
            .ok()
            .and_then(|s| {
                s.metadata
                    .get("subagent_type")
                    .and_then(|v| v.as_str().map(str::to_string))
            })
            .unwrap_or_else(|| "unknown".to_string());

        let mut events = handle.subscribe();
        handle
            .resume(info.decisions)
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("sub-agent resume: {e}")))?;
        self.await_child(&handle, &mut events, &subagent_type, ctx)
            .await
    }

    /// Wait for the child to reach a terminal status.
    async fn await_child(
        &self,
        handle: &AgentHandle,
        events: &mut broadcast::Receiver<sagents_contract::event::EventEnvelope>,
        subagent_type: &str,
        ctx: &ToolCallContext,
    ) -> Result<ToolOutput, ToolError> {
        loop {
            let envelope = tokio::select! {
                _ = ctx.cancellation().cancelled() => {
                    let _ = self
                        .sagents
                        .stop_agent(handle.agent_id(), StopOptions::default())
                        .await;
                    return Err(ToolError::Internal("run cancelled".to_string()));
                }
                received = events.recv() => match received {
                    Ok(envelope) => envelope,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(ToolError::Internal(
                            "sub-agent event stream closed".to_string(),
                        ));
                    }
                },
            };
            let Some(event) = envelope.event() else {
                continue;
            };
            match event {
                AgentEvent::StatusChanged {
                    new_status: Status::Idle,
                    ..
                } => return self.completed(handle).await,
                AgentEvent::StatusChanged {
                    new_status: Status::Interrupted,
                    ..
                } => return self.interrupted(handle, subagent_type).await,
                AgentEvent::StatusChanged {
                    new_status: Status::Error,
                    detail,
                } => {
                    return Err(ToolError::ExecutionFailed(format!(
                        "sub-agent '{}' failed: {}",
                        handle.agent_id(),
                        detail.clone().unwrap_or_default()
                    )));
                }
                AgentEvent::AgentShutdown { reason } => {
                    return Err(ToolError::ExecutionFailed(format!(
                        "sub-agent '{}' shut down: {}",
                        handle.agent_id(),
                        reason.as_str()
                    )));
                }
                _ => {}
            }
        }
    }

    async fn completed(&self, handle: &AgentHandle) -> Result<ToolOutput, ToolError> {
        let state = handle
            .get_state()
            .await
            .map_err(|e| ToolError::Internal(format!("sub-agent state: {e}")))?;
        let text = state
            .last_assistant_message()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if let Err(e) = self
            .sagents
            .stop_agent(handle.agent_id(), StopOptions::default())
            .await
        {
            tracing::debug!(sub_agent = %handle.agent_id(), error = %e, "finished sub-agent already gone");
        }
        Ok(ToolOutput::text(text))
    }

    async fn interrupted(
        &self,
        handle: &AgentHandle,
        subagent_type: &str,
    ) -> Result<ToolOutput, ToolError> {
        let state = handle
            .get_state()
            .await
            .map_err(|e| ToolError::Internal(format!("sub-agent state: {e}")))?;
        let record = state.interrupt_data.ok_or_else(|| {
            ToolError::Internal("sub-agent interrupted without a record".to_string())
        })?;
        let current = record.current;

        let names: Vec<&str> = current
            .action_requests()
            .iter()
            .map(|r| r.tool_name.as_str())
            .collect();
        // Opaque UI aid; nothing parses this text.
        let text = if names.is_empty() {
            format!(
                "Sub-agent '{}' is waiting for operator input.",
                handle.agent_id()
            )
        } else {
            format!(
                "Sub-agent '{}' is waiting for approval of: {}.",
                handle.agent_id(),
                names.join(", ")
            )
        };

        let signal = InterruptSignal {
            sub_agent_id: handle.agent_id().to_string(),
            subagent_type: subagent_type.to_string(),
            interrupt_data: Box::new(current),
            tool_call_id: None,
        };
        Ok(ToolOutput::text(text).with_processed(ProcessedContent::Interrupt { signal }))
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn descriptor(&self) -> ToolDescriptor {
        let mut types: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        types.sort_unstable();
        ToolDescriptor::new(
            TASK_TOOL_NAME,
            format!(
                "Delegate a task to a sub-agent. Available types: {}",
                types.join(", ")
            ),
        )
        .with_parameters(json!({
            "type": "object",
            "properties": {
                "subagent_type": {
                    "type": "string",
                    "description": "Which sub-agent to launch"
                },
                "prompt": {
                    "type": "string",
                    "description": "Task description for the sub-agent"
                }
            },
            "required": ["subagent_type", "prompt"]
        }))
    }

    async fn execute(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput, ToolError> {
        if let Some(raw) = args.get("resume_info") {
            let info: ResumeInfo = serde_json::from_value(raw.clone())
                .map_err(|e| ToolError::InvalidArguments(format!("resume_info: {e}")))?;
            return self.resume_child(info, ctx).await;
        }

        let subagent_type = args
            .get("subagent_type")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing 'subagent_type'".to_string()))?;
        let prompt = args
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing 'prompt'".to_string()))?;
        self.launch(subagent_type, prompt, ctx).await
    }
}
