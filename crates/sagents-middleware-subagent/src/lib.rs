//! Sub-agent middleware: named child specifications and the `task` tool.
//!
//! The `task` tool launches a child worker from a named specification,
//! forwards the caller's forked context, and waits for the child to finish.
//! A child that pauses for approval does not block the parent with an
//! error: the tool returns normally with an [`InterruptSignal`] in the
//! result's processed payload, the parent's pipeline lifts it into an
//! interrupt, and a later parent `resume` re-invokes the tool with
//! `resume_info` so the child's own resume runs inside.

mod task_tool;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sagents_contract::middleware::{Middleware, MiddlewareEntry, MiddlewareError};
use sagents_contract::model::ChatModel;
use sagents_contract::tool::Tool;
use sagents_runtime::Sagents;
use serde_json::Value;

pub use task_tool::{TaskTool, TASK_TOOL_NAME};

/// Entry id / middleware name.
pub const SUBAGENT_MIDDLEWARE_NAME: &str = "subagent";

/// A named sub-agent specification the `task` tool builds children from.
#[derive(Clone)]
pub struct SubAgentSpec {
    pub subagent_type: String,
    /// Shown to the parent model in the `task` tool description.
    pub description: String,
    pub base_system_prompt: String,
    pub tools: Vec<Arc<dyn Tool>>,
    pub middleware: Vec<MiddlewareEntry>,
    /// Overrides the parent's model when set.
    pub chat_model: Option<Arc<dyn ChatModel>>,
    pub max_runs: Option<u32>,
}

impl SubAgentSpec {
    pub fn new(subagent_type: impl Into<String>) -> Self {
        Self {
            subagent_type: subagent_type.into(),
            description: String::new(),
            base_system_prompt: String::new(),
            tools: Vec::new(),
            middleware: Vec::new(),
            chat_model: None,
            max_runs: None,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn base_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    #[must_use]
    pub fn middleware(mut self, entry: MiddlewareEntry) -> Self {
        self.middleware.push(entry);
        self
    }

    #[must_use]
    pub fn chat_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.chat_model = Some(model);
        self
    }

    #[must_use]
    pub fn max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }
}

/// The sub-agent middleware: contributes the `task` tool and a prompt
/// section listing the available sub-agents.
pub struct SubAgentMiddleware {
    tool: Arc<TaskTool>,
    specs: Arc<HashMap<String, SubAgentSpec>>,
}

impl SubAgentMiddleware {
    /// Build from the runtime handle, the model children inherit by
    /// default, and the named specifications.
    pub fn new(
        sagents: Sagents,
        default_model: Arc<dyn ChatModel>,
        specs: impl IntoIterator<Item = SubAgentSpec>,
    ) -> Self {
        let specs: Arc<HashMap<String, SubAgentSpec>> = Arc::new(
            specs
                .into_iter()
                .map(|s| (s.subagent_type.clone(), s))
                .collect(),
        );
        let tool = Arc::new(TaskTool::new(sagents, default_model, specs.clone()));
        Self { tool, specs }
    }

    /// Wrap into a middleware entry.
    pub fn entry(self) -> MiddlewareEntry {
        MiddlewareEntry::new(Arc::new(self))
    }
}

#[async_trait]
impl Middleware for SubAgentMiddleware {
    fn name(&self) -> &str {
        SUBAGENT_MIDDLEWARE_NAME
    }

    fn init(&self, _config: &Value) -> Result<(), MiddlewareError> {
        if self.specs.is_empty() {
            return Err(MiddlewareError::InvalidConfig(
                "no sub-agent specifications configured".to_string(),
            ));
        }
        Ok(())
    }

    fn system_prompt(&self, _config: &Value) -> Option<String> {
        let mut types: Vec<&SubAgentSpec> = self.specs.values().collect();
        types.sort_by(|a, b| a.subagent_type.cmp(&b.subagent_type));
        let lines: Vec<String> = types
            .iter()
            .map(|s| {
                if s.description.is_empty() {
                    format!("- {}", s.subagent_type)
                } else {
                    format!("- {}: {}", s.subagent_type, s.description)
                }
            })
            .collect();
        Some(format!(
            "You can delegate work with the `task` tool. Available sub-agents:\n{}",
            lines.join("\n")
        ))
    }

    fn tools(&self, _config: &Value) -> Vec<Arc<dyn Tool>> {
        vec![self.tool.clone()]
    }
}
