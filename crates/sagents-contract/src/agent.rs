//! Immutable agent configuration.
//!
//! An `AgentConfig` is assembled once per worker start and never mutated.
//! Assembly composes the system prompt and tool set from user input plus
//! middleware contributions, and fails fast on invalid configuration.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::middleware::{MiddlewareEntry, MiddlewareError};
use crate::model::{BeforeFallbackFn, ChatModel};
use crate::tool::Tool;

/// Pipeline mode override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    /// The full step sequence with middleware hooks and HITL.
    #[default]
    Default,
    /// Raw model loop: middleware hooks and HITL are skipped. Permitted but
    /// discouraged; HITL and state propagation are not guaranteed.
    Raw,
}

/// Configuration assembly errors. Raised at construction, never caught by
/// the runtime.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("agent_id must not be empty")]
    EmptyAgentId,

    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("middleware '{middleware}' failed to initialize: {source}")]
    MiddlewareInit {
        middleware: String,
        #[source]
        source: MiddlewareError,
    },

    #[error("duplicate middleware id: {0}")]
    DuplicateMiddlewareId(String),
}

/// Immutable configuration for one agent.
#[derive(Clone)]
pub struct AgentConfig {
    /// Stable agent identifier; matches the worker's registered key.
    pub agent_id: String,
    /// Human-readable name.
    pub name: String,
    pub chat_model: Arc<dyn ChatModel>,
    /// Tried in order after the primary model errors.
    pub fallback_models: Vec<Arc<dyn ChatModel>>,
    pub base_system_prompt: String,
    /// Assembled tool set: user tools followed by middleware contributions
    /// in middleware order.
    pub tools: Vec<Arc<dyn Tool>>,
    pub middleware: Vec<MiddlewareEntry>,
    /// Base prompt concatenated with each middleware's contribution.
    pub assembled_system_prompt: String,
    pub mode: PipelineMode,
    /// Rewrites the request before each fallback attempt.
    pub before_fallback: Option<BeforeFallbackFn>,
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("agent_id", &self.agent_id)
            .field("name", &self.name)
            .field("chat_model", &self.chat_model.model_id())
            .field("fallback_models", &self.fallback_models.len())
            .field("tools", &self.tools.len())
            .field("middleware", &self.middleware.len())
            .field("mode", &self.mode)
            .finish()
    }
}

impl AgentConfig {
    /// Start building a config.
    pub fn builder(
        agent_id: impl Into<String>,
        chat_model: Arc<dyn ChatModel>,
    ) -> AgentConfigBuilder {
        AgentConfigBuilder::new(agent_id, chat_model)
    }

    /// Find a middleware entry by id.
    pub fn middleware_entry(&self, id: &str) -> Option<&MiddlewareEntry> {
        self.middleware.iter().find(|e| e.id == id)
    }
}

/// Builder for [`AgentConfig`]; `build` performs assembly and validation.
pub struct AgentConfigBuilder {
    agent_id: String,
    name: Option<String>,
    chat_model: Arc<dyn ChatModel>,
    fallback_models: Vec<Arc<dyn ChatModel>>,
    base_system_prompt: String,
    tools: Vec<Arc<dyn Tool>>,
    middleware: Vec<MiddlewareEntry>,
    mode: PipelineMode,
    before_fallback: Option<BeforeFallbackFn>,
}

impl AgentConfigBuilder {
    pub fn new(agent_id: impl Into<String>, chat_model: Arc<dyn ChatModel>) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: None,
            chat_model,
            fallback_models: Vec::new(),
            base_system_prompt: String::new(),
            tools: Vec::new(),
            middleware: Vec::new(),
            mode: PipelineMode::Default,
            before_fallback: None,
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
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
    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    #[must_use]
    pub fn middleware(mut self, entry: MiddlewareEntry) -> Self {
        self.middleware.push(entry);
        self
    }

    #[must_use]
    pub fn fallback_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.fallback_models.push(model);
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn before_fallback(mut self, hook: BeforeFallbackFn) -> Self {
        self.before_fallback = Some(hook);
        self
    }

    /// Assemble the config: validate middleware, compose the system prompt,
    /// concatenate user and middleware tools, reject duplicates.
    pub fn build(self) -> Result<AgentConfig, ConfigError> {
        if self.agent_id.is_empty() {
            return Err(ConfigError::EmptyAgentId);
        }

        let mut entry_ids = HashSet::new();
        for entry in &self.middleware {
            if !entry_ids.insert(entry.id.clone()) {
                return Err(ConfigError::DuplicateMiddlewareId(entry.id.clone()));
            }
            entry
                .middleware
                .init(&entry.config)
                .map_err(|source| ConfigError::MiddlewareInit {
                    middleware: entry.id.clone(),
                    source,
                })?;
        }

        let mut prompt_parts = Vec::new();
        if !self.base_system_prompt.is_empty() {
            prompt_parts.push(self.base_system_prompt.clone());
        }
        for entry in &self.middleware {
            if let Some(contribution) = entry.middleware.system_prompt(&entry.config) {
                prompt_parts.push(contribution);
            }
        }
        let assembled_system_prompt = prompt_parts.join("\n\n");

        let mut tools = self.tools;
        for entry in &self.middleware {
            tools.extend(entry.middleware.tools(&entry.config));
        }
        let mut seen = HashSet::new();
        for tool in &tools {
            let name = tool.descriptor().name;
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateTool(name));
            }
        }

        if self.mode == PipelineMode::Raw {
            tracing::warn!(
                agent_id = %self.agent_id,
                "raw pipeline mode bypasses middleware; HITL and state propagation are not guaranteed"
            );
        }

        Ok(AgentConfig {
            name: self.name.unwrap_or_else(|| self.agent_id.clone()),
            agent_id: self.agent_id,
            chat_model: self.chat_model,
            fallback_models: self.fallback_models,
            base_system_prompt: self.base_system_prompt,
            tools,
            middleware: self.middleware,
            assembled_system_prompt,
            mode: self.mode,
            before_fallback: self.before_fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Middleware;
    use crate::testing::{ScriptedChatModel, StaticTool};
    use async_trait::async_trait;
    use serde_json::Value;

    struct PromptMiddleware;

    #[async_trait]
    impl Middleware for PromptMiddleware {
        fn name(&self) -> &str {
            "prompt"
        }

        fn system_prompt(&self, _config: &Value) -> Option<String> {
            Some("Always be brief.".to_string())
        }

        fn tools(&self, _config: &Value) -> Vec<Arc<dyn Tool>> {
            vec![Arc::new(StaticTool::new("lookup", "found"))]
        }
    }

    struct RejectingMiddleware;

    #[async_trait]
    impl Middleware for RejectingMiddleware {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn init(&self, _config: &Value) -> Result<(), MiddlewareError> {
            Err(MiddlewareError::InvalidConfig("missing option".to_string()))
        }
    }

    fn model() -> Arc<dyn ChatModel> {
        Arc::new(ScriptedChatModel::new("mock-model"))
    }

    #[test]
    fn build_assembles_prompt_and_tools_in_order() {
        let config = AgentConfig::builder("a-1", model())
            .base_system_prompt("You are helpful.")
            .tool(Arc::new(StaticTool::new("search", "hit")))
            .middleware(MiddlewareEntry::new(Arc::new(PromptMiddleware)))
            .build()
            .unwrap();

        assert_eq!(
            config.assembled_system_prompt,
            "You are helpful.\n\nAlways be brief."
        );
        let names: Vec<String> = config.tools.iter().map(|t| t.descriptor().name).collect();
        assert_eq!(names, vec!["search", "lookup"]);
    }

    #[test]
    fn build_rejects_duplicate_tool_names() {
        let err = AgentConfig::builder("a-1", model())
            .tool(Arc::new(StaticTool::new("lookup", "user")))
            .middleware(MiddlewareEntry::new(Arc::new(PromptMiddleware)))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTool(name) if name == "lookup"));
    }

    #[test]
    fn build_wraps_middleware_init_failure_with_name() {
        let err = AgentConfig::builder("a-1", model())
            .middleware(MiddlewareEntry::new(Arc::new(RejectingMiddleware)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("rejecting"));
    }

    #[test]
    fn build_rejects_empty_agent_id_and_duplicate_entry_ids() {
        assert!(matches!(
            AgentConfig::builder("", model()).build(),
            Err(ConfigError::EmptyAgentId)
        ));
        let err = AgentConfig::builder("a-1", model())
            .middleware(MiddlewareEntry::new(Arc::new(PromptMiddleware)))
            .middleware(MiddlewareEntry::new(Arc::new(PromptMiddleware)))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMiddlewareId(_)));
    }
}
