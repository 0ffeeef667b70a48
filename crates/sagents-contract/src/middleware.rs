//! Middleware behavior and composition.
//!
//! A middleware plugs into well-defined points of the agent lifecycle:
//! prompt and tool contribution at config assembly, state rewrites around
//! the model call, async message handling, and context injection for
//! sub-agent forks. Every hook is optional and defaults to pass-through.
//!
//! Ordering: `before_model` runs in list order, `after_model` in reverse
//! order (sandwich). The first hook error short-circuits the run.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::context::AgentContext;
use crate::interrupt::{HitlPolicy, Interrupt};
use crate::message::Message;
use crate::model::TokenUsage;
use crate::state::State;
use crate::tool::Tool;

/// Middleware errors.
#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("invalid middleware config: {0}")]
    InvalidConfig(String),

    #[error("middleware hook failed: {0}")]
    Hook(String),
}

/// Result of `after_model`: pass the state on, or pause the worker.
#[derive(Debug)]
pub enum AfterModel {
    Continue(State),
    Interrupt { state: State, interrupt: Interrupt },
}

/// Observability callbacks a middleware registers for model streaming.
#[derive(Clone, Default)]
pub struct ModelCallbacks {
    pub on_delta: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_message: Option<Arc<dyn Fn(&Message) + Send + Sync>>,
    pub on_usage: Option<Arc<dyn Fn(&TokenUsage) + Send + Sync>>,
}

impl std::fmt::Debug for ModelCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCallbacks")
            .field("on_delta", &self.on_delta.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_usage", &self.on_usage.is_some())
            .finish()
    }
}

/// Middleware behavior. All hooks default to pass-through.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stable middleware name; the default entry id.
    fn name(&self) -> &str;

    /// One-time config validation at `AgentConfig` assembly.
    fn init(&self, _config: &Value) -> Result<(), MiddlewareError> {
        Ok(())
    }

    /// Contribution to the assembled system prompt.
    fn system_prompt(&self, _config: &Value) -> Option<String> {
        None
    }

    /// Tools this middleware exposes.
    fn tools(&self, _config: &Value) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Model observability callbacks.
    fn callbacks(&self, _config: &Value) -> Option<ModelCallbacks> {
        None
    }

    /// Pre-tool HITL policy, consulted by the pipeline after each model
    /// call. Only approval middleware implements this.
    fn hitl_policy(&self, _config: &Value) -> Option<HitlPolicy> {
        None
    }

    /// Rewrite state before the model call.
    async fn before_model(&self, state: State, _config: &Value) -> Result<State, MiddlewareError> {
        Ok(state)
    }

    /// Rewrite state after the model call, or pause the worker.
    async fn after_model(
        &self,
        state: State,
        _config: &Value,
    ) -> Result<AfterModel, MiddlewareError> {
        Ok(AfterModel::Continue(state))
    }

    /// Receive a message from this middleware's own background task,
    /// routed by the worker via `send_middleware_message`.
    async fn handle_message(
        &self,
        _msg: Value,
        state: State,
        _config: &Value,
    ) -> Result<State, MiddlewareError> {
        Ok(state)
    }

    /// One-shot hook when the worker starts.
    async fn on_server_start(
        &self,
        state: State,
        _config: &Value,
    ) -> Result<State, MiddlewareError> {
        Ok(state)
    }

    /// Inject context values or restore hooks into a sub-agent fork.
    fn on_fork_context(&self, ctx: AgentContext, _config: &Value) -> AgentContext {
        ctx
    }
}

impl std::fmt::Debug for dyn Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Middleware {}>", self.name())
    }
}

/// One configured middleware instance. `id` defaults to the middleware name
/// but may be overridden so multiple instances of one middleware coexist.
#[derive(Clone)]
pub struct MiddlewareEntry {
    pub id: String,
    pub middleware: Arc<dyn Middleware>,
    /// Instance config, created once at assembly and never mutated.
    pub config: Value,
}

impl std::fmt::Debug for MiddlewareEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareEntry")
            .field("id", &self.id)
            .field("middleware", &self.middleware.name())
            .field("config", &self.config)
            .finish()
    }
}

impl MiddlewareEntry {
    pub fn new(middleware: Arc<dyn Middleware>) -> Self {
        Self {
            id: middleware.name().to_string(),
            middleware,
            config: Value::Null,
        }
    }

    /// Override the entry id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the instance config.
    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }
}

/// Fork the worker's context for a child, folding each middleware's
/// `on_fork_context` hook over the snapshot in list order.
pub fn fork_with_middleware(ctx: &AgentContext, entries: &[MiddlewareEntry]) -> AgentContext {
    entries.iter().fold(ctx.fork(), |acc, entry| {
        entry.middleware.on_fork_context(acc, &entry.config)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TagMiddleware {
        name: String,
    }

    #[async_trait]
    impl Middleware for TagMiddleware {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_fork_context(&self, mut ctx: AgentContext, config: &Value) -> AgentContext {
            ctx.put(self.name.clone(), config.clone());
            ctx
        }
    }

    #[tokio::test]
    async fn default_hooks_pass_through() {
        let mw = TagMiddleware {
            name: "tag".to_string(),
        };
        let state = State::new("a-1").with_message(Message::user("hi"));
        let out = mw.before_model(state.clone(), &Value::Null).await.unwrap();
        assert_eq!(out, state);
        assert!(matches!(
            mw.after_model(state.clone(), &Value::Null).await.unwrap(),
            AfterModel::Continue(_)
        ));
        assert!(mw.hitl_policy(&Value::Null).is_none());
        assert!(mw.tools(&Value::Null).is_empty());
    }

    #[test]
    fn entry_id_defaults_to_name_and_can_be_overridden() {
        let mw = Arc::new(TagMiddleware {
            name: "tag".to_string(),
        });
        let entry = MiddlewareEntry::new(mw.clone());
        assert_eq!(entry.id, "tag");
        let entry = MiddlewareEntry::new(mw).with_id("tag-2");
        assert_eq!(entry.id, "tag-2");
    }

    #[test]
    fn fork_folds_hooks_in_list_order() {
        let entries = vec![
            MiddlewareEntry::new(Arc::new(TagMiddleware {
                name: "first".to_string(),
            }))
            .with_config(json!(1)),
            MiddlewareEntry::new(Arc::new(TagMiddleware {
                name: "second".to_string(),
            }))
            .with_config(json!(2)),
        ];
        let mut parent = AgentContext::new();
        parent.put("base", json!(true));

        let forked = fork_with_middleware(&parent, &entries);
        assert_eq!(forked.get("base"), Some(&json!(true)));
        assert_eq!(forked.get("first"), Some(&json!(1)));
        assert_eq!(forked.get("second"), Some(&json!(2)));
    }
}
