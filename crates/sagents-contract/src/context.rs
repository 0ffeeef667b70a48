//! Worker-local ambient context.
//!
//! A string-keyed map for ambient values (tenant, trace ids, user id,
//! feature flags) that flows down the agent hierarchy by explicit snapshot.
//! The worker owns its context; any task it spawns receives a fork and
//! re-initializes its own copy inside the task. Nothing here relies on
//! thread-local or task-local storage.
//!
//! Use context for ambient, non-persistent values. Use `State.metadata` for
//! values that must survive persistence; live handles belong only here.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Error raised by a restore hook.
#[derive(Debug, Clone, Error)]
#[error("context restore failed: {0}")]
pub struct ContextError(pub String);

/// Side-effect hook a middleware attaches to a fork so the receiving worker
/// can rebuild process-local resources (e.g. reattach a trace span). Executed
/// during [`AgentContext::init`]; failures are logged and never fail init.
pub type RestoreFn = Arc<dyn Fn(&AgentContext) -> Result<(), ContextError> + Send + Sync>;

/// Ambient key/value map owned by one worker.
#[derive(Clone, Default)]
pub struct AgentContext {
    values: HashMap<String, Value>,
    restore_fns: Vec<RestoreFn>,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("values", &self.values)
            .field("restore_fns", &self.restore_fns.len())
            .finish()
    }
}

impl AgentContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from an initial value map.
    pub fn from_map(values: HashMap<String, Value>) -> Self {
        Self {
            values,
            restore_fns: Vec::new(),
        }
    }

    /// Initialize a worker-local context from a fork snapshot: the restore
    /// hooks run against the cleaned context, then are discarded. Restore
    /// failures are logged as warnings and do not fail init.
    pub fn init(snapshot: AgentContext) -> Self {
        let ctx = Self {
            values: snapshot.values,
            restore_fns: Vec::new(),
        };
        for restore in &snapshot.restore_fns {
            if let Err(e) = restore(&ctx) {
                tracing::warn!(error = %e, "context restore hook failed");
            }
        }
        ctx
    }

    /// Get a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get a value or a default.
    pub fn fetch(&self, key: &str, default: Value) -> Value {
        self.values.get(key).cloned().unwrap_or(default)
    }

    /// Set a value.
    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Merge a map of values, new entries winning.
    pub fn merge(&mut self, values: HashMap<String, Value>) {
        self.values.extend(values);
    }

    /// All values.
    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    /// Snapshot the values for a child worker. Restore hooks are not
    /// inherited; middleware re-attach them via `on_fork_context`.
    pub fn fork(&self) -> AgentContext {
        Self {
            values: self.values.clone(),
            restore_fns: Vec::new(),
        }
    }

    /// Attach a restore hook to this snapshot.
    pub fn add_restore_fn(&mut self, restore: RestoreFn) {
        self.restore_fns.push(restore);
    }

    /// Number of attached restore hooks.
    pub fn restore_fn_count(&self) -> usize {
        self.restore_fns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fork_isolates_parent_and_child_writes() {
        let mut parent = AgentContext::new();
        parent.put("tenant", json!("acme"));

        let mut child = parent.fork();
        child.put("trace", json!("t-1"));
        parent.put("tenant", json!("globex"));

        assert_eq!(child.get("tenant"), Some(&json!("acme")));
        assert!(parent.get("trace").is_none());
    }

    #[test]
    fn fetch_returns_default_for_missing_key() {
        let ctx = AgentContext::new();
        assert_eq!(ctx.fetch("missing", json!(42)), json!(42));
    }

    #[test]
    fn init_runs_restore_hooks_against_clean_context() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let mut snapshot = AgentContext::new();
        snapshot.put("tenant", json!("acme"));
        snapshot.add_restore_fn(Arc::new(|ctx| {
            assert_eq!(ctx.get("tenant"), Some(&json!("acme")));
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let ctx = AgentContext::init(snapshot);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.restore_fn_count(), 0);
    }

    #[test]
    fn init_survives_failing_restore_hook() {
        let mut snapshot = AgentContext::new();
        snapshot.put("k", json!(1));
        snapshot.add_restore_fn(Arc::new(|_| Err(ContextError("boom".to_string()))));

        let ctx = AgentContext::init(snapshot);
        assert_eq!(ctx.get("k"), Some(&json!(1)));
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut ctx = AgentContext::from_map(HashMap::from([("a".to_string(), json!(1))]));
        ctx.merge(HashMap::from([
            ("a".to_string(), json!(2)),
            ("b".to_string(), json!(3)),
        ]));
        assert_eq!(ctx.get("a"), Some(&json!(2)));
        assert_eq!(ctx.get("b"), Some(&json!(3)));
    }
}
