//! Human-in-the-loop middleware.
//!
//! Declares the per-tool approval policy the pipeline's pre-tool check
//! consults: when the assistant requests a gated tool, the worker pauses
//! with action requests instead of executing, and an operator resolves each
//! request with an approve/edit/reject decision.
//!
//! # Config
//!
//! The entry config is either a bare list of tool names (all decisions
//! allowed) or a map of tool name to allowed decisions:
//!
//! ```json
//! { "interrupt_on": ["write_file"] }
//! { "interrupt_on": { "write_file": ["approve", "reject"] } }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use sagents_contract::interrupt::{DecisionKind, HitlPolicy};
use sagents_contract::middleware::{Middleware, MiddlewareEntry, MiddlewareError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Entry id / middleware name.
pub const HITL_MIDDLEWARE_NAME: &str = "human_in_the_loop";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InterruptOn {
    Names(Vec<String>),
    Policies(HashMap<String, Vec<DecisionKind>>),
}

#[derive(Debug, Deserialize)]
struct HitlConfig {
    interrupt_on: InterruptOn,
}

fn parse_policy(config: &Value) -> Result<HitlPolicy, MiddlewareError> {
    let parsed: HitlConfig = serde_json::from_value(config.clone())
        .map_err(|e| MiddlewareError::InvalidConfig(format!("interrupt_on: {e}")))?;
    let interrupt_on = match parsed.interrupt_on {
        InterruptOn::Names(names) => {
            if names.is_empty() {
                return Err(MiddlewareError::InvalidConfig(
                    "interrupt_on must name at least one tool".to_string(),
                ));
            }
            return Ok(HitlPolicy::interrupt_on(names));
        }
        InterruptOn::Policies(policies) => {
            for (tool, decisions) in &policies {
                if decisions.is_empty() {
                    return Err(MiddlewareError::InvalidConfig(format!(
                        "tool '{tool}' allows no decisions"
                    )));
                }
            }
            policies
        }
    };
    Ok(HitlPolicy { interrupt_on })
}

/// The HITL middleware. Stateless; the policy lives in the entry config.
#[derive(Debug, Clone, Copy, Default)]
pub struct HumanInTheLoop;

impl HumanInTheLoop {
    /// Build an entry pausing on the given tools with all decisions allowed.
    pub fn interrupt_on<I, S>(tools: I) -> MiddlewareEntry
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = tools.into_iter().map(Into::into).collect();
        MiddlewareEntry::new(Arc::new(Self)).with_config(json!({ "interrupt_on": names }))
    }

    /// Build an entry from a full policy.
    pub fn with_policy(policy: HitlPolicy) -> MiddlewareEntry {
        MiddlewareEntry::new(Arc::new(Self)).with_config(json!({
            "interrupt_on": policy.interrupt_on,
        }))
    }
}

#[async_trait]
impl Middleware for HumanInTheLoop {
    fn name(&self) -> &str {
        HITL_MIDDLEWARE_NAME
    }

    fn init(&self, config: &Value) -> Result<(), MiddlewareError> {
        parse_policy(config).map(|_| ())
    }

    fn hitl_policy(&self, config: &Value) -> Option<HitlPolicy> {
        match parse_policy(config) {
            Ok(policy) => Some(policy),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unparseable HITL policy");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_form_allows_every_decision() {
        let entry = HumanInTheLoop::interrupt_on(["write_file"]);
        let policy = entry.middleware.hitl_policy(&entry.config).unwrap();
        let allowed = policy.allowed_decisions("write_file").unwrap();
        assert_eq!(allowed.len(), 3);
        assert!(policy.allowed_decisions("read_file").is_none());
    }

    #[test]
    fn map_form_restricts_decisions() {
        let entry = HumanInTheLoop::with_policy(HitlPolicy {
            interrupt_on: HashMap::from([(
                "write_file".to_string(),
                vec![DecisionKind::Approve, DecisionKind::Reject],
            )]),
        });
        let policy = entry.middleware.hitl_policy(&entry.config).unwrap();
        let allowed = policy.allowed_decisions("write_file").unwrap();
        assert!(!allowed.contains(&DecisionKind::Edit));
    }

    #[test]
    fn init_rejects_empty_and_malformed_configs() {
        let mw = HumanInTheLoop;
        assert!(mw.init(&json!({ "interrupt_on": [] })).is_err());
        assert!(mw.init(&json!({ "interrupt_on": { "t": [] } })).is_err());
        assert!(mw.init(&json!({})).is_err());
        assert!(mw.init(&json!({ "interrupt_on": ["write_file"] })).is_ok());
    }

    #[test]
    fn entry_id_defaults_to_middleware_name() {
        let entry = HumanInTheLoop::interrupt_on(["write_file"]);
        assert_eq!(entry.id, HITL_MIDDLEWARE_NAME);
    }
}
