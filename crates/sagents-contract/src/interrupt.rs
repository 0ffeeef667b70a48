//! Interrupt and resume types for human-in-the-loop pauses.
//!
//! An agent pauses in two ways: a pre-tool HITL policy match (the worker asks
//! an operator before executing tool calls) or a sub-agent lifting its own
//! pause to the parent via an [`InterruptSignal`] embedded in a tool result.
//! Both are plain data; interrupts never travel as errors or panics.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The decisions an operator may take on a pending tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approve,
    Edit,
    Reject,
}

/// An operator decision resolving one pending tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Re-execute the original tool with its original arguments.
    Approve,
    /// Re-execute with replacement arguments (and optionally a replacement
    /// tool name, subject to the request's `allowed_decisions`).
    Edit {
        arguments: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
    },
    /// Do not execute; a synthesized result informs the LLM of the rejection.
    Reject {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Decision {
    /// The kind of this decision, for policy checks.
    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::Approve => DecisionKind::Approve,
            Decision::Edit { .. } => DecisionKind::Edit,
            Decision::Reject { .. } => DecisionKind::Reject,
        }
    }
}

/// One pending tool call awaiting an operator decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    /// Decisions the policy permits for this call.
    pub allowed_decisions: Vec<DecisionKind>,
}

/// A pre-tool HITL interrupt: the set of calls held for approval.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HitlInterrupt {
    pub action_requests: Vec<ActionRequest>,
}

impl HitlInterrupt {
    pub fn new(action_requests: Vec<ActionRequest>) -> Self {
        Self { action_requests }
    }
}

/// A sub-agent interrupt lifted into the parent's pipeline.
///
/// Embedded by the `task` tool in a tool result's `processed_content` so a
/// child pause propagates upward as data rather than as an exception.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptSignal {
    /// Registered id of the paused child worker.
    pub sub_agent_id: String,
    /// Named sub-agent specification the child was built from.
    pub subagent_type: String,
    /// The child's current interrupt (may itself be a sub-agent signal).
    pub interrupt_data: Box<Interrupt>,
    /// The parent-side `task` call that produced this signal. Filled in by
    /// the pipeline from the carrying tool result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// One interrupt, either local HITL or lifted from a sub-agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interrupt {
    Hitl(HitlInterrupt),
    #[serde(rename = "subagent_hitl")]
    SubAgent(InterruptSignal),
}

impl Interrupt {
    /// The action requests an operator must decide, resolving through
    /// sub-agent signals to the innermost HITL interrupt.
    pub fn action_requests(&self) -> &[ActionRequest] {
        match self {
            Interrupt::Hitl(hitl) => &hitl.action_requests,
            Interrupt::SubAgent(signal) => signal.interrupt_data.action_requests(),
        }
    }
}

/// The value of `State.interrupt_data` while a worker is `Interrupted`:
/// one current interrupt plus a FIFO of siblings from the same turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRecord {
    pub current: Interrupt,
    #[serde(default, skip_serializing_if = "VecDeque::is_empty")]
    pub pending_interrupts: VecDeque<Interrupt>,
}

impl InterruptRecord {
    pub fn new(current: Interrupt) -> Self {
        Self {
            current,
            pending_interrupts: VecDeque::new(),
        }
    }

    /// Queue a sibling interrupt behind the current one.
    pub fn enqueue(&mut self, interrupt: Interrupt) {
        self.pending_interrupts.push_back(interrupt);
    }

    /// Consume the current interrupt; the next pending one (if any) becomes
    /// current. Returns `None` when the record is exhausted.
    pub fn advance(mut self) -> Option<Self> {
        let next = self.pending_interrupts.pop_front()?;
        Some(Self {
            current: next,
            pending_interrupts: self.pending_interrupts,
        })
    }
}

/// Per-tool HITL policy: which tool names pause for approval, and which
/// decisions each permits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HitlPolicy {
    pub interrupt_on: std::collections::HashMap<String, Vec<DecisionKind>>,
}

impl HitlPolicy {
    /// Policy pausing on the given tools with all decisions allowed.
    pub fn interrupt_on<I, S>(tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            interrupt_on: tools
                .into_iter()
                .map(|t| {
                    (
                        t.into(),
                        vec![DecisionKind::Approve, DecisionKind::Edit, DecisionKind::Reject],
                    )
                })
                .collect(),
        }
    }

    /// Allowed decisions for a tool, or `None` when the tool is not gated.
    pub fn allowed_decisions(&self, tool_name: &str) -> Option<&[DecisionKind]> {
        self.interrupt_on.get(tool_name).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(id: &str) -> ActionRequest {
        ActionRequest {
            tool_call_id: id.to_string(),
            tool_name: "write_file".to_string(),
            arguments: json!({}),
            allowed_decisions: vec![DecisionKind::Approve],
        }
    }

    #[test]
    fn record_advances_through_pending_fifo() {
        let mut record = InterruptRecord::new(Interrupt::Hitl(HitlInterrupt::new(vec![request(
            "a",
        )])));
        record.enqueue(Interrupt::Hitl(HitlInterrupt::new(vec![request("b")])));
        record.enqueue(Interrupt::Hitl(HitlInterrupt::new(vec![request("c")])));

        let record = record.advance().unwrap();
        assert_eq!(record.current.action_requests()[0].tool_call_id, "b");
        let record = record.advance().unwrap();
        assert_eq!(record.current.action_requests()[0].tool_call_id, "c");
        assert!(record.advance().is_none());
    }

    #[test]
    fn signal_resolves_nested_action_requests() {
        let inner = Interrupt::Hitl(HitlInterrupt::new(vec![request("inner")]));
        let signal = InterruptSignal {
            sub_agent_id: "sub-researcher".to_string(),
            subagent_type: "researcher".to_string(),
            interrupt_data: Box::new(inner),
            tool_call_id: Some("call_1".to_string()),
        };
        let interrupt = Interrupt::SubAgent(signal);
        assert_eq!(interrupt.action_requests()[0].tool_call_id, "inner");
    }

    #[test]
    fn decision_serde_uses_snake_case_tags() {
        let json = serde_json::to_string(&Decision::Edit {
            arguments: json!({"path": "other.txt"}),
            tool_name: None,
        })
        .unwrap();
        assert!(json.contains("\"decision\":\"edit\""));
        let parsed: Decision = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind(), DecisionKind::Edit);
    }

    #[test]
    fn policy_reports_allowed_decisions() {
        let policy = HitlPolicy::interrupt_on(["write_file"]);
        assert!(policy.allowed_decisions("write_file").is_some());
        assert!(policy.allowed_decisions("read_file").is_none());
    }

    #[test]
    fn record_roundtrips_through_json() {
        let mut record =
            InterruptRecord::new(Interrupt::Hitl(HitlInterrupt::new(vec![request("a")])));
        record.enqueue(Interrupt::SubAgent(InterruptSignal {
            sub_agent_id: "sub-coder".to_string(),
            subagent_type: "coder".to_string(),
            interrupt_data: Box::new(Interrupt::Hitl(HitlInterrupt::new(vec![request("b")]))),
            tool_call_id: None,
        }));
        let json = serde_json::to_string(&record).unwrap();
        let parsed: InterruptRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
