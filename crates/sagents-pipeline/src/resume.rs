//! Resume: apply operator decisions to a paused run.
//!
//! HITL interrupts apply decisions positionally to the held action requests;
//! sub-agent interrupts re-invoke the originating tool with `resume_info` so
//! the child's own resume runs inside. Either way the pipeline re-enters at
//! `propagate_state` — never at the model call — and any sibling interrupt
//! still pending surfaces next without an intervening LLM call.

use std::collections::{HashMap, HashSet};

use sagents_contract::interrupt::{Decision, HitlInterrupt, Interrupt, InterruptSignal};
use sagents_contract::message::{Message, Role, ToolCall, ToolResult};
use sagents_contract::state::State;
use serde_json::json;

use crate::chain::{steps_for, Chain, PipelineStep};
use crate::outcome::{PipelineError, PipelineRun, PipelineStats, RunOutcome};
use crate::runner::Pipeline;

impl Pipeline {
    /// Apply `decisions` to the state's pending interrupt and continue the
    /// run. Returns `Interrupted` again while sibling interrupts remain.
    pub async fn resume(&self, mut state: State, decisions: Vec<Decision>) -> PipelineRun {
        let mut stats = PipelineStats::default();
        let Some(record) = state.interrupt_data.take() else {
            return PipelineRun {
                state,
                outcome: RunOutcome::Failed(PipelineError::NotInterrupted),
                stats,
            };
        };

        let applied = match record.current {
            Interrupt::Hitl(ref hitl) => {
                self.apply_hitl(&mut state, hitl, &decisions, &mut stats).await
            }
            Interrupt::SubAgent(ref signal) => {
                self.apply_subagent(&mut state, signal, decisions, &mut stats)
                    .await
            }
        };
        if let Err(e) = applied {
            // Leave the record in place so a corrected resume can retry.
            state.interrupt_data = Some(record);
            let outcome = match e {
                PipelineError::Cancelled => RunOutcome::Cancelled,
                e => RunOutcome::Failed(e),
            };
            return PipelineRun {
                state,
                outcome,
                stats,
            };
        }

        if let Some(next) = record.advance() {
            state.interrupt_data = Some(next);
            stats.interrupts += 1;
            return PipelineRun {
                state,
                outcome: RunOutcome::Interrupted,
                stats,
            };
        }

        let mut chain = Chain::new(state);
        chain.stats = stats;
        let steps = steps_for(self.config.mode);
        let start = steps
            .iter()
            .position(|s| *s == PipelineStep::PropagateState)
            .unwrap_or(0);
        let outcome = self.drive(&mut chain, steps, start).await;
        PipelineRun {
            state: chain.state,
            outcome,
            stats: chain.stats,
        }
    }

    /// Apply decisions to held tool calls. Non-gated sibling calls from the
    /// same assistant turn execute as approved. One fresh tool-role message
    /// carries every result in call order.
    async fn apply_hitl(
        &self,
        state: &mut State,
        hitl: &HitlInterrupt,
        decisions: &[Decision],
        stats: &mut PipelineStats,
    ) -> Result<(), PipelineError> {
        let requests = &hitl.action_requests;
        if requests.len() != decisions.len() {
            return Err(PipelineError::DecisionMismatch {
                expected: requests.len(),
                got: decisions.len(),
            });
        }
        for (request, decision) in requests.iter().zip(decisions) {
            if !request.allowed_decisions.contains(&decision.kind()) {
                return Err(PipelineError::DecisionNotAllowed {
                    tool: request.tool_name.clone(),
                    decision: decision.kind(),
                });
            }
        }

        let assistant = state
            .messages
            .iter()
            .rfind(|m| m.role == Role::Assistant && m.has_tool_calls())
            .cloned()
            .ok_or_else(|| {
                PipelineError::State("no assistant tool calls to resume".to_string())
            })?;

        let decided: HashMap<&str, &Decision> = requests
            .iter()
            .map(|r| r.tool_call_id.as_str())
            .zip(decisions)
            .collect();

        let mut to_execute: Vec<ToolCall> = Vec::new();
        let mut rejected: HashMap<String, ToolResult> = HashMap::new();
        for call in assistant.calls() {
            match decided.get(call.call_id.as_str()) {
                None | Some(Decision::Approve) => to_execute.push(call.clone()),
                Some(Decision::Edit {
                    arguments,
                    tool_name,
                }) => {
                    let mut edited = call.clone();
                    edited.arguments = arguments.clone();
                    if let Some(name) = tool_name {
                        edited.name = name.clone();
                    }
                    to_execute.push(edited);
                }
                Some(Decision::Reject { message }) => {
                    let text = match message {
                        Some(reason) => format!("Tool call rejected by operator: {reason}"),
                        None => "Tool call rejected by operator.".to_string(),
                    };
                    rejected.insert(
                        call.call_id.clone(),
                        ToolResult::error(&call.call_id, &call.name, text),
                    );
                }
            }
        }

        let announced: HashSet<String> =
            assistant.calls().iter().map(|c| c.call_id.clone()).collect();
        let executed = self
            .tool_runner()
            .run(&to_execute, &announced)
            .await
            .map_err(|_| PipelineError::Cancelled)?;
        stats.tool_calls += to_execute.len() as u32;
        stats.tool_errors += executed.iter().filter(|r| r.is_error).count() as u32;

        let mut by_id: HashMap<String, ToolResult> = executed
            .into_iter()
            .map(|r| (r.call_id.clone(), r))
            .collect();
        let mut results = Vec::with_capacity(assistant.calls().len());
        for call in assistant.calls() {
            if let Some(result) = rejected.remove(&call.call_id) {
                results.push(result);
            } else if let Some(result) = by_id.remove(&call.call_id) {
                results.push(result);
            }
        }
        state.messages.push(Message::tool_results(results));
        Ok(())
    }

    /// Re-invoke the originating tool with `resume_info` so the paused child
    /// consumes the decisions. The fresh result replaces the one that
    /// carried the signal.
    async fn apply_subagent(
        &self,
        state: &mut State,
        signal: &InterruptSignal,
        decisions: Vec<Decision>,
        stats: &mut PipelineStats,
    ) -> Result<(), PipelineError> {
        let call_id = signal.tool_call_id.clone().ok_or_else(|| {
            PipelineError::State("sub-agent signal missing tool_call_id".to_string())
        })?;
        let call = state
            .messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| m.calls())
            .find(|c| c.call_id == call_id)
            .cloned()
            .ok_or_else(|| {
                PipelineError::State(format!("originating tool call not found: {call_id}"))
            })?;

        let decisions = serde_json::to_value(&decisions)
            .map_err(|e| PipelineError::State(format!("decisions not serializable: {e}")))?;
        let mut arguments = call.arguments.clone();
        if !arguments.is_object() {
            arguments = json!({});
        }
        arguments["resume_info"] = json!({
            "sub_agent_id": signal.sub_agent_id,
            "decisions": decisions,
        });
        let resumed_call = ToolCall {
            arguments,
            ..call
        };

        let announced = HashSet::from([call_id.clone()]);
        let results = self
            .tool_runner()
            .run(std::slice::from_ref(&resumed_call), &announced)
            .await
            .map_err(|_| PipelineError::Cancelled)?;
        let result = results
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::State("tool produced no result".to_string()))?;
        stats.tool_calls += 1;
        if result.is_error {
            stats.tool_errors += 1;
        }

        let carrier = state
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::Tool && m.results().iter().any(|r| r.call_id == call_id));
        match carrier.and_then(|m| m.tool_results.as_mut()) {
            Some(results) => {
                for slot in results.iter_mut() {
                    if slot.call_id == call_id {
                        *slot = result;
                        break;
                    }
                }
            }
            None => state.messages.push(Message::tool_results(vec![result])),
        }
        Ok(())
    }
}
