//! The chain threaded through pipeline steps, and the step sequence itself.

use std::collections::HashSet;
use std::sync::Arc;

use sagents_contract::agent::PipelineMode;
use sagents_contract::message::{Message, Role, ToolResult};
use sagents_contract::state::State;

use crate::outcome::PipelineStats;

/// Zero-arg predicate the caller supplies to pause a run between steps.
pub type PausePredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// One step of the execution pipeline. Steps run in sequence; any
/// non-`continue` result short-circuits the remainder of the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    CallModel,
    CheckMaxRuns,
    CheckPause,
    CheckPreToolHitl,
    ExecuteTools,
    PropagateState,
    CheckPostToolInterrupt,
    CheckUntilTool,
    ContinueOrDone,
}

/// The step sequence for a pipeline mode.
///
/// Raw mode drops the middleware-dependent steps; HITL and state
/// propagation are not guaranteed there.
pub fn steps_for(mode: PipelineMode) -> &'static [PipelineStep] {
    match mode {
        PipelineMode::Default => &[
            PipelineStep::CallModel,
            PipelineStep::CheckMaxRuns,
            PipelineStep::CheckPause,
            PipelineStep::CheckPreToolHitl,
            PipelineStep::ExecuteTools,
            PipelineStep::PropagateState,
            PipelineStep::CheckPostToolInterrupt,
            PipelineStep::CheckUntilTool,
            PipelineStep::ContinueOrDone,
        ],
        PipelineMode::Raw => &[
            PipelineStep::CallModel,
            PipelineStep::CheckMaxRuns,
            PipelineStep::CheckPause,
            PipelineStep::ExecuteTools,
            PipelineStep::CheckUntilTool,
            PipelineStep::ContinueOrDone,
        ],
    }
}

/// Mutable run state threaded through the steps.
#[derive(Debug)]
pub struct Chain {
    pub state: State,
    /// Logical LLM calls made this run (fallback retries count once).
    pub llm_calls: u32,
    pub stats: PipelineStats,
    /// Set when `until_tool` matched.
    pub until_tool_result: Option<ToolResult>,
    /// Tool calls already announced (`tool_call_identified`) this turn.
    pub announced_calls: HashSet<String>,
}

impl Chain {
    pub fn new(state: State) -> Self {
        Self {
            state,
            llm_calls: 0,
            stats: PipelineStats::default(),
            until_tool_result: None,
            announced_calls: HashSet::new(),
        }
    }

    /// The most recent message, if any.
    pub fn last_message(&self) -> Option<&Message> {
        self.state.messages.last()
    }

    /// The assistant message driving the current turn: the last message if
    /// it is an assistant message, or the one directly before a trailing
    /// tool-results message.
    pub fn turn_assistant_message(&self) -> Option<&Message> {
        let messages = &self.state.messages;
        match messages.last() {
            Some(m) if m.role == Role::Assistant => Some(m),
            Some(m) if m.role == Role::Tool && messages.len() >= 2 => {
                let prev = &messages[messages.len() - 2];
                (prev.role == Role::Assistant).then_some(prev)
            }
            _ => None,
        }
    }

    /// Whether the conversation still needs a model response (the last
    /// message is a tool-results message).
    pub fn needs_response(&self) -> bool {
        self.last_message().is_some_and(|m| m.role == Role::Tool)
    }

    /// Index of the first message after the last assistant message carrying
    /// tool calls. Messages from there on form the newest tool run.
    pub fn newest_tool_run_start(&self) -> usize {
        self.state
            .messages
            .iter()
            .rposition(|m| m.role == Role::Assistant && m.has_tool_calls())
            .map(|i| i + 1)
            .unwrap_or(self.state.messages.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagents_contract::message::{Message, ToolCall};
    use serde_json::json;

    #[test]
    fn default_steps_cover_the_full_sequence() {
        let steps = steps_for(PipelineMode::Default);
        assert_eq!(steps.first(), Some(&PipelineStep::CallModel));
        assert_eq!(steps.last(), Some(&PipelineStep::ContinueOrDone));
        assert!(steps.contains(&PipelineStep::CheckPreToolHitl));
    }

    #[test]
    fn raw_steps_skip_middleware_dependent_checks() {
        let steps = steps_for(PipelineMode::Raw);
        assert!(!steps.contains(&PipelineStep::CheckPreToolHitl));
        assert!(!steps.contains(&PipelineStep::PropagateState));
        assert!(!steps.contains(&PipelineStep::CheckPostToolInterrupt));
    }

    #[test]
    fn needs_response_tracks_trailing_tool_message() {
        let state = State::new("a-1")
            .with_message(Message::user("hi"))
            .with_message(Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c1", "search", json!({}))],
            ));
        let mut chain = Chain::new(state);
        assert!(!chain.needs_response());

        chain.state.messages.push(Message::tool_results(vec![]));
        assert!(chain.needs_response());
        assert_eq!(chain.turn_assistant_message().unwrap().calls()[0].call_id, "c1");
    }

    #[test]
    fn newest_tool_run_starts_after_last_calling_assistant() {
        let state = State::new("a-1")
            .with_message(Message::user("hi"))
            .with_message(Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("c1", "search", json!({}))],
            ))
            .with_message(Message::tool_results(vec![]))
            .with_message(Message::tool_results(vec![]));
        let chain = Chain::new(state);
        assert_eq!(chain.newest_tool_run_start(), 2);
    }
}
