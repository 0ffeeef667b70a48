//! Terminal outcomes and errors for pipeline runs.

use sagents_contract::interrupt::DecisionKind;
use sagents_contract::message::ToolResult;
use sagents_contract::state::State;
use thiserror::Error;

/// Errors terminating a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transport/provider error after all fallbacks were exhausted.
    #[error("LLM call failed: {0}")]
    Llm(String),

    /// A middleware hook returned an error, short-circuiting the run.
    #[error("middleware '{middleware}' failed: {reason}")]
    Middleware { middleware: String, reason: String },

    /// The loop bound on LLM calls per top-level run was exceeded.
    #[error("exceeded max runs ({max_runs})")]
    ExceededMaxRuns { max_runs: u32 },

    /// The run finished without the target tool being called.
    #[error("until_tool not called: expected one of [{}]", .names.join(", "))]
    UntilToolNotCalled { names: Vec<String> },

    /// An `until_tool` name does not exist in the assembled tool set.
    /// Raised before any LLM call.
    #[error("unknown until_tool name: {name}")]
    UnknownUntilTool { name: String },

    #[error("run cancelled")]
    Cancelled,

    /// `resume` was called without a pending interrupt record.
    #[error("state carries no interrupt to resume")]
    NotInterrupted,

    #[error("decision count mismatch: {expected} action requests, {got} decisions")]
    DecisionMismatch { expected: usize, got: usize },

    #[error("decision '{decision:?}' not allowed for tool '{tool}'")]
    DecisionNotAllowed {
        tool: String,
        decision: DecisionKind,
    },

    #[error("state error: {0}")]
    State(String),
}

/// Aggregated metrics for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub llm_calls: u32,
    pub tool_calls: u32,
    pub tool_errors: u32,
    pub interrupts: u32,
}

/// How a run terminated.
#[derive(Debug)]
pub enum RunOutcome {
    /// The assistant produced a final message, or `until_tool` matched
    /// (carrying the matching tool result).
    Completed {
        until_tool_result: Option<ToolResult>,
    },
    /// The run paused; `State.interrupt_data` holds the record.
    Interrupted,
    /// The caller's pause predicate fired.
    Paused,
    Cancelled,
    Failed(PipelineError),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunOutcome::Interrupted)
    }
}

/// A finished run: the evolved state plus how it ended.
///
/// The pipeline task hands this back to the worker; the worker is the only
/// writer of the authoritative `State`.
#[derive(Debug)]
pub struct PipelineRun {
    pub state: State,
    pub outcome: RunOutcome,
    pub stats: PipelineStats,
}
