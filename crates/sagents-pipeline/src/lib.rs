//! Execution pipeline for Sagents agents.
//!
//! Drives one or more LLM turns as a composable step sequence:
//!
//! ```text
//! call_llm → check_max_runs → check_pause → check_pre_tool_hitl
//!         → execute_tools → propagate_state → check_post_tool_interrupt
//!         → maybe_check_until_tool → continue_or_done
//! ```
//!
//! Non-`continue` step results short-circuit the rest of the turn. The
//! pipeline owns no worker state: it consumes a `State` snapshot and returns
//! the evolved state with a terminal outcome; the worker applies it.

mod cancel;
mod chain;
mod llm;
mod outcome;
mod resume;
mod runner;
mod tool_exec;

pub use cancel::{await_or_cancel, CancelAware, RunCancellationToken};
pub use chain::{steps_for, Chain, PausePredicate, PipelineStep};
pub use outcome::{PipelineError, PipelineRun, PipelineStats, RunOutcome};
pub use runner::{Pipeline, PipelineOptions};
pub use tool_exec::ToolConcurrency;
