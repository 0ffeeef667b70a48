//! The execution pipeline: a composable step sequence driving LLM turns.
//!
//! One run loops `call model → checks → execute tools → propagate deltas →
//! interrupt checks → until-tool → continue-or-done` until a terminal
//! condition: a final assistant message, an `until_tool` match, a pause, an
//! interrupt, cancellation, or an error. Steps short-circuit through tagged
//! results; interrupts are data, never exceptions.

use std::collections::HashMap;
use std::sync::Arc;

use sagents_contract::agent::{AgentConfig, PipelineMode};
use sagents_contract::context::AgentContext;
use sagents_contract::event::{AgentEvent, DebugEvent, EventSink};
use sagents_contract::interrupt::{
    ActionRequest, HitlInterrupt, Interrupt, InterruptRecord,
};
use sagents_contract::message::{Message, ProcessedContent, Role, ToolCall};
use sagents_contract::middleware::{AfterModel, ModelCallbacks};
use sagents_contract::model::ChatRequest;
use sagents_contract::state::State;
use sagents_contract::tool::{tool_map, Tool};

use crate::cancel::{CancelAware, RunCancellationToken};
use crate::chain::{steps_for, Chain, PausePredicate, PipelineStep};
use crate::llm::{stream_turn, StreamOutcome};
use crate::outcome::{PipelineError, PipelineRun, RunOutcome};
use crate::tool_exec::{ToolConcurrency, ToolRunner};

/// Per-run pipeline options.
#[derive(Clone, Default)]
pub struct PipelineOptions {
    /// Loop bound on LLM calls per top-level run. `None` uses the default.
    pub max_runs: Option<u32>,
    /// Terminate successfully once the assistant calls one of these tools.
    pub until_tool: Option<Vec<String>>,
    /// Zero-arg predicate checked between steps; `true` pauses the run.
    pub should_pause: Option<PausePredicate>,
    pub concurrency: ToolConcurrency,
}

impl PipelineOptions {
    /// Default loop bound on LLM calls.
    pub const DEFAULT_MAX_RUNS: u32 = 50;

    #[must_use]
    pub fn with_max_runs(mut self, max_runs: u32) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    #[must_use]
    pub fn with_until_tool<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.until_tool = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_should_pause(mut self, predicate: PausePredicate) -> Self {
        self.should_pause = Some(predicate);
        self
    }

    fn max_runs(&self) -> u32 {
        self.max_runs.unwrap_or(Self::DEFAULT_MAX_RUNS)
    }
}

/// Step result steering the driver.
pub(crate) enum Flow {
    /// Proceed to the next step.
    Next,
    /// Restart the step sequence (another LLM turn).
    Loop,
    /// Terminal: run complete.
    Done,
    /// Terminal: pause predicate fired.
    Pause,
    /// Terminal: `State.interrupt_data` was populated.
    Interrupt,
}

/// One agent's execution pipeline, bound to a config, tool set, event sink,
/// and forked ambient context.
pub struct Pipeline {
    pub(crate) config: Arc<AgentConfig>,
    pub(crate) tools: HashMap<String, Arc<dyn Tool>>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) context: AgentContext,
    pub(crate) callbacks: Vec<ModelCallbacks>,
    pub(crate) options: PipelineOptions,
    pub(crate) token: RunCancellationToken,
}

impl Pipeline {
    pub fn new(
        config: Arc<AgentConfig>,
        events: Arc<dyn EventSink>,
        context: AgentContext,
        options: PipelineOptions,
    ) -> Self {
        let tools = tool_map(config.tools.iter().cloned());
        let callbacks = if config.mode == PipelineMode::Default {
            config
                .middleware
                .iter()
                .filter_map(|e| e.middleware.callbacks(&e.config))
                .collect()
        } else {
            Vec::new()
        };
        Self {
            config,
            tools,
            events,
            context,
            callbacks,
            options,
            token: RunCancellationToken::new(),
        }
    }

    /// Attach a cooperative cancellation token observed at every suspension
    /// point.
    #[must_use]
    pub fn with_cancellation(mut self, token: RunCancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Drive the pipeline from the given state until a terminal condition.
    pub async fn run(&self, state: State) -> PipelineRun {
        let mut chain = Chain::new(state);

        if let Some(ref names) = self.options.until_tool {
            for name in names {
                if !self.tools.contains_key(name) {
                    return PipelineRun {
                        state: chain.state,
                        outcome: RunOutcome::Failed(PipelineError::UnknownUntilTool {
                            name: name.clone(),
                        }),
                        stats: chain.stats,
                    };
                }
            }
        }

        let steps = steps_for(self.config.mode);
        let outcome = self.drive(&mut chain, steps, 0).await;
        PipelineRun {
            state: chain.state,
            outcome,
            stats: chain.stats,
        }
    }

    pub(crate) async fn drive(
        &self,
        chain: &mut Chain,
        steps: &[PipelineStep],
        start: usize,
    ) -> RunOutcome {
        let mut i = start.min(steps.len());
        loop {
            if self.token.is_cancelled() {
                return RunOutcome::Cancelled;
            }
            if i >= steps.len() {
                i = 0;
                continue;
            }
            let flow = match self.run_step(steps[i], chain).await {
                Ok(flow) => flow,
                Err(PipelineError::Cancelled) => return RunOutcome::Cancelled,
                Err(e) => return RunOutcome::Failed(e),
            };
            match flow {
                Flow::Next => i += 1,
                Flow::Loop => i = 0,
                Flow::Done => {
                    return RunOutcome::Completed {
                        until_tool_result: chain.until_tool_result.take(),
                    }
                }
                Flow::Pause => return RunOutcome::Paused,
                Flow::Interrupt => return RunOutcome::Interrupted,
            }
        }
    }

    async fn run_step(&self, step: PipelineStep, chain: &mut Chain) -> Result<Flow, PipelineError> {
        match step {
            PipelineStep::CallModel => self.call_model(chain).await,
            PipelineStep::CheckMaxRuns => self.check_max_runs(chain),
            PipelineStep::CheckPause => Ok(self.check_pause()),
            PipelineStep::CheckPreToolHitl => Ok(self.check_pre_tool_hitl(chain)),
            PipelineStep::ExecuteTools => self.execute_tools(chain).await,
            PipelineStep::PropagateState => Ok(self.propagate_state(chain)),
            PipelineStep::CheckPostToolInterrupt => Ok(self.check_post_tool_interrupt(chain)),
            PipelineStep::CheckUntilTool => Ok(self.check_until_tool(chain)),
            PipelineStep::ContinueOrDone => self.continue_or_done(chain),
        }
    }

    /// Dispatch one LLM request, applying fallback models in order after an
    /// error. Streams deltas and usage as events; appends the assistant
    /// message; runs `before_model` (list order) and `after_model` (reverse)
    /// middleware hooks around the call.
    async fn call_model(&self, chain: &mut Chain) -> Result<Flow, PipelineError> {
        chain.announced_calls.clear();

        if self.config.mode == PipelineMode::Default {
            let mut state = chain.state.clone();
            for entry in &self.config.middleware {
                state = entry
                    .middleware
                    .before_model(state, &entry.config)
                    .await
                    .map_err(|e| PipelineError::Middleware {
                        middleware: entry.id.clone(),
                        reason: e.to_string(),
                    })?;
                self.trace_middleware(&entry.id, "before_model");
            }
            chain.state = state;
        }

        let mut specs: Vec<_> = self.tools.values().map(|t| t.descriptor().to_spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        let request = ChatRequest::new(
            self.config.assembled_system_prompt.clone(),
            chain.state.messages.clone(),
        )
        .with_tools(specs);

        let mut attempt_request = request;
        let mut last_error = None;
        let mut outcome = None;
        let models =
            std::iter::once(&self.config.chat_model).chain(self.config.fallback_models.iter());
        for (idx, model) in models.enumerate() {
            if idx > 0 {
                tracing::warn!(model = model.model_id(), "retrying with fallback model");
                if let Some(ref hook) = self.config.before_fallback {
                    attempt_request = hook(attempt_request);
                }
            }
            match stream_turn(
                model.as_ref(),
                attempt_request.clone(),
                &self.events,
                &self.callbacks,
                &mut chain.announced_calls,
                &self.token,
            )
            .await
            {
                Ok(CancelAware::Cancelled) => return Err(PipelineError::Cancelled),
                Ok(CancelAware::Value(v)) => {
                    outcome = Some(v);
                    break;
                }
                Err(e) => {
                    tracing::warn!(model = model.model_id(), error = %e, "chat model attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let Some(StreamOutcome { message, .. }) = outcome else {
            return Err(PipelineError::Llm(
                last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no chat model configured".to_string()),
            ));
        };

        chain.llm_calls += 1;
        chain.stats.llm_calls += 1;
        chain.state.messages.push(message.clone());
        self.events.publish(AgentEvent::LlmMessage { message });

        if self.config.mode == PipelineMode::Default {
            let mut state = chain.state.clone();
            for entry in self.config.middleware.iter().rev() {
                match entry
                    .middleware
                    .after_model(state, &entry.config)
                    .await
                    .map_err(|e| PipelineError::Middleware {
                        middleware: entry.id.clone(),
                        reason: e.to_string(),
                    })? {
                    AfterModel::Continue(s) => {
                        self.trace_middleware(&entry.id, "after_model");
                        state = s;
                    }
                    AfterModel::Interrupt {
                        state: mut s,
                        interrupt,
                    } => {
                        self.trace_middleware(&entry.id, "after_model_interrupt");
                        s.interrupt_data = Some(InterruptRecord::new(interrupt));
                        chain.state = s;
                        chain.stats.interrupts += 1;
                        return Ok(Flow::Interrupt);
                    }
                }
            }
            chain.state = state;
        }

        Ok(Flow::Next)
    }

    fn check_max_runs(&self, chain: &Chain) -> Result<Flow, PipelineError> {
        let max_runs = self.options.max_runs();
        if chain.llm_calls > max_runs {
            return Err(PipelineError::ExceededMaxRuns { max_runs });
        }
        Ok(Flow::Next)
    }

    fn check_pause(&self) -> Flow {
        match self.options.should_pause {
            Some(ref predicate) if predicate() => Flow::Pause,
            _ => Flow::Next,
        }
    }

    /// Hold matching tool calls for operator approval before any execute.
    fn check_pre_tool_hitl(&self, chain: &mut Chain) -> Flow {
        let requests: Vec<ActionRequest> = {
            let Some(assistant) = chain
                .last_message()
                .filter(|m| m.role == Role::Assistant && m.has_tool_calls())
            else {
                return Flow::Next;
            };
            let Some(policy) = self
                .config
                .middleware
                .iter()
                .find_map(|e| e.middleware.hitl_policy(&e.config))
            else {
                return Flow::Next;
            };
            assistant
                .calls()
                .iter()
                .filter_map(|call| {
                    policy
                        .allowed_decisions(&call.name)
                        .map(|allowed| ActionRequest {
                            tool_call_id: call.call_id.clone(),
                            tool_name: call.name.clone(),
                            arguments: call.arguments.clone(),
                            allowed_decisions: allowed.to_vec(),
                        })
                })
                .collect()
        };
        if requests.is_empty() {
            return Flow::Next;
        }
        chain.state.interrupt_data = Some(InterruptRecord::new(Interrupt::Hitl(
            HitlInterrupt::new(requests),
        )));
        chain.stats.interrupts += 1;
        Flow::Interrupt
    }

    async fn execute_tools(&self, chain: &mut Chain) -> Result<Flow, PipelineError> {
        let calls: Vec<ToolCall> = match chain.last_message() {
            Some(m) if m.role == Role::Assistant => m.calls().to_vec(),
            _ => return Ok(Flow::Next),
        };
        if calls.is_empty() {
            return Ok(Flow::Next);
        }

        let results = self
            .tool_runner()
            .run(&calls, &chain.announced_calls)
            .await
            .map_err(|_| PipelineError::Cancelled)?;
        chain.stats.tool_calls += calls.len() as u32;
        chain.stats.tool_errors += results.iter().filter(|r| r.is_error).count() as u32;
        chain.state.messages.push(Message::tool_results(results));
        Ok(Flow::Next)
    }

    /// Merge tool-produced state deltas from the newest tool run, in
    /// chronological order with later writes winning. Consumed deltas are
    /// removed from the carrying results so a resume re-entry cannot merge
    /// them twice.
    fn propagate_state(&self, chain: &mut Chain) -> Flow {
        let start = chain.newest_tool_run_start();
        let mut deltas = Vec::new();
        for msg in &mut chain.state.messages[start..] {
            if msg.role != Role::Tool {
                continue;
            }
            let Some(results) = msg.tool_results.as_mut() else {
                continue;
            };
            for result in results {
                if matches!(
                    result.processed_content,
                    Some(ProcessedContent::StateDelta { .. })
                ) {
                    if let Some(ProcessedContent::StateDelta { delta }) =
                        result.processed_content.take()
                    {
                        deltas.push(delta);
                    }
                }
            }
        }
        if deltas.is_empty() {
            return Flow::Next;
        }
        let touched_todos = deltas.iter().any(|d| d.todos.is_some());
        for delta in deltas {
            chain.state.merge_delta(delta);
        }
        if touched_todos {
            self.events.publish(AgentEvent::TodosUpdated {
                todos: chain.state.todos.clone(),
            });
        }
        Flow::Next
    }

    /// Surface sub-agent interrupt signals from the last tool message. The
    /// signals are moved out of the carrying results into the interrupt
    /// record: one current, the rest queued FIFO.
    fn check_post_tool_interrupt(&self, chain: &mut Chain) -> Flow {
        let mut signals = Vec::new();
        if let Some(msg) = chain.state.messages.last_mut().filter(|m| m.role == Role::Tool) {
            if let Some(results) = msg.tool_results.as_mut() {
                for result in results {
                    if matches!(
                        result.processed_content,
                        Some(ProcessedContent::Interrupt { .. })
                    ) {
                        if let Some(ProcessedContent::Interrupt { mut signal }) =
                            result.processed_content.take()
                        {
                            signal.tool_call_id = Some(result.call_id.clone());
                            signals.push(signal);
                        }
                    }
                }
            }
        }
        let mut signals = signals.into_iter();
        let Some(first) = signals.next() else {
            return Flow::Next;
        };
        let mut record = InterruptRecord::new(Interrupt::SubAgent(first));
        for signal in signals {
            record.enqueue(Interrupt::SubAgent(signal));
        }
        chain.state.interrupt_data = Some(record);
        chain.stats.interrupts += 1;
        Flow::Interrupt
    }

    fn check_until_tool(&self, chain: &mut Chain) -> Flow {
        let Some(ref names) = self.options.until_tool else {
            return Flow::Next;
        };
        let matched_call_id = chain.turn_assistant_message().and_then(|assistant| {
            assistant
                .calls()
                .iter()
                .find(|c| names.contains(&c.name))
                .map(|c| c.call_id.clone())
        });
        let Some(call_id) = matched_call_id else {
            return Flow::Next;
        };
        let result = chain
            .last_message()
            .filter(|m| m.role == Role::Tool)
            .and_then(|m| m.results().iter().find(|r| r.call_id == call_id))
            .cloned();
        chain.until_tool_result = result;
        Flow::Done
    }

    fn continue_or_done(&self, chain: &mut Chain) -> Result<Flow, PipelineError> {
        if chain.needs_response() {
            return Ok(Flow::Loop);
        }
        if let Some(ref names) = self.options.until_tool {
            if chain.until_tool_result.is_none() {
                return Err(PipelineError::UntilToolNotCalled {
                    names: names.clone(),
                });
            }
        }
        Ok(Flow::Done)
    }

    fn trace_middleware(&self, middleware_id: &str, action: &str) {
        self.events.publish_debug(DebugEvent::MiddlewareAction {
            middleware_id: middleware_id.to_string(),
            action: action.to_string(),
            detail: serde_json::Value::Null,
        });
    }

    pub(crate) fn tool_runner(&self) -> ToolRunner<'_> {
        ToolRunner {
            agent_id: &self.config.agent_id,
            tools: &self.tools,
            events: self.events.clone(),
            context: &self.context,
            token: &self.token,
            concurrency: self.options.concurrency,
        }
    }
}
