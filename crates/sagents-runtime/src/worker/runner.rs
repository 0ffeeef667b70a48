//! The worker loop: serial command processing, status machine, lifecycle
//! timers, and pipeline task management.

use std::future::pending;
use std::sync::Arc;

use sagents_contract::agent::AgentConfig;
use sagents_contract::context::AgentContext;
use sagents_contract::event::{
    AgentEvent, DebugEvent, EventSink, ShutdownReason, ToolExecutionPhase,
};
use sagents_contract::interrupt::Decision;
use sagents_contract::message::Message;
use sagents_contract::middleware::fork_with_middleware;
use sagents_contract::persistence::{DisplayMessagePersistence, PersistContext, PersistenceError};
use sagents_contract::state::State;
use sagents_contract::status::Status;
use sagents_pipeline::{
    Pipeline, PipelineOptions, PipelineRun, RunCancellationToken, RunOutcome,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::event_bus::EventBus;
use crate::registry::{AgentKey, Registry, RegistryError, WorkerRef};
use crate::worker::{AgentCommand, AgentHandle, AgentInfo, WorkerError, WorkerOptions};

pub(crate) struct WorkerArgs {
    pub config: AgentConfig,
    pub options: WorkerOptions,
    pub registry: Arc<dyn Registry>,
    pub bus: EventBus,
}

/// Register the worker key and start the mailbox loop. Registration happens
/// before the loop so placement's readiness poll observes a consuming
/// worker.
pub(crate) fn spawn_worker(
    args: WorkerArgs,
) -> Result<(AgentHandle, tokio::task::JoinHandle<()>), RegistryError> {
    let agent_id = args.config.agent_id.clone();
    let (handle, receiver) = AgentHandle::channel(&agent_id, args.bus.clone());
    args.registry.register(
        AgentKey::AgentWorker(agent_id),
        WorkerRef::Agent(handle.clone()),
    )?;

    let worker_handle = handle.clone();
    let join = tokio::spawn(async move {
        let worker = AgentWorker::start(args, worker_handle).await;
        worker.run(receiver).await;
    });
    Ok((handle, join))
}

enum RunKind {
    Run,
    Resume(Vec<Decision>),
}

enum Wake {
    Command(Option<AgentCommand>),
    InactivityExpired,
    GraceExpired,
    Presence(Option<usize>),
}

enum Handled {
    Continue { activity: bool },
    Shutdown,
}

/// Event sink handed to the pipeline task: fans out to the bus and records
/// tool status changes in display persistence (fire-and-forget).
struct WorkerEmitter {
    agent_id: String,
    bus: EventBus,
    display: Option<Arc<dyn DisplayMessagePersistence>>,
}

impl EventSink for WorkerEmitter {
    fn publish(&self, event: AgentEvent) {
        if let AgentEvent::ToolExecutionUpdate { phase, ref tool } = event {
            if matches!(
                phase,
                ToolExecutionPhase::Completed | ToolExecutionPhase::Failed
            ) {
                if let Some(ref display) = self.display {
                    let display = display.clone();
                    let tool = tool.clone();
                    tokio::spawn(async move {
                        if let Err(e) = display.update_tool_status(phase, &tool).await {
                            tracing::warn!(error = %e, call_id = %tool.call_id, "tool status persistence failed");
                        }
                    });
                }
            }
        }
        self.bus.publish_agent(&self.agent_id, event);
    }

    fn publish_debug(&self, event: DebugEvent) {
        self.bus.publish_agent_debug(&self.agent_id, event);
    }
}

struct AgentWorker {
    config: Arc<AgentConfig>,
    state: State,
    status: Status,
    context: AgentContext,
    bus: EventBus,
    registry: Arc<dyn Registry>,
    options: WorkerOptions,
    handle: AgentHandle,
    pipeline_token: Option<RunCancellationToken>,
    /// Messages that arrived while a pipeline task owned a state snapshot.
    /// Applied after the task returns so its result cannot clobber them.
    queued_messages: Vec<Message>,
    /// Middleware messages deferred for the same reason.
    queued_middleware: Vec<(String, serde_json::Value)>,
    started_at: Instant,
    /// Messages up to this index already went through display persistence.
    display_saved: usize,
}

impl AgentWorker {
    async fn start(args: WorkerArgs, handle: AgentHandle) -> Self {
        let WorkerArgs {
            config,
            options,
            registry,
            bus,
        } = args;
        let agent_id = config.agent_id.clone();

        let mut restored = false;
        let mut state = match options.initial_state.clone() {
            Some(state) => state,
            None => match options.persistence.as_ref() {
                Some(persistence) => match persistence.load(&agent_id).await {
                    Ok(serialized) => match State::from_serialized(serialized) {
                        Ok(state) => {
                            restored = true;
                            state
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, agent_id = %agent_id, "persisted state unreadable; starting fresh");
                            State::new(&agent_id)
                        }
                    },
                    Err(PersistenceError::NotFound(_)) => State::new(&agent_id),
                    Err(e) => {
                        tracing::warn!(error = %e, agent_id = %agent_id, "state load failed; starting fresh");
                        State::new(&agent_id)
                    }
                },
                None => State::new(&agent_id),
            },
        };

        for entry in &config.middleware {
            match entry
                .middleware
                .on_server_start(state.clone(), &entry.config)
                .await
            {
                Ok(next) => state = next,
                Err(e) => {
                    tracing::warn!(middleware = %entry.id, error = %e, "on_server_start failed; ignoring");
                }
            }
        }

        if restored {
            bus.publish_agent(
                &agent_id,
                AgentEvent::StateRestored {
                    state: state.clone(),
                },
            );
        }
        bus.publish_agent_debug(
            &agent_id,
            DebugEvent::StateSnapshot {
                state: state.clone(),
            },
        );

        let display_saved = state.messages.len();
        Self {
            config: Arc::new(config),
            state,
            status: Status::Idle,
            context: options.context.clone().unwrap_or_default(),
            bus,
            registry,
            options,
            handle,
            pipeline_token: None,
            queued_messages: Vec::new(),
            queued_middleware: Vec::new(),
            started_at: Instant::now(),
            display_saved,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<AgentCommand>) {
        let mut presence_rx: Option<watch::Receiver<usize>> =
            self.options.presence.as_ref().map(|p| p.viewers.clone());
        let grace_period = self
            .options
            .presence
            .as_ref()
            .map(|p| p.grace_period)
            .unwrap_or_default();
        let mut viewers = presence_rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(1);
        let mut inactivity_deadline = self.next_inactivity_deadline();
        let mut grace_deadline: Option<Instant> = None;

        loop {
            let wake = tokio::select! {
                cmd = rx.recv() => Wake::Command(cmd),
                _ = sleep_until_opt(inactivity_deadline) => Wake::InactivityExpired,
                _ = sleep_until_opt(grace_deadline) => Wake::GraceExpired,
                update = presence_changed(&mut presence_rx) => Wake::Presence(update),
            };

            match wake {
                Wake::Command(None) => {
                    self.terminate(ShutdownReason::Manual).await;
                    break;
                }
                Wake::Command(Some(command)) => match self.handle_command(command).await {
                    Handled::Continue { activity } => {
                        if activity {
                            inactivity_deadline = self.next_inactivity_deadline();
                        }
                    }
                    Handled::Shutdown => break,
                },
                Wake::InactivityExpired => {
                    if self.status == Status::Idle {
                        self.terminate(ShutdownReason::Inactivity).await;
                        break;
                    }
                    inactivity_deadline = self.next_inactivity_deadline();
                }
                Wake::GraceExpired => {
                    grace_deadline = None;
                    if self.status == Status::Idle && viewers == 0 {
                        self.terminate(ShutdownReason::NoViewers).await;
                        break;
                    }
                }
                Wake::Presence(Some(count)) => {
                    viewers = count;
                }
                Wake::Presence(None) => {
                    presence_rx = None;
                }
            }

            // Presence shutdown only ever arms against an idle worker.
            grace_deadline = if presence_rx.is_some() && viewers == 0 && self.status == Status::Idle
            {
                grace_deadline.or_else(|| Some(Instant::now() + grace_period))
            } else {
                None
            };
        }
    }

    async fn handle_command(&mut self, command: AgentCommand) -> Handled {
        match command {
            AgentCommand::AddMessage(message) => {
                if self.pipeline_token.is_some() {
                    self.queued_messages.push(message);
                } else {
                    self.state.messages.push(message);
                    if self.status.can_execute() {
                        self.start_pipeline(RunKind::Run);
                    }
                }
                Handled::Continue { activity: true }
            }
            AgentCommand::Execute => {
                if self.status.can_execute() {
                    self.start_pipeline(RunKind::Run);
                }
                Handled::Continue { activity: true }
            }
            AgentCommand::Cancel(ack) => {
                if self.status == Status::Running {
                    if let Some(ref token) = self.pipeline_token {
                        token.cancel();
                    }
                    self.set_status(Status::Cancelled, None);
                    let _ = ack.send(Ok(()));
                } else {
                    let _ = ack.send(Err(WorkerError::NotRunning));
                }
                Handled::Continue { activity: false }
            }
            AgentCommand::Resume(decisions, ack) => {
                if self.status == Status::Interrupted {
                    let _ = ack.send(Ok(()));
                    self.start_pipeline(RunKind::Resume(decisions));
                } else {
                    let _ = ack.send(Err(WorkerError::NotInterrupted));
                }
                Handled::Continue { activity: true }
            }
            AgentCommand::GetState(tx) => {
                let _ = tx.send(self.state.clone());
                Handled::Continue { activity: true }
            }
            AgentCommand::ExportState(tx) => {
                let _ = tx.send(Ok(self.state.to_serialized()));
                Handled::Continue { activity: true }
            }
            AgentCommand::UpdateAgentAndState(update, ack) => {
                if self.status == Status::Idle {
                    let (config, state) = *update;
                    self.config = Arc::new(config);
                    self.state = state;
                    self.display_saved = self.state.messages.len();
                    self.bus.publish_agent(
                        &self.state.agent_id,
                        AgentEvent::StateRestored {
                            state: self.state.clone(),
                        },
                    );
                    let _ = ack.send(Ok(()));
                } else {
                    let _ = ack.send(Err(WorkerError::NotIdle));
                }
                Handled::Continue { activity: true }
            }
            AgentCommand::SendMiddlewareMessage {
                middleware_id,
                message,
            } => {
                if self.pipeline_token.is_some() {
                    self.queued_middleware.push((middleware_id, message));
                } else {
                    self.dispatch_middleware_message(&middleware_id, message).await;
                }
                Handled::Continue { activity: false }
            }
            AgentCommand::Info(tx) => {
                let _ = tx.send(AgentInfo {
                    id: self.state.agent_id.clone(),
                    status: self.status,
                    message_count: self.state.messages.len(),
                    has_interrupt: self.state.interrupt_data.is_some(),
                    uptime: self.started_at.elapsed(),
                });
                Handled::Continue { activity: true }
            }
            AgentCommand::Shutdown { reason } => {
                self.terminate(reason).await;
                Handled::Shutdown
            }
            AgentCommand::PipelineDone(run) => {
                self.apply_completion(*run).await;
                Handled::Continue { activity: false }
            }
            AgentCommand::PipelineCrashed(message) => {
                tracing::error!(agent_id = %self.state.agent_id, error = %message, "pipeline task died");
                self.pipeline_token = None;
                self.set_status(Status::Error, Some(serde_json::json!(message)));
                self.persist(PersistContext::OnError).await;
                self.flush_queued().await;
                Handled::Continue { activity: false }
            }
        }
    }

    async fn dispatch_middleware_message(&mut self, middleware_id: &str, message: serde_json::Value) {
        let Some(entry) = self
            .config
            .middleware
            .iter()
            .find(|e| e.id == middleware_id)
            .cloned()
        else {
            tracing::warn!(middleware = %middleware_id, "dropping message for unknown middleware");
            return;
        };
        self.bus.publish_agent_debug(
            &self.state.agent_id,
            DebugEvent::MiddlewareAction {
                middleware_id: middleware_id.to_string(),
                action: "handle_message".to_string(),
                detail: message.clone(),
            },
        );
        match entry
            .middleware
            .handle_message(message, self.state.clone(), &entry.config)
            .await
        {
            Ok(state) => self.state = state,
            Err(e) => {
                tracing::warn!(middleware = %middleware_id, error = %e, "handle_message failed; state unchanged");
            }
        }
    }

    /// Spawn the cancellable pipeline task. The task captures a context fork
    /// (with middleware hooks applied), re-initializes it inside the task,
    /// and reports back through `PipelineDone`/`PipelineCrashed`.
    fn start_pipeline(&mut self, kind: RunKind) {
        let token = RunCancellationToken::new();
        self.pipeline_token = Some(token.clone());
        self.set_status(Status::Running, None);

        let snapshot = fork_with_middleware(&self.context, &self.config.middleware);
        let config = self.config.clone();
        let state = self.state.clone();
        let options = PipelineOptions {
            max_runs: self.options.max_runs,
            concurrency: self.options.concurrency,
            ..PipelineOptions::default()
        };
        let sink: Arc<dyn EventSink> = Arc::new(WorkerEmitter {
            agent_id: self.state.agent_id.clone(),
            bus: self.bus.clone(),
            display: self.options.display_persistence.clone(),
        });
        let handle = self.handle.clone();

        tokio::spawn(async move {
            let inner = tokio::spawn(async move {
                let context = AgentContext::init(snapshot);
                let pipeline =
                    Pipeline::new(config, sink, context, options).with_cancellation(token);
                match kind {
                    RunKind::Run => pipeline.run(state).await,
                    RunKind::Resume(decisions) => pipeline.resume(state, decisions).await,
                }
            });
            match inner.await {
                Ok(run) => {
                    let _ = handle.send(AgentCommand::PipelineDone(Box::new(run)));
                }
                Err(e) => {
                    let _ = handle.send(AgentCommand::PipelineCrashed(e.to_string()));
                }
            }
        });
    }

    async fn apply_completion(&mut self, run: PipelineRun) {
        self.pipeline_token = None;
        let PipelineRun { state, outcome, .. } = run;
        self.state = state;
        self.bus.publish_agent_debug(
            &self.state.agent_id,
            DebugEvent::StateSnapshot {
                state: self.state.clone(),
            },
        );

        match outcome {
            RunOutcome::Completed { .. } => {
                self.save_display().await;
                self.persist(PersistContext::OnCompletion).await;
                self.set_status(Status::Idle, None);
            }
            RunOutcome::Interrupted => {
                self.save_display().await;
                self.persist(PersistContext::OnInterrupt).await;
                let detail = self
                    .state
                    .interrupt_data
                    .as_ref()
                    .and_then(|record| serde_json::to_value(record).ok());
                self.set_status(Status::Interrupted, detail);
            }
            RunOutcome::Paused => {
                self.set_status(Status::Idle, Some(serde_json::json!("paused")));
            }
            RunOutcome::Cancelled => {
                if self.status != Status::Cancelled {
                    self.set_status(Status::Cancelled, None);
                }
                self.set_status(Status::Idle, None);
            }
            RunOutcome::Failed(e) => {
                self.save_display().await;
                self.persist(PersistContext::OnError).await;
                self.set_status(Status::Error, Some(serde_json::json!(e.to_string())));
            }
        }

        self.flush_queued().await;
    }

    /// Apply mutations deferred while a pipeline task owned a snapshot. A
    /// queued user message restarts the pipeline, matching the schedule an
    /// immediate `add_message` would have had.
    async fn flush_queued(&mut self) {
        if !self.status.can_execute() {
            return;
        }
        for (middleware_id, message) in std::mem::take(&mut self.queued_middleware) {
            self.dispatch_middleware_message(&middleware_id, message).await;
        }
        if !self.queued_messages.is_empty() {
            self.state
                .messages
                .append(&mut self.queued_messages);
            self.start_pipeline(RunKind::Run);
        }
    }

    fn set_status(&mut self, status: Status, detail: Option<serde_json::Value>) {
        self.status = status;
        self.bus.publish_agent(
            &self.state.agent_id,
            AgentEvent::StatusChanged {
                new_status: status,
                detail,
            },
        );
    }

    async fn persist(&self, context: PersistContext) {
        let Some(ref persistence) = self.options.persistence else {
            return;
        };
        let serialized = self.state.to_serialized();
        if let Err(e) = persistence
            .persist(&self.state.agent_id, &serialized, context)
            .await
        {
            tracing::warn!(
                agent_id = %self.state.agent_id,
                context = context.as_str(),
                error = %e,
                "state persistence failed"
            );
        }
    }

    /// Hand new messages to display persistence and announce the batch.
    async fn save_display(&mut self) {
        let Some(ref display) = self.options.display_persistence else {
            return;
        };
        let mut items = Vec::new();
        for message in &self.state.messages[self.display_saved.min(self.state.messages.len())..] {
            match display.save_message(&self.state.agent_id, message).await {
                Ok(saved) => items.extend(saved),
                Err(e) => {
                    tracing::warn!(error = %e, message_id = %message.id, "display persistence failed");
                }
            }
        }
        self.display_saved = self.state.messages.len();
        if items.len() == 1 {
            let item = items.remove(0);
            self.bus
                .publish_agent(&self.state.agent_id, AgentEvent::DisplayMessageSaved { item });
        } else if !items.is_empty() {
            self.bus.publish_agent(
                &self.state.agent_id,
                AgentEvent::DisplayMessagesBatchSaved { items },
            );
        }
    }

    /// Emit the terminal event, best-effort persist, and drop the key.
    async fn terminate(&mut self, reason: ShutdownReason) {
        if let Some(ref token) = self.pipeline_token {
            token.cancel();
        }
        self.bus
            .publish_agent(&self.state.agent_id, AgentEvent::AgentShutdown { reason });
        if reason != ShutdownReason::Crash {
            self.persist(PersistContext::OnShutdown).await;
        }
        self.registry
            .unregister(&AgentKey::AgentWorker(self.state.agent_id.clone()));
    }

    fn next_inactivity_deadline(&self) -> Option<Instant> {
        self.options
            .inactivity_timeout
            .map(|timeout| Instant::now() + timeout)
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn presence_changed(rx: &mut Option<watch::Receiver<usize>>) -> Option<usize> {
    match rx {
        Some(receiver) => match receiver.changed().await {
            Ok(()) => Some(*receiver.borrow()),
            Err(_) => None,
        },
        None => pending().await,
    }
}
