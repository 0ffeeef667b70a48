//! The per-agent worker: command surface and handle.
//!
//! An `AgentWorker` is a single-consumer serializer over its own command
//! mailbox. Every public entry point enqueues one command; the worker
//! processes them one at a time and is the sole mutator of its `State`.
//! Pipeline runs execute in a cancellable task that hands the evolved state
//! back through an internal completion command.

mod runner;

use std::sync::Arc;
use std::time::Duration;

use sagents_contract::agent::AgentConfig;
use sagents_contract::context::AgentContext;
use sagents_contract::event::{AgentEvent, DebugEvent, EventEnvelope, ShutdownReason};
use sagents_contract::interrupt::Decision;
use sagents_contract::message::Message;
use sagents_contract::persistence::{AgentPersistence, DisplayMessagePersistence};
use sagents_contract::state::{SerializedState, State, StateCodecError};
use sagents_contract::status::Status;
use sagents_pipeline::{PipelineRun, ToolConcurrency};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::event_bus::EventBus;

pub(crate) use runner::{spawn_worker, WorkerArgs};

/// Worker command errors.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("agent worker stopped")]
    Stopped,

    #[error("agent is not running")]
    NotRunning,

    #[error("agent is not interrupted")]
    NotInterrupted,

    #[error("agent is not idle")]
    NotIdle,

    #[error(transparent)]
    Codec(#[from] StateCodecError),
}

/// Presence-based shutdown configuration: the worker watches a viewer count
/// and shuts down after a grace period at zero viewers while idle.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub viewers: watch::Receiver<usize>,
    pub grace_period: Duration,
}

impl PresenceConfig {
    /// Default grace period before a no-viewer shutdown.
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

    pub fn new(viewers: watch::Receiver<usize>) -> Self {
        Self {
            viewers,
            grace_period: Self::DEFAULT_GRACE,
        }
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// Per-worker start options.
#[derive(Clone, Default)]
pub struct WorkerOptions {
    /// Fresh state is created (or a persisted snapshot restored) when absent.
    pub initial_state: Option<State>,
    /// Initial ambient context.
    pub context: Option<AgentContext>,
    /// Idle shutdown timeout. `None` disables inactivity shutdown.
    pub inactivity_timeout: Option<Duration>,
    pub presence: Option<PresenceConfig>,
    pub persistence: Option<Arc<dyn AgentPersistence>>,
    pub display_persistence: Option<Arc<dyn DisplayMessagePersistence>>,
    /// Pipeline loop bound override.
    pub max_runs: Option<u32>,
    pub concurrency: ToolConcurrency,
}

/// Read-only worker summary.
#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub id: String,
    pub status: Status,
    pub message_count: usize,
    pub has_interrupt: bool,
    pub uptime: Duration,
}

/// Commands processed serially by the worker.
pub enum AgentCommand {
    AddMessage(Message),
    Execute,
    Cancel(oneshot::Sender<Result<(), WorkerError>>),
    Resume(Vec<Decision>, oneshot::Sender<Result<(), WorkerError>>),
    GetState(oneshot::Sender<State>),
    ExportState(oneshot::Sender<Result<SerializedState, WorkerError>>),
    UpdateAgentAndState(
        Box<(AgentConfig, State)>,
        oneshot::Sender<Result<(), WorkerError>>,
    ),
    SendMiddlewareMessage {
        middleware_id: String,
        message: Value,
    },
    Info(oneshot::Sender<AgentInfo>),
    Shutdown {
        reason: ShutdownReason,
    },
    /// Internal: the pipeline task finished and returns the evolved state.
    PipelineDone(Box<PipelineRun>),
    /// Internal: the pipeline task died without a result.
    PipelineCrashed(String),
}

impl std::fmt::Debug for AgentCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentCommand::AddMessage(_) => "AddMessage",
            AgentCommand::Execute => "Execute",
            AgentCommand::Cancel(_) => "Cancel",
            AgentCommand::Resume(..) => "Resume",
            AgentCommand::GetState(_) => "GetState",
            AgentCommand::ExportState(_) => "ExportState",
            AgentCommand::UpdateAgentAndState(..) => "UpdateAgentAndState",
            AgentCommand::SendMiddlewareMessage { .. } => "SendMiddlewareMessage",
            AgentCommand::Info(_) => "Info",
            AgentCommand::Shutdown { .. } => "Shutdown",
            AgentCommand::PipelineDone(_) => "PipelineDone",
            AgentCommand::PipelineCrashed(_) => "PipelineCrashed",
        };
        f.write_str(name)
    }
}

/// Cloneable handle to one agent worker. All mutating calls enqueue a
/// command; event helpers publish straight to the bus and never block on
/// the worker.
#[derive(Clone)]
pub struct AgentHandle {
    agent_id: String,
    sender: mpsc::UnboundedSender<AgentCommand>,
    bus: EventBus,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("agent_id", &self.agent_id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl AgentHandle {
    /// Build a handle plus the command receiver the worker consumes.
    pub(crate) fn channel(
        agent_id: impl Into<String>,
        bus: EventBus,
    ) -> (Self, mpsc::UnboundedReceiver<AgentCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                agent_id: agent_id.into(),
                sender,
                bus,
            },
            receiver,
        )
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Whether the worker is still consuming commands.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Whether two handles address the same worker.
    pub fn same_channel(&self, other: &AgentHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    pub(crate) fn send(&self, command: AgentCommand) -> Result<(), WorkerError> {
        self.sender.send(command).map_err(|_| WorkerError::Stopped)
    }

    /// Append a message; the worker schedules a run unless one is active.
    pub fn add_message(&self, message: Message) -> Result<(), WorkerError> {
        self.send(AgentCommand::AddMessage(message))
    }

    /// Schedule a pipeline run if the worker is not already busy.
    pub fn execute(&self) -> Result<(), WorkerError> {
        self.send(AgentCommand::Execute)
    }

    /// Cancel the running pipeline. Only valid while `Running`.
    pub async fn cancel(&self) -> Result<(), WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.send(AgentCommand::Cancel(tx))?;
        rx.await.map_err(|_| WorkerError::Stopped)?
    }

    /// Apply operator decisions to the pending interrupt. Only valid while
    /// `Interrupted`.
    pub async fn resume(&self, decisions: Vec<Decision>) -> Result<(), WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.send(AgentCommand::Resume(decisions, tx))?;
        rx.await.map_err(|_| WorkerError::Stopped)?
    }

    /// Read-only state snapshot.
    pub async fn get_state(&self) -> Result<State, WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.send(AgentCommand::GetState(tx))?;
        rx.await.map_err(|_| WorkerError::Stopped)
    }

    /// Versioned serialized snapshot.
    pub async fn export_state(&self) -> Result<SerializedState, WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.send(AgentCommand::ExportState(tx))?;
        rx.await.map_err(|_| WorkerError::Stopped)?
    }

    /// Replace config and state atomically. Only valid while `Idle`.
    pub async fn update_agent_and_state(
        &self,
        config: AgentConfig,
        state: State,
    ) -> Result<(), WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.send(AgentCommand::UpdateAgentAndState(
            Box::new((config, state)),
            tx,
        ))?;
        rx.await.map_err(|_| WorkerError::Stopped)?
    }

    /// Route a message to a middleware's `handle_message` hook by entry id.
    pub fn send_middleware_message(
        &self,
        middleware_id: impl Into<String>,
        message: Value,
    ) -> Result<(), WorkerError> {
        self.send(AgentCommand::SendMiddlewareMessage {
            middleware_id: middleware_id.into(),
            message,
        })
    }

    /// Worker summary.
    pub async fn info(&self) -> Result<AgentInfo, WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.send(AgentCommand::Info(tx))?;
        rx.await.map_err(|_| WorkerError::Stopped)
    }

    /// Request shutdown with a reason.
    pub fn shutdown(&self, reason: ShutdownReason) -> Result<(), WorkerError> {
        self.send(AgentCommand::Shutdown { reason })
    }

    /// Subscribe to this agent's main event topic.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe_agent(&self.agent_id)
    }

    /// Subscribe to this agent's debug topic.
    pub fn subscribe_debug(&self) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe_agent_debug(&self.agent_id)
    }

    /// Publish a main-topic event on behalf of this agent. Callable from
    /// tool tasks; never blocks on the worker.
    pub fn publish_event_from(&self, event: AgentEvent) {
        self.bus.publish_agent(&self.agent_id, event);
    }

    /// Publish a debug-topic event on behalf of this agent.
    pub fn publish_debug_event_from(&self, event: DebugEvent) {
        self.bus.publish_agent_debug(&self.agent_id, event);
    }
}
