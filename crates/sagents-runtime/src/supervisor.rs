//! Per-agent supervision.
//!
//! Each started agent gets a supervisor task owning two children: the
//! `AgentWorker` and the sub-agent supervisor (the set of child workers the
//! `task` tool attached). Restart strategy is rest-for-one: a worker crash
//! also tears down the sub-agent set before the worker restarts; sub-agent
//! failures never restart the worker. The per-agent tree is temporary —
//! when restarts are exhausted the supervisor gives up and the owner
//! application decides whether to start the agent again.

use std::sync::Arc;
use std::time::Duration;

use sagents_contract::agent::AgentConfig;
use sagents_contract::event::{AgentEvent, ShutdownReason};
use tokio::sync::{mpsc, oneshot};

use crate::event_bus::EventBus;
use crate::registry::{AgentKey, Registry, RegistryError, WorkerRef};
use crate::worker::{spawn_worker, WorkerArgs, WorkerOptions};

/// Restarts tolerated before the supervisor gives up.
const MAX_RESTARTS: u32 = 3;

pub(crate) enum SupervisorMsg {
    Stop {
        reason: ShutdownReason,
        ack: oneshot::Sender<()>,
    },
    AttachChild(String),
    DetachChild(String),
}

/// Control handle for one agent's supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    agent_id: String,
    control: mpsc::UnboundedSender<SupervisorMsg>,
}

impl std::fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("agent_id", &self.agent_id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl SupervisorHandle {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn is_alive(&self) -> bool {
        !self.control.is_closed()
    }

    pub fn same_channel(&self, other: &SupervisorHandle) -> bool {
        self.control.same_channel(&other.control)
    }

    /// Track a sub-agent worker so it stops with this agent.
    pub fn attach_child(&self, child_id: impl Into<String>) {
        let _ = self.control.send(SupervisorMsg::AttachChild(child_id.into()));
    }

    /// Stop tracking a sub-agent worker.
    pub fn detach_child(&self, child_id: &str) {
        let _ = self
            .control
            .send(SupervisorMsg::DetachChild(child_id.to_string()));
    }

    /// Stop the whole per-agent tree, waiting up to `timeout` for a clean
    /// exit.
    pub async fn stop(&self, reason: ShutdownReason, timeout: Duration) {
        let (ack, done) = oneshot::channel();
        if self.control.send(SupervisorMsg::Stop { reason, ack }).is_err() {
            return;
        }
        if tokio::time::timeout(timeout, done).await.is_err() {
            tracing::warn!(agent_id = %self.agent_id, "supervisor stop timed out");
        }
    }
}

pub(crate) struct SupervisorArgs {
    pub config: AgentConfig,
    pub options: WorkerOptions,
    pub registry: Arc<dyn Registry>,
    pub bus: EventBus,
}

/// Start the per-agent supervisor and register its keys. The worker itself
/// registers asynchronously; placement polls for it.
pub(crate) fn spawn_supervisor(args: SupervisorArgs) -> Result<SupervisorHandle, RegistryError> {
    let agent_id = args.config.agent_id.clone();
    let (control, rx) = mpsc::unbounded_channel();
    let handle = SupervisorHandle {
        agent_id: agent_id.clone(),
        control,
    };

    args.registry.register(
        AgentKey::AgentSupervisor(agent_id.clone()),
        WorkerRef::Supervisor(handle.clone()),
    )?;
    if let Err(e) = args.registry.register(
        AgentKey::SubAgentSupervisor(agent_id.clone()),
        WorkerRef::Supervisor(handle.clone()),
    ) {
        args.registry
            .unregister(&AgentKey::AgentSupervisor(agent_id));
        return Err(e);
    }

    tokio::spawn(supervise(args, rx));
    Ok(handle)
}

async fn supervise(args: SupervisorArgs, mut rx: mpsc::UnboundedReceiver<SupervisorMsg>) {
    let SupervisorArgs {
        config,
        options,
        registry,
        bus,
    } = args;
    let agent_id = config.agent_id.clone();
    let mut children: Vec<String> = Vec::new();
    let mut restarts = 0u32;

    'supervision: loop {
        let worker_args = WorkerArgs {
            config: config.clone(),
            options: options.clone(),
            registry: registry.clone(),
            bus: bus.clone(),
        };
        let (worker, mut join) = match spawn_worker(worker_args) {
            Ok(started) => started,
            Err(e) => {
                tracing::error!(agent_id = %agent_id, error = %e, "worker registration failed; giving up");
                break 'supervision;
            }
        };

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(SupervisorMsg::Stop { reason, ack }) => {
                        stop_children(&registry, &mut children).await;
                        let _ = worker.shutdown(reason);
                        let _ = (&mut join).await;
                        let _ = ack.send(());
                        break 'supervision;
                    }
                    Some(SupervisorMsg::AttachChild(child)) => {
                        if !children.contains(&child) {
                            children.push(child);
                        }
                    }
                    Some(SupervisorMsg::DetachChild(child)) => {
                        children.retain(|c| c != &child);
                    }
                    None => {
                        stop_children(&registry, &mut children).await;
                        let _ = worker.shutdown(ShutdownReason::Manual);
                        let _ = (&mut join).await;
                        break 'supervision;
                    }
                },
                exited = &mut join => {
                    match exited {
                        Ok(()) => {
                            // Normal worker shutdown (manual, inactivity,
                            // no_viewers); the tree goes with it.
                            stop_children(&registry, &mut children).await;
                            break 'supervision;
                        }
                        Err(e) => {
                            restarts += 1;
                            tracing::error!(
                                agent_id = %agent_id,
                                error = %e,
                                restarts,
                                "agent worker crashed"
                            );
                            // Rest-for-one: the sub-agent set restarts with
                            // the worker.
                            stop_children(&registry, &mut children).await;
                            if restarts > MAX_RESTARTS {
                                bus.publish_agent(
                                    &agent_id,
                                    AgentEvent::AgentShutdown {
                                        reason: ShutdownReason::Crash,
                                    },
                                );
                                registry.unregister(&AgentKey::AgentWorker(agent_id.clone()));
                                break 'supervision;
                            }
                            continue 'supervision;
                        }
                    }
                }
            }
        }
    }

    registry.unregister(&AgentKey::AgentSupervisor(agent_id.clone()));
    registry.unregister(&AgentKey::SubAgentSupervisor(agent_id));
}

async fn stop_children(registry: &Arc<dyn Registry>, children: &mut Vec<String>) {
    for child in children.drain(..) {
        if let Ok(worker) = registry.via(&AgentKey::AgentWorker(child.clone())) {
            if let Some(handle) = worker.as_agent() {
                let _ = handle.shutdown(ShutdownReason::Manual);
            }
        }
    }
}
