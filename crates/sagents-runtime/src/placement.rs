//! Placement: starting, locating, and stopping agent workers.
//!
//! `start_agent` creates the per-agent supervisor, then polls the registry
//! with capped exponential backoff until the worker's key resolves (the
//! worker registers itself once its mailbox is live). Starts are idempotent:
//! if a live worker already owns the key — on this node or, in clustered
//! mode, anywhere in the cluster — the existing handle comes back tagged
//! `AlreadyStarted`.

use std::sync::Arc;
use std::time::Duration;

use sagents_contract::agent::AgentConfig;
use sagents_contract::event::ShutdownReason;
use thiserror::Error;
use tokio::time::{sleep, Instant};

use crate::event_bus::EventBus;
use crate::registry::{AgentKey, KeyPattern, Registry, RegistryError};
use crate::supervisor::{spawn_supervisor, SupervisorArgs};
use crate::worker::{spawn_worker, AgentHandle, WorkerArgs, WorkerError, WorkerOptions};

/// Placement tuning.
#[derive(Debug, Clone)]
pub struct PlacementConfig {
    /// Total wait for a started worker to register.
    pub registration_deadline: Duration,
    /// Backoff cap while polling the registry.
    pub backoff_cap: Duration,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            registration_deadline: Duration::from_secs(5),
            backoff_cap: Duration::from_millis(100),
        }
    }
}

/// Placement errors.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("agent worker did not register within {0:?}")]
    Timeout(Duration),

    #[error("agent not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Result of an idempotent start.
#[derive(Debug)]
pub enum StartOutcome {
    Started(AgentHandle),
    /// Another caller (possibly on another node) already owns the key.
    AlreadyStarted(AgentHandle),
}

impl StartOutcome {
    pub fn handle(&self) -> &AgentHandle {
        match self {
            StartOutcome::Started(handle) | StartOutcome::AlreadyStarted(handle) => handle,
        }
    }

    pub fn into_handle(self) -> AgentHandle {
        match self {
            StartOutcome::Started(handle) | StartOutcome::AlreadyStarted(handle) => handle,
        }
    }

    pub fn already_started(&self) -> bool {
        matches!(self, StartOutcome::AlreadyStarted(_))
    }
}

/// Starts and stops per-agent trees against a registry backend.
#[derive(Clone)]
pub struct Placement {
    registry: Arc<dyn Registry>,
    bus: EventBus,
    config: PlacementConfig,
}

impl Placement {
    pub fn new(registry: Arc<dyn Registry>, bus: EventBus, config: PlacementConfig) -> Self {
        Self {
            registry,
            bus,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    /// Start a supervised agent and wait for its worker to register.
    pub async fn start_agent(
        &self,
        config: AgentConfig,
        options: WorkerOptions,
    ) -> Result<StartOutcome, PlacementError> {
        let key = AgentKey::AgentWorker(config.agent_id.clone());
        if let Some(existing) = self.live_agent(&key) {
            return Ok(StartOutcome::AlreadyStarted(existing));
        }

        let supervisor = spawn_supervisor(SupervisorArgs {
            config,
            options,
            registry: self.registry.clone(),
            bus: self.bus.clone(),
        });
        match supervisor {
            Ok(_) => {
                let handle = self.wait_for_registration(&key).await?;
                Ok(StartOutcome::Started(handle))
            }
            Err(RegistryError::AlreadyRegistered(_)) => {
                // Lost a start race; resolve whoever won.
                let handle = self.wait_for_registration(&key).await?;
                Ok(StartOutcome::AlreadyStarted(handle))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start an unsupervised sub-agent worker attached to its parent's
    /// sub-agent supervisor, so it stops with the parent.
    pub async fn start_sub_agent(
        &self,
        parent_id: &str,
        config: AgentConfig,
        options: WorkerOptions,
    ) -> Result<StartOutcome, PlacementError> {
        let key = AgentKey::AgentWorker(config.agent_id.clone());
        if let Some(existing) = self.live_agent(&key) {
            return Ok(StartOutcome::AlreadyStarted(existing));
        }
        let child_id = config.agent_id.clone();
        spawn_worker(WorkerArgs {
            config,
            options,
            registry: self.registry.clone(),
            bus: self.bus.clone(),
        })?;
        let handle = self.wait_for_registration(&key).await?;
        if let Ok(sup) = self
            .registry
            .via(&AgentKey::SubAgentSupervisor(parent_id.to_string()))
        {
            if let Some(supervisor) = sup.as_supervisor() {
                supervisor.attach_child(child_id);
            }
        }
        Ok(StartOutcome::Started(handle))
    }

    /// Stop an agent's tree gracefully.
    pub async fn stop_agent(
        &self,
        agent_id: &str,
        reason: ShutdownReason,
        timeout: Duration,
    ) -> Result<(), PlacementError> {
        let sup_key = AgentKey::AgentSupervisor(agent_id.to_string());
        if let Ok(entry) = self.registry.via(&sup_key) {
            if let Some(supervisor) = entry.as_supervisor() {
                supervisor.stop(reason, timeout).await;
                return Ok(());
            }
        }
        // Unsupervised worker (e.g. a sub-agent started directly).
        let worker_key = AgentKey::AgentWorker(agent_id.to_string());
        if let Ok(entry) = self.registry.via(&worker_key) {
            if let Some(worker) = entry.as_agent() {
                worker.shutdown(reason)?;
                return Ok(());
            }
        }
        Err(PlacementError::NotFound(agent_id.to_string()))
    }

    /// Registered agent ids.
    pub fn list_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .registry
            .select(&KeyPattern::AgentWorkers)
            .into_iter()
            .map(|(key, _)| key.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub fn count_agents(&self) -> usize {
        self.registry.select(&KeyPattern::AgentWorkers).len()
    }

    fn live_agent(&self, key: &AgentKey) -> Option<AgentHandle> {
        self.registry
            .via(key)
            .ok()
            .and_then(|w| w.as_agent().cloned())
    }

    async fn wait_for_registration(&self, key: &AgentKey) -> Result<AgentHandle, PlacementError> {
        let deadline = Instant::now() + self.config.registration_deadline;
        let mut backoff = Duration::from_millis(5);
        loop {
            if let Some(handle) = self.live_agent(key) {
                return Ok(handle);
            }
            if Instant::now() >= deadline {
                return Err(PlacementError::Timeout(self.config.registration_deadline));
            }
            sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.backoff_cap);
        }
    }
}
