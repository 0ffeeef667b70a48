//! The `Sagents` management facade: the agent management and worker command
//! surfaces, bound to one registry backend and event bus.

use std::sync::Arc;
use std::time::Duration;

use sagents_contract::agent::AgentConfig;
use sagents_contract::event::{AgentEvent, DebugEvent, EventEnvelope, ShutdownReason};
use sagents_contract::interrupt::Decision;
use sagents_contract::message::Message;
use sagents_contract::state::{SerializedState, State};
use serde_json::json;
use tokio::sync::broadcast;

use crate::config::{RuntimeConfig, RuntimeConfigError};
use crate::event_bus::EventBus;
use crate::placement::{Placement, PlacementConfig, PlacementError, StartOutcome};
use crate::registry::clustered::ClusteredRegistry;
use crate::registry::{AgentKey, Registry};
use crate::worker::{AgentHandle, AgentInfo, WorkerOptions};

/// Options for [`Sagents::stop_agent`].
#[derive(Debug, Clone)]
pub struct StopOptions {
    pub reason: ShutdownReason,
    pub timeout: Duration,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            reason: ShutdownReason::Manual,
            timeout: Duration::from_secs(5),
        }
    }
}

/// One runtime instance. Cheap to clone and share.
#[derive(Clone)]
pub struct Sagents {
    config: RuntimeConfig,
    registry: Arc<dyn Registry>,
    clustered: Option<Arc<ClusteredRegistry>>,
    placement: Placement,
    bus: EventBus,
}

impl Sagents {
    /// Build a runtime. Invalid configuration fails here, never later.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeConfigError> {
        config.validate()?;
        let (registry, clustered) = config.build_registry()?;
        let bus = EventBus::new();
        let placement = Placement::new(
            registry.clone(),
            bus.clone(),
            PlacementConfig {
                registration_deadline: config.registration_deadline,
                ..PlacementConfig::default()
            },
        );
        Ok(Self {
            config,
            registry,
            clustered,
            placement,
            bus,
        })
    }

    /// Single-node runtime with defaults.
    pub fn local() -> Self {
        Self::new(RuntimeConfig::local()).expect("local config is always valid")
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    // ------------------------------------------------------------------
    // Agent management surface
    // ------------------------------------------------------------------

    /// Start an agent, filling unset worker options from runtime defaults.
    pub async fn start_agent(
        &self,
        config: AgentConfig,
        mut options: WorkerOptions,
    ) -> Result<StartOutcome, PlacementError> {
        if options.inactivity_timeout.is_none() {
            options.inactivity_timeout = Some(self.config.inactivity_timeout);
        }
        if options.max_runs.is_none() {
            options.max_runs = Some(self.config.max_runs);
        }
        self.placement.start_agent(config, options).await
    }

    pub async fn stop_agent(
        &self,
        agent_id: &str,
        options: StopOptions,
    ) -> Result<(), PlacementError> {
        self.placement
            .stop_agent(agent_id, options.reason, options.timeout)
            .await
    }

    pub fn list_agents(&self) -> Vec<String> {
        self.placement.list_agents()
    }

    pub fn count_agents(&self) -> usize {
        self.placement.count_agents()
    }

    pub async fn agent_info(&self, agent_id: &str) -> Result<AgentInfo, PlacementError> {
        Ok(self.handle(agent_id)?.info().await?)
    }

    // ------------------------------------------------------------------
    // Worker command surface (by agent id)
    // ------------------------------------------------------------------

    pub fn add_message(&self, agent_id: &str, message: Message) -> Result<(), PlacementError> {
        Ok(self.handle(agent_id)?.add_message(message)?)
    }

    pub fn execute(&self, agent_id: &str) -> Result<(), PlacementError> {
        Ok(self.handle(agent_id)?.execute()?)
    }

    pub async fn cancel(&self, agent_id: &str) -> Result<(), PlacementError> {
        Ok(self.handle(agent_id)?.cancel().await?)
    }

    pub async fn resume(
        &self,
        agent_id: &str,
        decisions: Vec<Decision>,
    ) -> Result<(), PlacementError> {
        Ok(self.handle(agent_id)?.resume(decisions).await?)
    }

    pub async fn get_state(&self, agent_id: &str) -> Result<State, PlacementError> {
        Ok(self.handle(agent_id)?.get_state().await?)
    }

    pub async fn export_state(&self, agent_id: &str) -> Result<SerializedState, PlacementError> {
        Ok(self.handle(agent_id)?.export_state().await?)
    }

    pub async fn update_agent_and_state(
        &self,
        agent_id: &str,
        config: AgentConfig,
        state: State,
    ) -> Result<(), PlacementError> {
        Ok(self
            .handle(agent_id)?
            .update_agent_and_state(config, state)
            .await?)
    }

    pub fn subscribe(&self, agent_id: &str) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe_agent(agent_id)
    }

    pub fn subscribe_debug(&self, agent_id: &str) -> broadcast::Receiver<EventEnvelope> {
        self.bus.subscribe_agent_debug(agent_id)
    }

    pub fn send_middleware_message(
        &self,
        agent_id: &str,
        middleware_id: &str,
        message: serde_json::Value,
    ) -> Result<(), PlacementError> {
        Ok(self
            .handle(agent_id)?
            .send_middleware_message(middleware_id, message)?)
    }

    pub fn publish_event_from(&self, agent_id: &str, event: AgentEvent) {
        self.bus.publish_agent(agent_id, event);
    }

    pub fn publish_debug_event_from(&self, agent_id: &str, event: DebugEvent) {
        self.bus.publish_agent_debug(agent_id, event);
    }

    // ------------------------------------------------------------------
    // Clustered mode
    // ------------------------------------------------------------------

    /// Adopt agents orphaned by departed cluster members. The factory maps
    /// an orphaned agent id to its config and options (typically with
    /// persistence configured so the state restores from the last
    /// snapshot); ids it declines stay orphaned. Each adoption is bracketed
    /// by `node_transferring`/`node_transferred` events.
    pub async fn recover_orphans<F>(&self, factory: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<(AgentConfig, WorkerOptions)>,
    {
        let Some(ref clustered) = self.clustered else {
            return Vec::new();
        };
        let node = clustered.node_id().clone();
        let mut recovered = Vec::new();
        for agent_id in clustered.take_orphaned_agents() {
            let Some((config, options)) = factory(&agent_id) else {
                continue;
            };
            let info = json!({ "agent_id": agent_id, "to_node": node.as_str() });
            self.bus.publish_agent(
                &agent_id,
                AgentEvent::NodeTransferring { info: info.clone() },
            );
            match self.start_agent(config, options).await {
                Ok(_) => {
                    self.bus
                        .publish_agent(&agent_id, AgentEvent::NodeTransferred { info });
                    recovered.push(agent_id);
                }
                Err(e) => {
                    tracing::warn!(agent_id = %agent_id, error = %e, "orphan adoption failed");
                }
            }
        }
        recovered
    }

    fn handle(&self, agent_id: &str) -> Result<AgentHandle, PlacementError> {
        self.registry
            .via(&AgentKey::AgentWorker(agent_id.to_string()))
            .ok()
            .and_then(|w| w.as_agent().cloned())
            .ok_or_else(|| PlacementError::NotFound(agent_id.to_string()))
    }
}
