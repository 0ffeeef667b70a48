//! Sagents runtime kernel.
//!
//! Per-agent supervised workers over a pluggable registry: each agent is a
//! single-consumer serializer owning its state, running the execution
//! pipeline in cancellable tasks, pausing for human-in-the-loop decisions,
//! and fanning events out over per-agent topics. Placement starts and
//! locates workers on one node or across a cluster.

pub mod config;
pub mod event_bus;
pub mod manager;
pub mod persistence;
pub mod placement;
pub mod registry;
pub mod supervisor;
pub mod worker;

pub use config::{
    DistributionMode, MemberDiscoveryFn, MemberPolicy, RuntimeConfig, RuntimeConfigError,
};
pub use event_bus::{agent_debug_topic, agent_topic, EventBus};
pub use manager::{Sagents, StopOptions};
pub use persistence::{MemoryAgentPersistence, MemoryDisplayPersistence};
pub use placement::{Placement, PlacementConfig, PlacementError, StartOutcome};
pub use registry::clustered::{
    ClusteredRegistry, ClusterTransport, InProcessCluster, InProcessNode, NodeId, ReplicaUpdate,
};
pub use registry::local::LocalRegistry;
pub use registry::{AgentKey, KeyPattern, Registry, RegistryError, WorkerRef};
pub use supervisor::SupervisorHandle;
pub use worker::{
    AgentCommand, AgentHandle, AgentInfo, PresenceConfig, WorkerError, WorkerOptions,
};

/// Common imports for applications embedding the runtime.
pub mod prelude {
    pub use crate::{
        AgentHandle, AgentInfo, AgentKey, EventBus, PresenceConfig, RuntimeConfig, Sagents,
        StartOutcome, StopOptions, WorkerOptions,
    };
    pub use sagents_contract::{
        AgentConfig, AgentContext, AgentEvent, AgentPersistence, ChatModel, Decision,
        DisplayMessagePersistence, EventEnvelope, HitlPolicy, Message, Middleware,
        MiddlewareEntry, ShutdownReason, State, Status, Tool, ToolCallContext, ToolOutput,
    };
    pub use sagents_pipeline::{Pipeline, PipelineOptions, RunOutcome};
}
