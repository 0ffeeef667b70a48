//! Worker registry: structured keys to live worker handles.
//!
//! Unique-key semantics: at most one live worker per key. Backends are
//! interchangeable — [`local::LocalRegistry`] for single-node deployments,
//! [`clustered::ClusteredRegistry`] for replicated multi-node ownership.

pub mod clustered;
pub mod local;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::supervisor::SupervisorHandle;
use crate::worker::AgentHandle;

/// Structured registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AgentKey {
    AgentWorker(String),
    AgentSupervisor(String),
    SubAgentSupervisor(String),
    FilesystemWorker(String),
}

impl AgentKey {
    /// The identifier inside the key.
    pub fn id(&self) -> &str {
        match self {
            AgentKey::AgentWorker(id)
            | AgentKey::AgentSupervisor(id)
            | AgentKey::SubAgentSupervisor(id)
            | AgentKey::FilesystemWorker(id) => id,
        }
    }
}

impl std::fmt::Display for AgentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKey::AgentWorker(id) => write!(f, "agent_worker:{id}"),
            AgentKey::AgentSupervisor(id) => write!(f, "agent_supervisor:{id}"),
            AgentKey::SubAgentSupervisor(id) => write!(f, "sub_agent_supervisor:{id}"),
            AgentKey::FilesystemWorker(id) => write!(f, "filesystem_worker:{id}"),
        }
    }
}

/// Key pattern for [`Registry::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    Any,
    AgentWorkers,
    AgentSupervisors,
    SubAgentSupervisors,
    FilesystemWorkers,
    /// Every key variant for one identifier.
    ForId(String),
}

impl KeyPattern {
    pub fn matches(&self, key: &AgentKey) -> bool {
        match self {
            KeyPattern::Any => true,
            KeyPattern::AgentWorkers => matches!(key, AgentKey::AgentWorker(_)),
            KeyPattern::AgentSupervisors => matches!(key, AgentKey::AgentSupervisor(_)),
            KeyPattern::SubAgentSupervisors => matches!(key, AgentKey::SubAgentSupervisor(_)),
            KeyPattern::FilesystemWorkers => matches!(key, AgentKey::FilesystemWorker(_)),
            KeyPattern::ForId(id) => key.id() == id,
        }
    }
}

/// A registered handle: an agent worker's command channel or a supervisor's
/// control channel.
#[derive(Debug, Clone)]
pub enum WorkerRef {
    Agent(AgentHandle),
    Supervisor(SupervisorHandle),
}

impl WorkerRef {
    /// The agent handle, if this is a worker entry.
    pub fn as_agent(&self) -> Option<&AgentHandle> {
        match self {
            WorkerRef::Agent(handle) => Some(handle),
            WorkerRef::Supervisor(_) => None,
        }
    }

    /// The supervisor handle, if this is a supervisor entry.
    pub fn as_supervisor(&self) -> Option<&SupervisorHandle> {
        match self {
            WorkerRef::Agent(_) => None,
            WorkerRef::Supervisor(handle) => Some(handle),
        }
    }

    /// Whether the underlying channel still has a receiver.
    pub fn is_alive(&self) -> bool {
        match self {
            WorkerRef::Agent(handle) => handle.is_alive(),
            WorkerRef::Supervisor(handle) => handle.is_alive(),
        }
    }

    /// Whether two refs point at the same worker (same channel).
    pub fn same_worker(&self, other: &WorkerRef) -> bool {
        match (self, other) {
            (WorkerRef::Agent(a), WorkerRef::Agent(b)) => a.same_channel(b),
            (WorkerRef::Supervisor(a), WorkerRef::Supervisor(b)) => a.same_channel(b),
            _ => false,
        }
    }
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("key already registered: {0}")]
    AlreadyRegistered(AgentKey),

    #[error("key not found: {0}")]
    NotFound(AgentKey),

    #[error("registry backend error: {0}")]
    Backend(String),
}

/// Name service mapping structured keys to worker handles.
pub trait Registry: Send + Sync {
    /// Register a worker under a key. Fails if a live worker already holds
    /// the key; dead entries are replaced.
    fn register(&self, key: AgentKey, worker: WorkerRef) -> Result<(), RegistryError>;

    /// Remove a key.
    fn unregister(&self, key: &AgentKey);

    /// All handles for a key (zero or one for unique keys).
    fn lookup(&self, key: &AgentKey) -> Vec<WorkerRef>;

    /// Resolve a key to its single live handle.
    fn via(&self, key: &AgentKey) -> Result<WorkerRef, RegistryError> {
        self.lookup(key)
            .into_iter()
            .find(WorkerRef::is_alive)
            .ok_or_else(|| RegistryError::NotFound(key.clone()))
    }

    /// All keys registered for a worker.
    fn keys(&self, worker: &WorkerRef) -> Vec<AgentKey>;

    /// Number of registered keys.
    fn count(&self) -> usize;

    /// All entries matching a pattern.
    fn select(&self, pattern: &KeyPattern) -> Vec<(AgentKey, WorkerRef)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display_and_id() {
        let key = AgentKey::AgentWorker("a-1".to_string());
        assert_eq!(key.to_string(), "agent_worker:a-1");
        assert_eq!(key.id(), "a-1");
    }

    #[test]
    fn key_serde_roundtrip() {
        let key = AgentKey::SubAgentSupervisor("a-1".to_string());
        let json = serde_json::to_string(&key).unwrap();
        assert!(json.contains("sub_agent_supervisor"));
        let parsed: AgentKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn pattern_matching() {
        let worker = AgentKey::AgentWorker("a-1".to_string());
        let sup = AgentKey::AgentSupervisor("a-1".to_string());
        assert!(KeyPattern::Any.matches(&worker));
        assert!(KeyPattern::AgentWorkers.matches(&worker));
        assert!(!KeyPattern::AgentWorkers.matches(&sup));
        assert!(KeyPattern::ForId("a-1".to_string()).matches(&sup));
        assert!(!KeyPattern::ForId("a-2".to_string()).matches(&worker));
    }
}
