//! Replicated registry backend for clustered deployments.
//!
//! Each member keeps a full replica of the key→owner map and gossips claims
//! over a [`ClusterTransport`]. Claims carry a monotonically increasing
//! version; conflicting claims resolve deterministically (higher version
//! wins, ties break toward the lexicographically smaller node id), so after
//! membership stabilizes every member agrees on a single owner per key.
//! Lookups are advisory during the convergence window — placement handles
//! `already_started` races on top of this.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{AgentKey, KeyPattern, Registry, RegistryError, WorkerRef};

/// Cluster member identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replica gossip messages.
#[derive(Debug, Clone)]
pub enum ReplicaUpdate {
    Claim {
        key: AgentKey,
        node: NodeId,
        version: u64,
        worker: WorkerRef,
    },
    Release {
        key: AgentKey,
        node: NodeId,
        version: u64,
    },
    NodeDown {
        node: NodeId,
    },
}

/// Transport the clustered registry gossips over. Implementations carry
/// membership; the registry only consumes updates and broadcasts claims.
pub trait ClusterTransport: Send + Sync {
    fn node_id(&self) -> NodeId;
    fn members(&self) -> Vec<NodeId>;
    fn broadcast(&self, update: ReplicaUpdate);
    fn updates(&self) -> broadcast::Receiver<ReplicaUpdate>;
}

/// In-process cluster fabric: every joined node shares one broadcast
/// channel. Used by tests and single-process multi-node simulations; a
/// networked transport implements the same trait out of tree.
pub struct InProcessCluster {
    members: Mutex<Vec<NodeId>>,
    tx: broadcast::Sender<ReplicaUpdate>,
}

impl InProcessCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(Vec::new()),
            tx: broadcast::channel(1024).0,
        })
    }

    /// Join a named node to the cluster.
    pub fn join(self: &Arc<Self>, name: impl Into<String>) -> Arc<InProcessNode> {
        let node = NodeId::new(name);
        self.members
            .lock()
            .expect("cluster lock poisoned")
            .push(node.clone());
        Arc::new(InProcessNode {
            cluster: self.clone(),
            node,
        })
    }

    /// Remove a node, notifying every member.
    pub fn leave(&self, node: &NodeId) {
        self.members
            .lock()
            .expect("cluster lock poisoned")
            .retain(|m| m != node);
        let _ = self.tx.send(ReplicaUpdate::NodeDown { node: node.clone() });
    }

    fn members(&self) -> Vec<NodeId> {
        self.members.lock().expect("cluster lock poisoned").clone()
    }
}

/// One node's view of an [`InProcessCluster`].
pub struct InProcessNode {
    cluster: Arc<InProcessCluster>,
    node: NodeId,
}

impl ClusterTransport for InProcessNode {
    fn node_id(&self) -> NodeId {
        self.node.clone()
    }

    fn members(&self) -> Vec<NodeId> {
        self.cluster.members()
    }

    fn broadcast(&self, update: ReplicaUpdate) {
        let _ = self.cluster.tx.send(update);
    }

    fn updates(&self) -> broadcast::Receiver<ReplicaUpdate> {
        self.cluster.tx.subscribe()
    }
}

#[derive(Debug, Clone)]
struct Claim {
    node: NodeId,
    version: u64,
    worker: WorkerRef,
}

/// Does a new claim win over the stored one?
fn claim_wins(new_node: &NodeId, new_version: u64, current: &Claim) -> bool {
    new_version > current.version
        || (new_version == current.version && *new_node < current.node)
}

/// Eventually consistent replicated registry.
pub struct ClusteredRegistry {
    node: NodeId,
    transport: Arc<dyn ClusterTransport>,
    entries: Arc<RwLock<HashMap<AgentKey, Claim>>>,
    /// Agent ids whose owner dropped out, awaiting adoption by a survivor.
    orphans: Arc<Mutex<Vec<String>>>,
    clock: AtomicU64,
    listener: tokio::task::JoinHandle<()>,
}

impl ClusteredRegistry {
    /// Build a registry replica on this node and start consuming gossip.
    /// Spawns the listener task, so this must run inside a Tokio runtime.
    pub fn new(transport: Arc<dyn ClusterTransport>) -> Self {
        let node = transport.node_id();
        let entries: Arc<RwLock<HashMap<AgentKey, Claim>>> = Arc::default();
        let orphans: Arc<Mutex<Vec<String>>> = Arc::default();

        let mut rx = transport.updates();
        let listener_entries = entries.clone();
        let listener_orphans = orphans.clone();
        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(update) => {
                        Self::apply(&listener_entries, &listener_orphans, update);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "cluster replica lagged; entries may be stale");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            node,
            transport,
            entries,
            orphans,
            clock: AtomicU64::new(1),
            listener,
        }
    }

    fn apply(
        entries: &RwLock<HashMap<AgentKey, Claim>>,
        orphans: &Mutex<Vec<String>>,
        update: ReplicaUpdate,
    ) {
        match update {
            ReplicaUpdate::Claim {
                key,
                node,
                version,
                worker,
            } => {
                let mut entries = entries.write().expect("registry lock poisoned");
                let insert = match entries.get(&key) {
                    Some(current) => claim_wins(&node, version, current),
                    None => true,
                };
                if insert {
                    entries.insert(
                        key,
                        Claim {
                            node,
                            version,
                            worker,
                        },
                    );
                }
            }
            ReplicaUpdate::Release { key, node, version } => {
                let mut entries = entries.write().expect("registry lock poisoned");
                if entries
                    .get(&key)
                    .is_some_and(|c| c.node == node && c.version <= version)
                {
                    entries.remove(&key);
                }
            }
            ReplicaUpdate::NodeDown { node } => {
                let mut entries = entries.write().expect("registry lock poisoned");
                let mut dropped = Vec::new();
                entries.retain(|key, claim| {
                    if claim.node == node {
                        if let AgentKey::AgentWorker(id) = key {
                            dropped.push(id.clone());
                        }
                        false
                    } else {
                        true
                    }
                });
                if !dropped.is_empty() {
                    orphans
                        .lock()
                        .expect("registry lock poisoned")
                        .extend(dropped);
                }
            }
        }
    }

    /// This replica's node id.
    pub fn node_id(&self) -> &NodeId {
        &self.node
    }

    /// Current cluster membership, as the transport reports it.
    pub fn member_set(&self) -> Vec<NodeId> {
        self.transport.members()
    }

    /// The node currently owning a key, if any.
    pub fn owner(&self, key: &AgentKey) -> Option<NodeId> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(key)
            .map(|c| c.node.clone())
    }

    /// Drain agent ids orphaned by departed members. Surviving nodes use
    /// this to adopt and restart the agents, bracketed by
    /// `node_transferring`/`node_transferred` events.
    pub fn take_orphaned_agents(&self) -> Vec<String> {
        std::mem::take(&mut *self.orphans.lock().expect("registry lock poisoned"))
    }

    fn next_version(&self, floor: u64) -> u64 {
        let next = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        next.max(floor + 1)
    }
}

impl Drop for ClusteredRegistry {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl Registry for ClusteredRegistry {
    fn register(&self, key: AgentKey, worker: WorkerRef) -> Result<(), RegistryError> {
        let floor;
        {
            let entries = self.entries.read().expect("registry lock poisoned");
            match entries.get(&key) {
                Some(current) if current.worker.is_alive() => {
                    return Err(RegistryError::AlreadyRegistered(key));
                }
                Some(current) => floor = current.version,
                None => floor = 0,
            }
        }
        let version = self.next_version(floor);
        let claim = Claim {
            node: self.node.clone(),
            version,
            worker: worker.clone(),
        };
        self.entries
            .write()
            .expect("registry lock poisoned")
            .insert(key.clone(), claim);
        self.transport.broadcast(ReplicaUpdate::Claim {
            key,
            node: self.node.clone(),
            version,
            worker,
        });
        Ok(())
    }

    fn unregister(&self, key: &AgentKey) {
        let version = {
            let mut entries = self.entries.write().expect("registry lock poisoned");
            match entries.get(key) {
                Some(claim) if claim.node == self.node => {
                    let version = claim.version;
                    entries.remove(key);
                    Some(version)
                }
                _ => None,
            }
        };
        if let Some(version) = version {
            self.transport.broadcast(ReplicaUpdate::Release {
                key: key.clone(),
                node: self.node.clone(),
                version,
            });
        }
    }

    fn lookup(&self, key: &AgentKey) -> Vec<WorkerRef> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(key)
            .map(|c| c.worker.clone())
            .into_iter()
            .collect()
    }

    fn keys(&self, worker: &WorkerRef) -> Vec<AgentKey> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|(_, c)| c.worker.same_worker(worker))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn count(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    fn select(&self, pattern: &KeyPattern) -> Vec<(AgentKey, WorkerRef)> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|(k, _)| pattern.matches(k))
            .map(|(k, c)| (k.clone(), c.worker.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::worker::AgentHandle;
    use tokio::time::{sleep, Duration};

    fn agent_ref(
        id: &str,
    ) -> (
        WorkerRef,
        tokio::sync::mpsc::UnboundedReceiver<crate::worker::AgentCommand>,
    ) {
        let (handle, rx) = AgentHandle::channel(id, EventBus::new());
        (WorkerRef::Agent(handle), rx)
    }

    async fn settle() {
        sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn claims_replicate_to_every_member() {
        let cluster = InProcessCluster::new();
        let reg1 = ClusteredRegistry::new(cluster.join("node1"));
        let reg2 = ClusteredRegistry::new(cluster.join("node2"));

        let key = AgentKey::AgentWorker("a-1".to_string());
        let (worker, _rx) = agent_ref("a-1");
        reg1.register(key.clone(), worker).unwrap();
        settle().await;

        assert!(reg2.via(&key).is_ok());
        assert_eq!(reg2.owner(&key), Some(NodeId::new("node1")));
        assert_eq!(reg1.member_set().len(), 2);
    }

    #[tokio::test]
    async fn conflicting_claims_converge_on_one_owner() {
        let cluster = InProcessCluster::new();
        let reg1 = ClusteredRegistry::new(cluster.join("node1"));
        let reg2 = ClusteredRegistry::new(cluster.join("node2"));

        let key = AgentKey::AgentWorker("a-1".to_string());
        let (w1, _rx1) = agent_ref("a-1");
        let (w2, _rx2) = agent_ref("a-1");
        reg1.register(key.clone(), w1).unwrap();
        reg2.register(key.clone(), w2).unwrap();
        settle().await;

        let owner1 = reg1.owner(&key).unwrap();
        let owner2 = reg2.owner(&key).unwrap();
        assert_eq!(owner1, owner2, "replicas must agree on the owner");
    }

    #[tokio::test]
    async fn unregister_releases_on_every_member() {
        let cluster = InProcessCluster::new();
        let reg1 = ClusteredRegistry::new(cluster.join("node1"));
        let reg2 = ClusteredRegistry::new(cluster.join("node2"));

        let key = AgentKey::AgentWorker("a-1".to_string());
        let (worker, _rx) = agent_ref("a-1");
        reg1.register(key.clone(), worker).unwrap();
        settle().await;
        reg1.unregister(&key);
        settle().await;

        assert!(reg2.via(&key).is_err());
        assert_eq!(reg2.count(), 0);
    }

    #[tokio::test]
    async fn node_departure_orphans_its_agents() {
        let cluster = InProcessCluster::new();
        let node1 = cluster.join("node1");
        let reg1 = ClusteredRegistry::new(node1.clone());
        let reg2 = ClusteredRegistry::new(cluster.join("node2"));

        let key = AgentKey::AgentWorker("a-1".to_string());
        let (worker, _rx) = agent_ref("a-1");
        reg1.register(key.clone(), worker).unwrap();
        settle().await;

        cluster.leave(&node1.node_id());
        settle().await;

        assert!(reg2.via(&key).is_err());
        assert_eq!(reg2.take_orphaned_agents(), vec!["a-1".to_string()]);
        assert_eq!(reg2.member_set(), vec![NodeId::new("node2")]);
    }
}
