//! In-process registry backend.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{AgentKey, KeyPattern, Registry, RegistryError, WorkerRef};

/// Single-node registry: an equality-keyed map with O(1) lookup.
#[derive(Default)]
pub struct LocalRegistry {
    entries: RwLock<HashMap<AgentKey, WorkerRef>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for LocalRegistry {
    fn register(&self, key: AgentKey, worker: WorkerRef) -> Result<(), RegistryError> {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if let Some(existing) = entries.get(&key) {
            if existing.is_alive() {
                return Err(RegistryError::AlreadyRegistered(key));
            }
        }
        entries.insert(key, worker);
        Ok(())
    }

    fn unregister(&self, key: &AgentKey) {
        self.entries
            .write()
            .expect("registry lock poisoned")
            .remove(key);
    }

    fn lookup(&self, key: &AgentKey) -> Vec<WorkerRef> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(key)
            .cloned()
            .into_iter()
            .collect()
    }

    fn keys(&self, worker: &WorkerRef) -> Vec<AgentKey> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .iter()
            .filter(|(_, w)| w.same_worker(worker))
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
            .map(|(k, w)| (k.clone(), w.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::worker::AgentHandle;

    fn agent_ref(id: &str) -> (WorkerRef, tokio::sync::mpsc::UnboundedReceiver<crate::worker::AgentCommand>) {
        let (handle, rx) = AgentHandle::channel(id, EventBus::new());
        (WorkerRef::Agent(handle), rx)
    }

    #[tokio::test]
    async fn register_and_via_resolve_live_workers() {
        let registry = LocalRegistry::new();
        let key = AgentKey::AgentWorker("a-1".to_string());
        let (worker, _rx) = agent_ref("a-1");
        registry.register(key.clone(), worker).unwrap();

        assert!(registry.via(&key).is_ok());
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn duplicate_live_registration_is_rejected() {
        let registry = LocalRegistry::new();
        let key = AgentKey::AgentWorker("a-1".to_string());
        let (first, _rx1) = agent_ref("a-1");
        let (second, _rx2) = agent_ref("a-1");
        registry.register(key.clone(), first).unwrap();

        assert!(matches!(
            registry.register(key, second),
            Err(RegistryError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn dead_entries_are_replaced_on_register() {
        let registry = LocalRegistry::new();
        let key = AgentKey::AgentWorker("a-1".to_string());
        let (first, rx) = agent_ref("a-1");
        registry.register(key.clone(), first).unwrap();
        drop(rx);

        let (second, _rx2) = agent_ref("a-1");
        registry.register(key.clone(), second).unwrap();
        assert!(registry.via(&key).is_ok());
    }

    #[tokio::test]
    async fn keys_returns_every_key_of_a_worker() {
        let registry = LocalRegistry::new();
        let (worker, _rx) = agent_ref("a-1");
        registry
            .register(AgentKey::AgentWorker("a-1".to_string()), worker.clone())
            .unwrap();
        registry
            .register(AgentKey::FilesystemWorker("a-1".to_string()), worker.clone())
            .unwrap();

        let mut keys = registry.keys(&worker);
        keys.sort_by_key(|k| k.to_string());
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn select_filters_by_pattern() {
        let registry = LocalRegistry::new();
        let (a, _rx1) = agent_ref("a-1");
        let (b, _rx2) = agent_ref("a-2");
        registry
            .register(AgentKey::AgentWorker("a-1".to_string()), a)
            .unwrap();
        registry
            .register(AgentKey::AgentWorker("a-2".to_string()), b)
            .unwrap();

        assert_eq!(registry.select(&KeyPattern::AgentWorkers).len(), 2);
        assert_eq!(
            registry.select(&KeyPattern::ForId("a-1".to_string())).len(),
            1
        );
        registry.unregister(&AgentKey::AgentWorker("a-1".to_string()));
        assert_eq!(registry.select(&KeyPattern::AgentWorkers).len(), 1);
    }
}
