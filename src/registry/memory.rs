//! In-process registry used for dry runs and tests.

use async_trait::async_trait;
use log::info;
use tokio::sync::{Mutex, RwLock};

use super::{CachedService, Registry, ServiceCache, ServiceDefinition};
use crate::error::RegistryError;

/// A registry mutation observed by [`MemoryRegistry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    Mark(String),
    Delete(String),
    Register(ServiceDefinition),
    Deregister(String),
}

/// Keeps the cache in memory and records every mutation instead of talking
/// to a remote registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    cache: RwLock<ServiceCache>,
    calls: Mutex<Vec<RegistryCall>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `services` already cached, as if loaded at startup.
    pub fn with_services(services: impl IntoIterator<Item = CachedService>) -> Self {
        let mut cache = ServiceCache::default();
        cache.load(services);
        Self {
            cache: RwLock::new(cache),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    /// Definitions passed to `register`, in call order.
    pub async fn registered(&self) -> Vec<ServiceDefinition> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                RegistryCall::Register(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn record(&self, call: RegistryCall) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn cache_load(&self, _seed: &str, _prefix: &str) -> Result<(), RegistryError> {
        Ok(())
    }

    async fn cache_lookup(&self, id: &str) -> Option<CachedService> {
        self.cache.read().await.get(id).cloned()
    }

    async fn cache_mark(&self, id: &str) {
        self.cache.write().await.mark(id);
        self.record(RegistryCall::Mark(id.to_string())).await;
    }

    async fn cache_delete(&self, id: &str) {
        self.cache.write().await.remove(id);
        self.record(RegistryCall::Delete(id.to_string())).await;
    }

    async fn register(&self, service: &ServiceDefinition) -> Result<(), RegistryError> {
        info!("Registering {} ({}) on {}", service.id, service.name, service.agent);
        self.cache.write().await.insert_confirmed(service);
        self.record(RegistryCall::Register(service.clone())).await;
        Ok(())
    }

    async fn sweep(&self) -> Result<usize, RegistryError> {
        let mut cache = self.cache.write().await;
        let stale = cache.stale();
        for entry in &stale {
            info!("Deregistering stale service {}", entry.id);
            cache.remove(&entry.id);
            self.record(RegistryCall::Deregister(entry.id.clone())).await;
        }
        cache.reset_marks();
        Ok(stale.len())
    }

    async fn reset_marks(&self) {
        self.cache.write().await.reset_marks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Check;

    fn definition(id: &str) -> ServiceDefinition {
        ServiceDefinition {
            id: id.into(),
            name: "web".into(),
            address: String::new(),
            port: None,
            tags: vec![],
            check: Check::default(),
            agent: "10.0.0.5".into(),
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_unconfirmed_entries() {
        let registry = MemoryRegistry::with_services([
            CachedService {
                id: "keep".into(),
                tags: vec![],
                agent: "10.0.0.5".into(),
                confirmed: false,
            },
            CachedService {
                id: "gone".into(),
                tags: vec![],
                agent: "10.0.0.5".into(),
                confirmed: false,
            },
        ]);

        registry.cache_mark("keep").await;
        registry.register(&definition("new")).await.unwrap();
        assert_eq!(registry.sweep().await.unwrap(), 1);
        assert_eq!(registry.cached_len().await, 2);
        assert!(registry.cache_lookup("gone").await.is_none());
        assert_eq!(
            registry.calls().await.last(),
            Some(&RegistryCall::Deregister("gone".into()))
        );

        // Nothing confirmed in the next cycle, so everything goes.
        assert_eq!(registry.sweep().await.unwrap(), 2);
        assert_eq!(registry.cached_len().await, 0);
    }
}
