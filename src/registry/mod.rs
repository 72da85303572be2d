//! Service registry abstraction.
//!
//! The reconciler only talks to a [`Registry`]; it never touches the cache
//! directly. Implementations keep a local [`ServiceCache`] of the entries they
//! know about and track which of them were confirmed during the current cycle.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

pub mod consul;
pub mod memory;

pub use consul::ConsulRegistry;
pub use memory::{MemoryRegistry, RegistryCall};

/// Health check attached to a service definition.
///
/// Serialised with the field names of the Consul agent API. An empty check is
/// omitted from the registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    pub tcp: Option<String>,
    #[serde(rename = "Args", skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(rename = "Interval", skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(rename = "Timeout", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl Check {
    pub fn http(url: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            http: Some(url.into()),
            interval: Some(interval.into()),
            ..Default::default()
        }
    }

    /// True when no probe kind is set.
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.tcp.is_none() && self.args.is_none() && self.ttl.is_none()
    }
}

/// A service entry the reconciler wants to exist in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDefinition {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address", skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(rename = "Port", skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Check", skip_serializing_if = "Check::is_empty")]
    pub check: Check,
    /// Registry agent that owns the entry and runs its check.
    #[serde(skip)]
    pub agent: String,
}

/// The registry client's record of a registered entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedService {
    pub id: String,
    pub tags: Vec<String>,
    pub agent: String,
    /// Set once the entry is registered or confirmed in the running cycle.
    pub confirmed: bool,
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Populate the cache with entries under `prefix`, asking the agent at `seed`.
    async fn cache_load(&self, seed: &str, prefix: &str) -> Result<(), RegistryError>;

    async fn cache_lookup(&self, id: &str) -> Option<CachedService>;

    /// Mark an entry as present for this cycle. Idempotent.
    async fn cache_mark(&self, id: &str);

    async fn cache_delete(&self, id: &str);

    /// Upsert `service` and record it as confirmed.
    async fn register(&self, service: &ServiceDefinition) -> Result<(), RegistryError>;

    /// Deregister every cached entry not confirmed this cycle, then clear all
    /// marks. Returns the number of entries removed.
    async fn sweep(&self) -> Result<usize, RegistryError>;

    /// Clear all marks without removing anything.
    async fn reset_marks(&self);
}

/// Local view of registered entries keyed by identifier.
#[derive(Debug, Default)]
pub struct ServiceCache {
    entries: HashMap<String, CachedService>,
}

impl ServiceCache {
    pub fn get(&self, id: &str) -> Option<&CachedService> {
        self.entries.get(id)
    }

    /// Add entries discovered in the registry, unconfirmed.
    pub fn load(&mut self, services: impl IntoIterator<Item = CachedService>) {
        for service in services {
            self.entries.insert(service.id.clone(), service);
        }
    }

    pub fn insert_confirmed(&mut self, service: &ServiceDefinition) {
        self.entries.insert(
            service.id.clone(),
            CachedService {
                id: service.id.clone(),
                tags: service.tags.clone(),
                agent: service.agent.clone(),
                confirmed: true,
            },
        );
    }

    pub fn mark(&mut self, id: &str) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.confirmed = true;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<CachedService> {
        self.entries.remove(id)
    }

    /// Entries not confirmed since the last reset.
    pub fn stale(&self) -> Vec<CachedService> {
        let mut stale: Vec<CachedService> = self
            .entries
            .values()
            .filter(|e| !e.confirmed)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.id.cmp(&b.id));
        stale
    }

    pub fn reset_marks(&mut self) {
        for entry in self.entries.values_mut() {
            entry.confirmed = false;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str) -> ServiceDefinition {
        ServiceDefinition {
            id: id.into(),
            name: "web".into(),
            address: String::new(),
            port: None,
            tags: vec!["a".into()],
            check: Check::default(),
            agent: "10.0.0.5".into(),
        }
    }

    fn cached(id: &str) -> CachedService {
        CachedService {
            id: id.into(),
            tags: vec![],
            agent: "10.0.0.5".into(),
            confirmed: false,
        }
    }

    #[test]
    fn test_cache_mark_and_stale() {
        let mut cache = ServiceCache::default();
        cache.load([cached("b"), cached("a")]);
        cache.insert_confirmed(&definition("c"));

        assert!(cache.mark("a"));
        assert!(!cache.mark("missing"));
        let stale: Vec<String> = cache.stale().into_iter().map(|e| e.id).collect();
        assert_eq!(stale, vec!["b".to_string()]);

        cache.reset_marks();
        assert_eq!(cache.stale().len(), 3);
    }

    #[test]
    fn test_cache_remove() {
        let mut cache = ServiceCache::default();
        cache.insert_confirmed(&definition("a"));
        assert_eq!(cache.get("a").map(|e| e.tags.clone()), Some(vec!["a".to_string()]));
        assert!(cache.remove("a").is_some());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_definition_serialisation() {
        let mut service = definition("mc:web");
        let value = serde_json::to_value(&service).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"ID": "mc:web", "Name": "web", "Tags": ["a"]})
        );

        service.port = Some(8080);
        service.address = "10.0.0.9".into();
        service.check = Check::http("http://10.0.0.9:8080/health", "10s");
        let value = serde_json::to_value(&service).unwrap();
        assert_eq!(value["Port"], 8080);
        assert_eq!(value["Address"], "10.0.0.9");
        assert_eq!(value["Check"]["HTTP"], "http://10.0.0.9:8080/health");
        assert_eq!(value["Check"]["Interval"], "10s");
        assert!(value.get("agent").is_none());
    }
}
