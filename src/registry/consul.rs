//! Consul agent HTTP client.
//!
//! Every entry is registered with the Consul agent running on the host that
//! owns it, so the agent runs the check locally and removes the entry when
//! the host disappears.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{CachedService, Registry, ServiceCache, ServiceDefinition};
use crate::error::RegistryError;

const TOKEN_HEADER: &str = "X-Consul-Token";

#[derive(Debug, Deserialize)]
struct CatalogService {
    #[serde(rename = "ServiceID")]
    service_id: String,
    #[serde(rename = "ServiceTags", default)]
    service_tags: Option<Vec<String>>,
    #[serde(rename = "Address", default)]
    address: String,
}

pub struct ConsulRegistry {
    client: reqwest::Client,
    scheme: String,
    port: u16,
    token: Option<String>,
    cache: RwLock<ServiceCache>,
}

impl ConsulRegistry {
    pub fn new(
        scheme: impl Into<String>,
        port: u16,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| RegistryError::Http {
                agent: String::new(),
                source,
            })?;

        Ok(Self {
            client,
            scheme: scheme.into(),
            port,
            token,
            cache: RwLock::new(ServiceCache::default()),
        })
    }

    fn request(&self, method: Method, agent: &str, path: &str) -> RequestBuilder {
        let url = format!("{}://{}:{}{}", self.scheme, agent, self.port, path);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn send(
        &self,
        agent: &str,
        path: &str,
        builder: RequestBuilder,
    ) -> Result<reqwest::Response, RegistryError> {
        let response = builder.send().await.map_err(|source| RegistryError::Http {
            agent: agent.to_string(),
            source,
        })?;

        if !response.status().is_success() {
            return Err(RegistryError::Status {
                agent: agent.to_string(),
                status: response.status().as_u16(),
                path: path.to_string(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        agent: &str,
        path: &str,
    ) -> Result<T, RegistryError> {
        let response = self
            .send(agent, path, self.request(Method::GET, agent, path))
            .await?;
        response.json::<T>().await.map_err(|source| RegistryError::Http {
            agent: agent.to_string(),
            source,
        })
    }

    async fn deregister(&self, agent: &str, id: &str) -> Result<(), RegistryError> {
        let path = format!("/v1/agent/service/deregister/{id}");
        self.send(agent, &path, self.request(Method::PUT, agent, &path))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn cache_load(&self, seed: &str, prefix: &str) -> Result<(), RegistryError> {
        debug!("Populating cache from Consul agent {}", seed);
        let id_prefix = format!("{prefix}:");

        let services: HashMap<String, Vec<String>> =
            self.get_json(seed, "/v1/catalog/services").await?;

        let mut loaded = Vec::new();
        for name in services.keys() {
            let path = format!("/v1/catalog/service/{name}");
            let instances: Vec<CatalogService> = self.get_json(seed, &path).await?;
            loaded.extend(
                instances
                    .into_iter()
                    .filter(|s| s.service_id.starts_with(&id_prefix))
                    .map(|s| CachedService {
                        id: s.service_id,
                        tags: s.service_tags.unwrap_or_default(),
                        agent: s.address,
                        confirmed: false,
                    }),
            );
        }

        info!("Loaded {} cached services with prefix {}", loaded.len(), prefix);
        self.cache.write().await.load(loaded);
        Ok(())
    }

    async fn cache_lookup(&self, id: &str) -> Option<CachedService> {
        self.cache.read().await.get(id).cloned()
    }

    async fn cache_mark(&self, id: &str) {
        self.cache.write().await.mark(id);
    }

    async fn cache_delete(&self, id: &str) {
        self.cache.write().await.remove(id);
    }

    async fn register(&self, service: &ServiceDefinition) -> Result<(), RegistryError> {
        let path = "/v1/agent/service/register";
        debug!("Registering {} on agent {}", service.id, service.agent);

        let builder = self
            .request(Method::PUT, &service.agent, path)
            .json(service);
        self.send(&service.agent, path, builder).await?;

        self.cache.write().await.insert_confirmed(service);
        Ok(())
    }

    async fn sweep(&self) -> Result<usize, RegistryError> {
        let stale = self.cache.read().await.stale();

        let mut removed = 0;
        for entry in stale {
            info!("Deregistering stale service {} from {}", entry.id, entry.agent);
            match self.deregister(&entry.agent, &entry.id).await {
                Ok(()) => {
                    self.cache.write().await.remove(&entry.id);
                    removed += 1;
                }
                Err(e) => warn!("Unable to deregister {}: {}", entry.id, e),
            }
        }

        self.cache.write().await.reset_marks();
        Ok(removed)
    }

    async fn reset_marks(&self) {
        self.cache.write().await.reset_marks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Check;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry(server: &MockServer, token: Option<&str>) -> ConsulRegistry {
        ConsulRegistry::new(
            "http",
            server.address().port(),
            token.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn definition() -> ServiceDefinition {
        ServiceDefinition {
            id: "mesos-consul:10.0.0.5:web:8080".into(),
            name: "web".into(),
            address: "127.0.0.1".into(),
            port: Some(8080),
            tags: vec!["http".into()],
            check: Check::http("http://127.0.0.1:8080/health", "10s"),
            agent: "127.0.0.1".into(),
        }
    }

    #[tokio::test]
    async fn test_cache_load_filters_by_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"web": ["a"]})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/service/web"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"ServiceID": "mesos-consul:10.0.0.5:web:8080", "ServiceTags": ["a"], "Address": "10.0.0.5"},
                {"ServiceID": "other:web", "ServiceTags": null, "Address": "10.0.0.6"}
            ])))
            .mount(&server)
            .await;

        let registry = registry(&server, None);
        registry.cache_load("127.0.0.1", "mesos-consul").await.unwrap();

        let cached = registry
            .cache_lookup("mesos-consul:10.0.0.5:web:8080")
            .await
            .unwrap();
        assert_eq!(cached.tags, vec!["a".to_string()]);
        assert_eq!(cached.agent, "10.0.0.5");
        assert!(!cached.confirmed);
        assert!(registry.cache_lookup("other:web").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_load_is_all_or_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"web": [], "db": []})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/service/web"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"ServiceID": "mesos-consul:10.0.0.5:web:8080", "ServiceTags": [], "Address": "10.0.0.5"}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/service/db"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = registry(&server, None);
        let result = registry.cache_load("127.0.0.1", "mesos-consul").await;

        assert!(matches!(result, Err(RegistryError::Status { status: 500, .. })));
        assert!(registry.cache.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_register_sends_definition_with_token() {
        let server = MockServer::start().await;
        let service = definition();
        Mock::given(method("PUT"))
            .and(path("/v1/agent/service/register"))
            .and(header("X-Consul-Token", "secret"))
            .and(body_json(json!({
                "ID": service.id,
                "Name": "web",
                "Address": "127.0.0.1",
                "Port": 8080,
                "Tags": ["http"],
                "Check": {"HTTP": "http://127.0.0.1:8080/health", "Interval": "10s"}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let registry = registry(&server, Some("secret"));
        registry.register(&service).await.unwrap();

        let cached = registry.cache_lookup(&service.id).await.unwrap();
        assert!(cached.confirmed);
    }

    #[tokio::test]
    async fn test_register_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = registry(&server, None);
        let result = registry.register(&definition()).await;
        assert!(matches!(result, Err(RegistryError::Status { status: 500, .. })));
        assert!(registry.cache_lookup(&definition().id).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_deregisters_unconfirmed() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/agent/service/deregister/mesos-consul:stale"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/agent/service/register"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let registry = registry(&server, None);
        registry.cache.write().await.load([CachedService {
            id: "mesos-consul:stale".into(),
            tags: vec![],
            agent: "127.0.0.1".into(),
            confirmed: false,
        }]);
        registry.register(&definition()).await.unwrap();

        assert_eq!(registry.sweep().await.unwrap(), 1);
        assert!(registry.cache_lookup("mesos-consul:stale").await.is_none());
        let kept = registry.cache_lookup(&definition().id).await.unwrap();
        assert!(!kept.confirmed);
    }
}
