//! Register, confirm or replace a desired entry against the registry cache.

use log::info;

use crate::error::RegistryError;
use crate::registry::{CachedService, Registry, ServiceDefinition};
use crate::tags::tags_match;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Nothing cached under this identifier.
    Register,
    /// Cached with the same tag set; only mark it.
    Confirm,
    /// Cached with different tags; delete then register.
    Replace,
}

pub fn decide(desired: &ServiceDefinition, cached: Option<&CachedService>) -> CacheDecision {
    match cached {
        None => CacheDecision::Register,
        Some(c) if tags_match(&desired.tags, &c.tags) => CacheDecision::Confirm,
        Some(_) => CacheDecision::Replace,
    }
}

/// Apply the cache decision for `desired` through `registry`.
pub async fn apply<R>(registry: &R, desired: &ServiceDefinition) -> Result<CacheDecision, RegistryError>
where
    R: Registry + ?Sized,
{
    let cached = registry.cache_lookup(&desired.id).await;
    let decision = decide(desired, cached.as_ref());

    match decision {
        CacheDecision::Confirm => registry.cache_mark(&desired.id).await,
        CacheDecision::Replace => {
            info!(
                "Tags of {} changed ({:?} -> {:?}), re-registering",
                desired.id,
                cached.map(|c| c.tags).unwrap_or_default(),
                desired.tags
            );
            registry.cache_delete(&desired.id).await;
            registry.register(desired).await?;
        }
        CacheDecision::Register => registry.register(desired).await?,
    }

    Ok(decision)
}
