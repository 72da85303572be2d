//! The reconciliation engine.
//!
//! One call to [`Reconciler::reconcile`] processes a full snapshot: hosts
//! first, which yields the agent address map, then every running task, then a
//! registry sweep of entries nobody confirmed. Registry mutations are issued
//! one at a time, so calls for the same identifier never interleave.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::check::CheckBuilder;
use crate::config::Config;
use crate::error::{ConfigError, RegistryError, TaskError};
use crate::privilege::Privilege;
use crate::registry::Registry;
use crate::state::{ClusterSnapshot, IpSource, MasterNode};
use crate::tags::TaskTagRules;

pub mod decision;
mod hosts;
mod tasks;

pub use decision::CacheDecision;
pub use hosts::AgentAddresses;

/// Naming and tagging inputs of the engine.
#[derive(Debug, Clone)]
pub struct Settings {
    pub service_name: String,
    pub service_id_prefix: String,
    pub separator: String,
    /// Suffixes crossed with host role tags.
    pub service_tags: Vec<String>,
    pub task_tags: TaskTagRules,
    pub ip_order: Vec<IpSource>,
}

impl Settings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            service_name: config.service_name.clone(),
            service_id_prefix: config.service_id_prefix.clone(),
            separator: config.separator.clone(),
            service_tags: config.service_tags.clone(),
            task_tags: TaskTagRules::parse(&config.task_tags)?,
            ip_order: config.ip_order.clone(),
        })
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_name: "mesos".into(),
            service_id_prefix: "mesos-consul".into(),
            separator: "-".into(),
            service_tags: Vec::new(),
            task_tags: TaskTagRules::default(),
            ip_order: vec![
                IpSource::Docker,
                IpSource::Netinfo,
                IpSource::Mesos,
                IpSource::Host,
            ],
        }
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Host entries registered or confirmed.
    pub hosts: usize,
    /// Task entries registered or confirmed.
    pub task_entries: usize,
    /// Tasks skipped by the migration label, the allow-list or an unknown agent.
    pub skipped_tasks: usize,
    /// Stale entries removed by the sweep.
    pub swept: usize,
}

pub struct Reconciler {
    settings: Settings,
    registry: Arc<dyn Registry>,
    privilege: Arc<dyn Privilege>,
    checks: Arc<dyn CheckBuilder>,
}

impl Reconciler {
    pub fn new(
        settings: Settings,
        registry: Arc<dyn Registry>,
        privilege: Arc<dyn Privilege>,
        checks: Arc<dyn CheckBuilder>,
    ) -> Self {
        Self {
            settings,
            registry,
            privilege,
            checks,
        }
    }

    /// Seed the registry cache from the agent on the leading master.
    pub async fn load_cache(&self, leader: &MasterNode) -> Result<(), RegistryError> {
        debug!("Populating cache from Consul");
        self.registry
            .cache_load(&leader.ip, &self.settings.service_id_prefix)
            .await
    }

    pub async fn reconcile(&self, snapshot: &ClusterSnapshot) -> Result<CycleReport, RegistryError> {
        let mut report = match self.register_all(snapshot).await {
            Ok(report) => report,
            Err(e) => {
                // Marks of an aborted cycle must not shield entries from the next sweep.
                self.registry.reset_marks().await;
                return Err(e);
            }
        };

        report.swept = self.registry.sweep().await?;
        info!(
            "Cycle done: {} host entries, {} task entries, {} tasks skipped, {} swept",
            report.hosts, report.task_entries, report.skipped_tasks, report.swept
        );
        Ok(report)
    }

    async fn register_all(&self, snapshot: &ClusterSnapshot) -> Result<CycleReport, RegistryError> {
        let mut report = CycleReport::default();

        let (agents, hosts) = self.register_hosts(snapshot).await?;
        report.hosts = hosts;

        for task in &snapshot.tasks {
            let Some(agent) = agents.get(&task.agent_id) else {
                debug!("Skipping task {}: agent {} unknown", task.id, task.agent_id);
                report.skipped_tasks += 1;
                continue;
            };

            match self.register_task(task, agent).await {
                Ok(entries) => report.task_entries += entries,
                Err(TaskError::Registry(e)) => return Err(e),
                Err(e) => {
                    warn!("Not registering task {}: {}", task.id, e);
                    report.skipped_tasks += 1;
                }
            }
        }

        Ok(report)
    }
}
