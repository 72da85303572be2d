use std::collections::HashMap;

use log::{debug, warn};

use super::{decision, Reconciler};
use crate::error::RegistryError;
use crate::naming::{agent_service_id, master_service_id};
use crate::registry::{Check, ServiceDefinition};
use crate::state::{resolve_host, AgentNode, ClusterSnapshot, MasterNode};
use crate::tags::node_tags;

const CHECK_INTERVAL: &str = "10s";

/// Agent identifier to resolved address, rebuilt by every host pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentAddresses(HashMap<String, String>);

impl AgentAddresses {
    pub fn insert(&mut self, agent_id: impl Into<String>, address: impl Into<String>) {
        self.0.insert(agent_id.into(), address.into());
    }

    pub fn get(&self, agent_id: &str) -> Option<&str> {
        self.0.get(agent_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Reconciler {
    /// Register every agent and master of `snapshot`.
    ///
    /// Returns the agent address map and the number of host entries that were
    /// registered or confirmed.
    pub async fn register_hosts(
        &self,
        snapshot: &ClusterSnapshot,
    ) -> Result<(AgentAddresses, usize), RegistryError> {
        debug!("Running register_hosts");

        let mut agents = AgentAddresses::default();
        let mut entries = 0;

        for agent in &snapshot.agents {
            let address = resolve_host(&agent.host).await;
            agents.insert(agent.id.as_str(), address.as_str());

            let Ok(port) = agent.port.parse::<u16>() else {
                warn!("Not registering agent {}: invalid port {:?}", agent.id, agent.port);
                continue;
            };
            let definition = self.agent_definition(agent, &address, port);
            decision::apply(self.registry.as_ref(), &definition).await?;
            entries += 1;
        }

        for master in &snapshot.masters {
            decision::apply(self.registry.as_ref(), &self.master_definition(master)).await?;
            entries += 1;
        }

        Ok((agents, entries))
    }

    fn agent_definition(&self, agent: &AgentNode, address: &str, port: u16) -> ServiceDefinition {
        let s = &self.settings;
        ServiceDefinition {
            id: agent_service_id(&s.service_id_prefix, &s.service_name, &agent.id, &agent.hostname),
            name: s.service_name.clone(),
            address: address.to_string(),
            port: Some(port),
            tags: node_tags(&["agent", "follower"], &s.service_tags),
            check: Check::http(format!("http://{address}:{port}/slave(1)/health"), CHECK_INTERVAL),
            agent: address.to_string(),
        }
    }

    fn master_definition(&self, master: &MasterNode) -> ServiceDefinition {
        let s = &self.settings;
        let roles: &[&str] = if master.is_leader {
            &["leader", "master"]
        } else {
            &["master"]
        };

        ServiceDefinition {
            id: master_service_id(&s.service_id_prefix, &s.service_name, &master.ip, master.port),
            name: s.service_name.clone(),
            address: master.ip.clone(),
            port: Some(master.port),
            tags: node_tags(roles, &s.service_tags),
            check: Check::http(
                format!("http://{}:{}/master/health", master.ip, master.port),
                CHECK_INTERVAL,
            ),
            agent: master.ip.clone(),
        }
    }
}
