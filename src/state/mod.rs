//! Cluster state as seen by the reconciler.
//!
//! A [`ClusterSnapshot`] is rebuilt from scratch on every cycle; nothing in
//! here is mutated in place.

use std::net::IpAddr;
use std::str::FromStr;

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::StateError;

pub mod mesos;
pub use mesos::MesosStateSource;

/// Tasks carrying this label are registered by another mechanism.
pub const MIGRATION_LABEL: &str = "consul";
pub const OVERRIDE_NAME_LABEL: &str = "overrideTaskName";
pub const TAGS_LABEL: &str = "tags";

#[async_trait]
pub trait StateSource: Send + Sync {
    /// Fetch a complete snapshot of masters, agents and running tasks.
    async fn snapshot(&self) -> Result<ClusterSnapshot, StateError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// First value for `key`; later duplicates are ignored.
pub fn label_value<'a>(labels: &'a [Label], key: &str) -> Option<&'a str> {
    labels
        .iter()
        .find(|l| l.key == key)
        .map(|l| l.value.as_str())
}

/// A worker agent as reported by the leading master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentNode {
    pub id: String,
    pub hostname: String,
    /// Host part of the agent pid, an IP or a resolvable name.
    pub host: String,
    /// Port part of the agent pid, unparsed.
    pub port: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterNode {
    pub ip: String,
    pub port: u16,
    pub is_leader: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPort {
    pub number: u16,
    pub name: Option<String>,
    pub labels: Vec<Label>,
}

impl DiscoveryPort {
    pub fn label(&self, key: &str) -> Option<&str> {
        label_value(&self.labels, key)
    }
}

/// Discovery metadata of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Discovery {
    #[default]
    NoPorts,
    /// Declared ports in order; never empty.
    Ports(Vec<DiscoveryPort>),
}

impl Discovery {
    pub fn from_ports(ports: Vec<DiscoveryPort>) -> Self {
        if ports.is_empty() {
            Self::NoPorts
        } else {
            Self::Ports(ports)
        }
    }
}

/// Where a task's address may come from, tried in configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpSource {
    Docker,
    Mesos,
    Netinfo,
    /// The address of the agent running the task.
    Host,
}

impl FromStr for IpSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "mesos" => Ok(Self::Mesos),
            "netinfo" => Ok(Self::Netinfo),
            "host" => Ok(Self::Host),
            other => Err(format!("unknown ip source {other:?}")),
        }
    }
}

/// Candidate addresses reported by the task itself, per source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpCandidates {
    pub docker: Vec<String>,
    pub mesos: Vec<String>,
    pub netinfo: Vec<String>,
}

/// A running workload instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub agent_id: String,
    pub labels: Vec<Label>,
    pub discovery: Discovery,
    pub ips: IpCandidates,
}

impl Task {
    pub fn label(&self, key: &str) -> Option<&str> {
        label_value(&self.labels, key)
    }

    /// Resolve the task address following `order`.
    pub fn ip(&self, order: &[IpSource], agent_address: Option<&str>) -> Option<String> {
        order.iter().find_map(|source| {
            let candidate = match source {
                IpSource::Docker => self.ips.docker.first().map(String::as_str),
                IpSource::Mesos => self.ips.mesos.first().map(String::as_str),
                IpSource::Netinfo => self.ips.netinfo.first().map(String::as_str),
                IpSource::Host => agent_address,
            };
            candidate.filter(|ip| !ip.is_empty()).map(str::to_string)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub masters: Vec<MasterNode>,
    pub agents: Vec<AgentNode>,
    pub tasks: Vec<Task>,
}

impl ClusterSnapshot {
    pub fn leader(&self) -> Option<&MasterNode> {
        self.masters.iter().find(|m| m.is_leader)
    }
}

/// Split a libprocess pid such as `slave(1)@10.0.0.5:5051` into host and port.
pub fn parse_pid(pid: &str) -> Option<(&str, &str)> {
    let (_, address) = pid.split_once('@')?;
    let (host, port) = address.rsplit_once(':')?;
    if host.is_empty() || port.is_empty() {
        return None;
    }
    Some((host, port))
}

/// Canonicalise a host to an IP address.
///
/// IPs pass through; names resolve to their first IPv4 address, then any
/// address. Unresolvable names are returned unchanged.
pub async fn resolve_host(host: &str) -> String {
    if host.parse::<IpAddr>().is_ok() {
        return host.to_string();
    }

    match tokio::net::lookup_host((host, 0)).await {
        Ok(addrs) => {
            let addrs: Vec<IpAddr> = addrs.map(|a| a.ip()).collect();
            addrs
                .iter()
                .find(|ip| ip.is_ipv4())
                .or_else(|| addrs.first())
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| host.to_string())
        }
        Err(e) => {
            warn!("Unable to resolve host {}: {}", host, e);
            host.to_string()
        }
    }
}
