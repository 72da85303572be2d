//! Cluster state from the Mesos master HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use log::{debug, warn};
use serde::Deserialize;

use super::{
    parse_pid, resolve_host, AgentNode, ClusterSnapshot, Discovery, DiscoveryPort, IpCandidates,
    Label, MasterNode, StateSource, Task,
};
use crate::error::StateError;

const STATE_PATH: &str = "/master/state";
const RUNNING: &str = "TASK_RUNNING";
const DOCKER_IP_LABEL: &str = "Docker.NetworkSettings.IPAddress";
const MESOS_IP_LABEL: &str = "MesosContainerizer.NetworkSettings.IPAddress";

#[derive(Debug, Default, Deserialize)]
struct MasterState {
    #[serde(default)]
    leader: String,
    #[serde(default)]
    slaves: Vec<SlaveState>,
    #[serde(default)]
    frameworks: Vec<FrameworkState>,
}

#[derive(Debug, Deserialize)]
struct SlaveState {
    id: String,
    pid: String,
    #[serde(default)]
    hostname: String,
}

#[derive(Debug, Deserialize)]
struct FrameworkState {
    #[serde(default)]
    tasks: Vec<TaskState>,
}

#[derive(Debug, Deserialize)]
struct TaskState {
    id: String,
    #[serde(default)]
    name: String,
    slave_id: String,
    state: String,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    statuses: Vec<TaskStatus>,
    discovery: Option<DiscoveryState>,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    labels: Vec<Label>,
    container_status: Option<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    #[serde(default)]
    network_infos: Vec<NetworkInfo>,
}

#[derive(Debug, Deserialize)]
struct NetworkInfo {
    #[serde(default)]
    ip_addresses: Vec<IpAddress>,
}

#[derive(Debug, Deserialize)]
struct IpAddress {
    ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryState {
    ports: Option<PortList>,
}

#[derive(Debug, Deserialize)]
struct PortList {
    #[serde(default)]
    ports: Vec<PortState>,
}

#[derive(Debug, Deserialize)]
struct PortState {
    number: u32,
    name: Option<String>,
    labels: Option<LabelList>,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<Label>,
}

/// Polls the configured masters and follows the elected leader.
pub struct MesosStateSource {
    client: reqwest::Client,
    masters: Vec<String>,
}

impl MesosStateSource {
    /// `masters` are `host:port` addresses of the Mesos masters.
    pub fn new(masters: Vec<String>, timeout: Duration) -> Result<Self, StateError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| StateError::Http {
                master: String::new(),
                source,
            })?;
        Ok(Self { client, masters })
    }

    async fn fetch(&self, master: &str) -> Result<MasterState, StateError> {
        let url = format!("http://{master}{STATE_PATH}");
        let http = |source: reqwest::Error| StateError::Http {
            master: master.to_string(),
            source,
        };

        let response = self.client.get(&url).send().await.map_err(http)?;
        if !response.status().is_success() {
            return Err(StateError::Status {
                master: master.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.json::<MasterState>().await.map_err(http)
    }

    async fn master_nodes(&self, leader: &str) -> Vec<MasterNode> {
        let mut masters = Vec::with_capacity(self.masters.len() + 1);
        let mut leader_listed = false;

        for master in &self.masters {
            let Some((host, port)) = master.rsplit_once(':') else {
                warn!("Ignoring master address without port: {}", master);
                continue;
            };
            let Ok(port) = port.parse::<u16>() else {
                warn!("Ignoring master address with invalid port: {}", master);
                continue;
            };
            let ip = resolve_host(host).await;
            let is_leader = format!("{ip}:{port}") == leader;
            leader_listed |= is_leader;
            masters.push(MasterNode { ip, port, is_leader });
        }

        if !leader_listed {
            if let Some((ip, port)) = leader.rsplit_once(':') {
                if let Ok(port) = port.parse::<u16>() {
                    masters.push(MasterNode {
                        ip: ip.to_string(),
                        port,
                        is_leader: true,
                    });
                }
            }
        }
        masters
    }
}

#[async_trait]
impl StateSource for MesosStateSource {
    async fn snapshot(&self) -> Result<ClusterSnapshot, StateError> {
        let answers = join_all(self.masters.iter().map(|m| self.fetch(m))).await;

        let mut first = None;
        for (master, answer) in self.masters.iter().zip(answers) {
            match answer {
                Ok(state) if first.is_none() => first = Some((master.as_str(), state)),
                Ok(_) => {}
                Err(e) => warn!("Unable to query master {}: {}", master, e),
            }
        }
        let (answered_by, state) = first.ok_or(StateError::NoMasterReachable {
            tried: self.masters.len(),
        })?;

        let (leader_host, leader_port) =
            parse_pid(&state.leader).ok_or_else(|| StateError::MalformedPid {
                pid: state.leader.clone(),
            })?;
        let leader = format!("{}:{}", resolve_host(leader_host).await, leader_port);

        let state = if resolve_master(answered_by).await == leader {
            state
        } else {
            debug!("Master {} is not the leader, querying {}", answered_by, leader);
            self.fetch(&leader).await?
        };

        Ok(ClusterSnapshot {
            masters: self.master_nodes(&leader).await,
            agents: state.slaves.into_iter().filter_map(agent_node).collect(),
            tasks: state
                .frameworks
                .into_iter()
                .flat_map(|f| f.tasks)
                .filter(|t| t.state == RUNNING)
                .map(task)
                .collect(),
        })
    }
}

async fn resolve_master(master: &str) -> String {
    match master.rsplit_once(':') {
        Some((host, port)) => format!("{}:{}", resolve_host(host).await, port),
        None => master.to_string(),
    }
}

fn agent_node(slave: SlaveState) -> Option<AgentNode> {
    let Some((host, port)) = parse_pid(&slave.pid) else {
        warn!("Skipping agent {} with malformed pid {:?}", slave.id, slave.pid);
        return None;
    };
    Some(AgentNode {
        host: host.to_string(),
        port: port.to_string(),
        id: slave.id,
        hostname: slave.hostname,
    })
}

fn task(state: TaskState) -> Task {
    let ips = state
        .statuses
        .iter()
        .rev()
        .find(|s| s.state == RUNNING)
        .or_else(|| state.statuses.last())
        .map(ip_candidates)
        .unwrap_or_default();

    let ports: Vec<DiscoveryPort> = state
        .discovery
        .and_then(|d| d.ports)
        .map(|p| p.ports)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|port| discovery_port(&state.id, port))
        .collect();

    Task {
        id: state.id,
        name: state.name,
        agent_id: state.slave_id,
        labels: state.labels,
        discovery: Discovery::from_ports(ports),
        ips,
    }
}

fn ip_candidates(status: &TaskStatus) -> IpCandidates {
    let labelled = |key: &str| -> Vec<String> {
        status
            .labels
            .iter()
            .filter(|l| l.key == key && !l.value.is_empty())
            .map(|l| l.value.clone())
            .collect()
    };

    IpCandidates {
        docker: labelled(DOCKER_IP_LABEL),
        mesos: labelled(MESOS_IP_LABEL),
        netinfo: status
            .container_status
            .iter()
            .flat_map(|c| &c.network_infos)
            .flat_map(|n| &n.ip_addresses)
            .filter_map(|a| a.ip_address.clone())
            .filter(|ip| !ip.is_empty())
            .collect(),
    }
}

fn discovery_port(task_id: &str, port: PortState) -> Option<DiscoveryPort> {
    let number = match u16::try_from(port.number) {
        Ok(n) if n > 0 => n,
        _ => {
            warn!("Skipping invalid discovery port {} of task {}", port.number, task_id);
            return None;
        }
    };
    Some(DiscoveryPort {
        number,
        name: port.name.filter(|n| !n.is_empty()),
        labels: port.labels.map(|l| l.labels).unwrap_or_default(),
    })
}
