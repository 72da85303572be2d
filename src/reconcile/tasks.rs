use log::debug;

use super::{decision, Reconciler};
use crate::check::CheckVar;
use crate::error::TaskError;
use crate::naming::{
    clean_name, named_port_service_id, primary_port_service_id, task_service_id,
};
use crate::registry::{Registry, ServiceDefinition};
use crate::state::{
    Discovery, DiscoveryPort, Task, MIGRATION_LABEL, OVERRIDE_NAME_LABEL, TAGS_LABEL,
};
use crate::tags::{push_unique, split_tags};

impl Reconciler {
    /// Register the entries of one running task on `agent`.
    ///
    /// Returns how many entries were registered or confirmed.
    pub async fn register_task(&self, task: &Task, agent: &str) -> Result<usize, TaskError> {
        if task.label(MIGRATION_LABEL).is_some() {
            return Err(TaskError::MigrationMarker {
                task: task.id.clone(),
            });
        }

        let name = self.task_name(task);
        if !self.privilege.allowed(&name) {
            return Err(TaskError::NotAllowed { name });
        }

        let address = task
            .ip(&self.settings.ip_order, Some(agent))
            .unwrap_or_default();
        let check_host = if address.is_empty() { agent } else { address.as_str() };

        let tags = self
            .settings
            .task_tags
            .apply(&name, split_tags(task.label(TAGS_LABEL)));

        let prefix = &self.settings.service_id_prefix;
        let registry = self.registry.as_ref();

        let ports = match &task.discovery {
            Discovery::NoPorts => {
                let service = ServiceDefinition {
                    id: task_service_id(prefix, agent, &name, &address),
                    name: name.clone(),
                    address: address.clone(),
                    port: None,
                    tags,
                    check: self.checks.build(task, &CheckVar {
                        host: check_host.to_string(),
                        port: None,
                    }),
                    agent: agent.to_string(),
                };
                decision::apply(registry, &service).await?;
                return Ok(1);
            }
            Discovery::Ports(ports) => ports,
        };

        let mut entries = 0;
        for (index, port) in ports.iter().enumerate() {
            let vars = CheckVar {
                host: check_host.to_string(),
                port: Some(port.number),
            };

            if index == 0 {
                debug!("Registering first port {} of task {} as {}", port.number, task.id, name);
                let service = ServiceDefinition {
                    id: primary_port_service_id(prefix, agent, &name, port.number),
                    name: name.clone(),
                    address: address.clone(),
                    port: Some(port.number),
                    tags: tags.clone(),
                    check: self.checks.build(task, &vars),
                    agent: agent.to_string(),
                };
                decision::apply(registry, &service).await?;
                entries += 1;
            }

            if let Some(port_name) = &port.name {
                let service = ServiceDefinition {
                    id: named_port_service_id(prefix, agent, &name, &address, port.number),
                    name: clean_name(&format!("{name}-{port_name}"), &self.settings.separator),
                    address: address.clone(),
                    port: Some(port.number),
                    tags: named_port_tags(&tags, port_name, port),
                    check: self.checks.build(task, &vars),
                    agent: agent.to_string(),
                };
                debug!("Task {} port {} registers as {}", task.id, port.number, service.name);
                registry.register(&service).await?;
                entries += 1;
            }
        }

        Ok(entries)
    }

    fn task_name(&self, task: &Task) -> String {
        let separator = &self.settings.separator;
        match task.label(OVERRIDE_NAME_LABEL) {
            Some(name) => {
                debug!("Task {} overrides its name to {}", task.id, name);
                clean_name(name, separator)
            }
            None => clean_name(&task.id, separator),
        }
    }
}

/// Base tags, then the port name, then the port's own tags.
fn named_port_tags(base: &[String], port_name: &str, port: &DiscoveryPort) -> Vec<String> {
    let mut tags = base.to_vec();
    push_unique(&mut tags, port_name);
    for tag in split_tags(port.label(TAGS_LABEL)) {
        push_unique(&mut tags, &tag);
    }
    tags
}
