//! Error types shared by the reconciliation engine and its collaborators.

use thiserror::Error;

/// Failures talking to the service registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("request to consul agent {agent} failed: {source}")]
    Http {
        agent: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("consul agent {agent} answered {status} for {path}")]
    Status {
        agent: String,
        status: u16,
        path: String,
    },
}

/// Failures fetching cluster state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("request to master {master} failed: {source}")]
    Http {
        master: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("master {master} answered {status}")]
    Status { master: String, status: u16 },

    #[error("none of the {tried} configured masters answered")]
    NoMasterReachable { tried: usize },

    #[error("master reported malformed leader pid {pid:?}")]
    MalformedPid { pid: String },
}

/// Reasons a single task is not registered.
///
/// `MigrationMarker` and `NotAllowed` are local to one task and never abort a
/// cycle. `Registry` carries a registry failure up to the cycle driver.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {task} carries the migration label")]
    MigrationMarker { task: String },

    #[error("task {name} is not allowed to be registered")]
    NotAllowed { name: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl TaskError {
    /// True for conditions that skip the task but leave the cycle running.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::MigrationMarker { .. } | Self::NotAllowed { .. })
    }
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("separator {separator:?} may only contain lowercase ASCII letters, digits or '-'")]
    InvalidSeparator { separator: String },

    #[error("at least one mesos master must be configured")]
    NoMasters,

    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("task tag rule {rule:?} is not of the form pattern:tag[,tag...]")]
    InvalidTaskTag { rule: String },

    #[error("invalid task name pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
