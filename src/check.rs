//! Health checks for task entries.

use crate::registry::Check;
use crate::state::Task;

const DEFAULT_INTERVAL: &str = "10s";

/// Host and port a task check should probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckVar {
    pub host: String,
    pub port: Option<u16>,
}

/// Builds the health check attached to a task entry.
pub trait CheckBuilder: Send + Sync {
    fn build(&self, task: &Task, vars: &CheckVar) -> Check;
}

/// Derives checks from task labels.
///
/// Recognised keys (case-insensitive): `check_http`, `check_tcp`,
/// `check_script`, `check_ttl`, `check_interval`, `check_timeout`. Values may
/// reference `{host}` and `{port}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelCheckBuilder;

impl CheckBuilder for LabelCheckBuilder {
    fn build(&self, task: &Task, vars: &CheckVar) -> Check {
        let port = vars.port.map(|p| p.to_string()).unwrap_or_default();
        let expand = |value: &str| value.replace("{host}", &vars.host).replace("{port}", &port);

        let mut check = Check::default();
        for label in &task.labels {
            let value = Some(expand(&label.value));
            match label.key.to_lowercase().as_str() {
                "check_http" if check.http.is_none() => check.http = value,
                "check_tcp" if check.tcp.is_none() => check.tcp = value,
                "check_script" if check.args.is_none() => {
                    check.args = value.map(|v| v.split_whitespace().map(str::to_string).collect())
                }
                "check_ttl" if check.ttl.is_none() => check.ttl = value,
                "check_interval" if check.interval.is_none() => check.interval = value,
                "check_timeout" if check.timeout.is_none() => check.timeout = value,
                _ => {}
            }
        }

        let probes = check.http.is_some() || check.tcp.is_some() || check.args.is_some();
        if probes && check.interval.is_none() {
            check.interval = Some(DEFAULT_INTERVAL.to_string());
        }
        check
    }
}
