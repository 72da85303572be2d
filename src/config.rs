use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::naming::is_valid_separator;
use crate::privilege::RegexPrivilege;
use crate::state::IpSource;
use crate::tags::TaskTagRules;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Mesos master addresses as `host:port`.
    pub masters: Vec<String>,
    pub consul_port: u16,
    pub consul_scheme: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consul_token: Option<String>,
    pub refresh_secs: u64,
    pub request_timeout_secs: u64,
    pub service_name: String,
    pub service_id_prefix: String,
    pub separator: String,
    /// Suffixes appended to host role tags as `role.suffix`.
    pub service_tags: Vec<String>,
    /// Task tag rules, each `pattern:tag1,tag2`.
    pub task_tags: Vec<String>,
    pub ip_order: Vec<IpSource>,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    /// Log registrations instead of sending them to Consul.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            masters: vec!["127.0.0.1:5050".into()],
            consul_port: 8500,
            consul_scheme: "http".into(),
            consul_token: None,
            refresh_secs: 60,
            request_timeout_secs: 10,
            service_name: "mesos".into(),
            service_id_prefix: "mesos-consul".into(),
            separator: "-".into(),
            service_tags: Vec::new(),
            task_tags: Vec::new(),
            ip_order: vec![
                IpSource::Docker,
                IpSource::Netinfo,
                IpSource::Mesos,
                IpSource::Host,
            ],
            whitelist: Vec::new(),
            blacklist: Vec::new(),
            dry_run: false,
        }
    }
}

impl Config {
    /// Defaults, then `mesos-consul.toml`, `mesos-consul.json` and
    /// `MESOS_CONSUL_*` variables.
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("mesos-consul.toml"))
            .merge(Json::file("mesos-consul.json"))
            .merge(Env::prefixed("MESOS_CONSUL_"))
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(Self::figment())
    }

    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(token_file) = std::env::var("MESOS_CONSUL_CONSUL_TOKEN_FILE") {
            config.consul_token = Some(std::fs::read_to_string(token_file)?.trim().to_string());
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.masters.is_empty() {
            return Err(ConfigError::NoMasters);
        }
        if !is_valid_separator(&self.separator) {
            return Err(ConfigError::InvalidSeparator {
                separator: self.separator.clone(),
            });
        }
        if self.service_name.is_empty() {
            return Err(ConfigError::Empty {
                field: "service_name",
            });
        }
        if self.service_id_prefix.is_empty() {
            return Err(ConfigError::Empty {
                field: "service_id_prefix",
            });
        }
        if self.ip_order.is_empty() {
            return Err(ConfigError::Empty { field: "ip_order" });
        }
        if self.refresh_secs == 0 {
            return Err(ConfigError::Zero {
                field: "refresh_secs",
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Zero {
                field: "request_timeout_secs",
            });
        }
        TaskTagRules::parse(&self.task_tags)?;
        RegexPrivilege::new(&self.whitelist, &self.blacklist)?;
        Ok(())
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
