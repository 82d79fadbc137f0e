//! `AgentConfig`: loaded from a TOML file created with documented defaults on first run,
//! then overridden by CLI flags (`SPEC_FULL.md` §10.2).

use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_bind_address() -> String {
    "0.0.0.0:7000".to_string()
}

fn default_base_port() -> u16 {
    9000
}

fn default_max_servers_per_host() -> usize {
    6
}

fn default_binary_path() -> String {
    "/opt/worker_agent/game_server".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

fn default_heartbeat_failure_limit() -> u32 {
    6
}

fn default_spawn_warmup_secs() -> u64 {
    3
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_drain_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Assigned by the bootstrap script at launch; stable for the process lifetime.
    pub host_id: String,
    pub control_plane_url: String,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_max_servers_per_host")]
    pub max_servers_per_host: usize,

    #[serde(default = "default_binary_path")]
    pub binary_path: String,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_failure_limit")]
    pub heartbeat_failure_limit: u32,

    #[serde(default = "default_spawn_warmup_secs")]
    pub spawn_warmup_secs: u64,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_drain_secs")]
    pub drain_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            host_id: "unassigned".to_string(),
            control_plane_url: "http://127.0.0.1:8080".to_string(),
            bind_address: default_bind_address(),
            base_port: default_base_port(),
            max_servers_per_host: default_max_servers_per_host(),
            binary_path: default_binary_path(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_failure_limit: default_heartbeat_failure_limit(),
            spawn_warmup_secs: default_spawn_warmup_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            drain_secs: default_drain_secs(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl AgentConfig {
    /// Loads `path`, creating a default file (serialized with documented defaults) if it does
    /// not yet exist.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            let default_config = Self::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            return Ok(default_config);
        }

        let contents = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("invalid bind address: {}", self.bind_address));
        }
        if self.max_servers_per_host == 0 {
            return Err("max_servers_per_host must be greater than zero".into());
        }
        if self.binary_path.trim().is_empty() {
            return Err("binary_path must not be empty".into());
        }
        if self.heartbeat_interval_secs == 0 {
            return Err("heartbeat_interval_secs must be greater than zero".into());
        }
        if self.heartbeat_failure_limit == 0 {
            return Err("heartbeat_failure_limit must be greater than zero".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn creates_a_default_file_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        let config = AgentConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.base_port, 9000);
    }

    #[test]
    fn default_config_validates_cleanly() {
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_unparsable_bind_address() {
        let mut config = AgentConfig::default();
        config.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_binary_path() {
        let mut config = AgentConfig::default();
        config.binary_path = "   ".to_string();
        assert!(config.validate().is_err());
    }
}
