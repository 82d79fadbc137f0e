//! `AppConfig`: the control plane's own configuration, layered TOML file + CLI overrides +
//! environment variables (`SPEC_FULL.md` §10.2, §6). Created with documented defaults on first
//! run if the file does not yet exist.

use cloud_provisioner::IaasConfig;
use control_plane_core::security::SecurityConfig;
use control_plane_core::ControlPlaneConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_public_address() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_binary_dir() -> String {
    "./binaries".to_string()
}

fn default_master_agent_address() -> String {
    "127.0.0.1:7000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// The URL baked into every bootstrap script and heartbeat response, so a newly
    /// provisioned host's Worker Agent and the matchmaker agree on where to call back.
    #[serde(default = "default_public_address")]
    pub public_address: String,
    /// Where the game-server binary served by `/download_binary` lives on disk.
    #[serde(default = "default_binary_dir")]
    pub binary_dir: String,
    /// The Worker Agent co-located with this control-plane process, owning the master host's
    /// server table. Pre-registered in the registry at cold start (`SPEC_FULL.md` §4.3).
    #[serde(default = "default_master_agent_address")]
    pub master_agent_address: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_address: default_public_address(),
            binary_dir: default_binary_dir(),
            master_agent_address: default_master_agent_address(),
        }
    }
}

fn default_iaas_api_base_url() -> String {
    "https://iaas.example.invalid".to_string()
}

fn default_vm_image() -> String {
    "game-host-base".to_string()
}

fn default_instance_type() -> String {
    "standard-4".to_string()
}

fn default_location() -> String {
    "us-east-1".to_string()
}

/// Cloud-provisioner settings, folded into an `IaasConfig` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    #[serde(default = "default_iaas_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_vm_image")]
    pub vm_image: String,
    #[serde(default = "default_instance_type")]
    pub instance_type: String,
    #[serde(default = "default_location")]
    pub location: String,
    /// Shared secret the bootstrap script presents to `/download_binary` (§6).
    #[serde(default)]
    pub shared_access_key: String,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_iaas_api_base_url(),
            api_token: String::new(),
            vm_image: default_vm_image(),
            instance_type: default_instance_type(),
            location: default_location(),
            shared_access_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

/// The control plane's top-level configuration: transport, cloud provisioner, security,
/// logging, and the nested timing/capacity thresholds consumed by `control_plane_core`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub cloud: CloudSettings,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
}

impl AppConfig {
    /// Loads `path`, creating a default file with documented defaults if it does not exist.
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
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("invalid bind address: {}", self.server.bind_address));
        }
        if self.server.public_address.trim().is_empty() {
            return Err("public_address must not be empty".into());
        }
        if self.server.binary_dir.trim().is_empty() {
            return Err("binary_dir must not be empty".into());
        }
        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(format!("invalid log level: {}", self.logging.level));
        }
        self.control_plane.validate()?;
        Ok(())
    }

    pub fn to_iaas_config(&self) -> IaasConfig {
        IaasConfig {
            api_base_url: self.cloud.api_base_url.clone(),
            api_token: self.cloud.api_token.clone(),
            vm_image: self.cloud.vm_image.clone(),
            instance_type: self.cloud.instance_type.clone(),
            location: self.cloud.location.clone(),
            control_plane_url: self.server.public_address.clone(),
            shared_access_key: self.cloud.shared_access_key.clone(),
            create_timeout_secs: 60,
            action_poll_interval_secs: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn creates_a_default_file_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("control_plane.toml");
        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unparsable_bind_address() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_invalid_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn delegates_to_nested_control_plane_config_validation() {
        let mut config = AppConfig::default();
        config.control_plane.max_servers_per_host = 0;
        assert!(config.validate().is_err());
    }
}
