//! Core configuration: the timing thresholds and capacity limits every component in this
//! crate is built against. Built once at startup by the `control_plane` binary crate and
//! threaded through every component constructor (no global state, per `SPEC_FULL.md` §9).

use serde::{Deserialize, Serialize};

fn default_max_servers_per_host() -> usize {
    6
}

fn default_max_servers_in_master() -> usize {
    4
}

fn default_server_capacity() -> u32 {
    8
}

fn default_base_port() -> u16 {
    9000
}

fn default_private_port_range_start() -> u16 {
    20000
}

fn default_private_port_range_end() -> u16 {
    30000
}

fn default_t_inactive_secs() -> u64 {
    120
}

fn default_t_stale_secs() -> u64 {
    180
}

fn default_t_host_idle_secs() -> u64 {
    15
}

fn default_t_server_idle_secs() -> u64 {
    15
}

fn default_t_save_stale_secs() -> u64 {
    30
}

fn default_t_drain_secs() -> u64 {
    30
}

fn default_monitor_interval_secs() -> u64 {
    30
}

fn default_provision_poll_interval_secs() -> u64 {
    5
}

fn default_provision_wait_secs() -> u64 {
    90
}

fn default_spawn_warmup_secs() -> u64 {
    3
}

fn default_private_subscription_days() -> u64 {
    30
}

/// Timing thresholds and capacity limits for the registry, the matchmaker and the lifecycle
/// monitor. Every field has the source's historical default, except `max_servers_in_master`
/// and `server_idle_secs`, resolved per the two Open Questions recorded in `DESIGN.md`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneConfig {
    #[serde(default = "default_max_servers_per_host")]
    pub max_servers_per_host: usize,

    /// Previously shared the same environment variable as `max_servers_per_host`; split into
    /// its own field. See `DESIGN.md`.
    #[serde(default = "default_max_servers_in_master")]
    pub max_servers_in_master: usize,

    /// A single game-server process's player capacity; the matchmaker's best-fit step reserves
    /// two slots (`capacity - 2`) to protect against a double-join race at `capacity - 1`.
    #[serde(default = "default_server_capacity")]
    pub server_capacity: u32,

    #[serde(default = "default_base_port")]
    pub base_port: u16,

    #[serde(default = "default_private_port_range_start")]
    pub private_port_range_start: u16,
    #[serde(default = "default_private_port_range_end")]
    pub private_port_range_end: u16,

    /// Host monitor: missing heartbeat past this is marked inactive.
    #[serde(default = "default_t_inactive_secs")]
    pub host_inactive_secs: u64,
    /// Host monitor: missing heartbeat past this triggers full cleanup.
    #[serde(default = "default_t_stale_secs")]
    pub host_stale_secs: u64,
    /// Host monitor: a host empty for longer than this is gracefully shut down.
    #[serde(default = "default_t_host_idle_secs")]
    pub host_idle_secs: u64,

    /// Master-server monitor: a server empty for longer than this is stopped. Made
    /// configurable per the Open Question in `SPEC_FULL.md` §9 (the source hardcodes 15s).
    #[serde(default = "default_t_server_idle_secs")]
    pub server_idle_secs: u64,
    /// Master-server monitor: a server missing heartbeats past this is removed outright.
    #[serde(default = "default_t_stale_secs")]
    pub server_stale_secs: u64,

    #[serde(default = "default_t_save_stale_secs")]
    pub save_stale_secs: u64,
    #[serde(default = "default_t_drain_secs")]
    pub drain_secs: u64,

    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    #[serde(default = "default_provision_poll_interval_secs")]
    pub provision_poll_interval_secs: u64,
    #[serde(default = "default_provision_wait_secs")]
    pub provision_wait_secs: u64,

    #[serde(default = "default_spawn_warmup_secs")]
    pub spawn_warmup_secs: u64,

    #[serde(default = "default_private_subscription_days")]
    pub private_subscription_days: u64,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            max_servers_per_host: default_max_servers_per_host(),
            max_servers_in_master: default_max_servers_in_master(),
            server_capacity: default_server_capacity(),
            base_port: default_base_port(),
            private_port_range_start: default_private_port_range_start(),
            private_port_range_end: default_private_port_range_end(),
            host_inactive_secs: default_t_inactive_secs(),
            host_stale_secs: default_t_stale_secs(),
            host_idle_secs: default_t_host_idle_secs(),
            server_idle_secs: default_t_server_idle_secs(),
            server_stale_secs: default_t_stale_secs(),
            save_stale_secs: default_t_save_stale_secs(),
            drain_secs: default_t_drain_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            provision_poll_interval_secs: default_provision_poll_interval_secs(),
            provision_wait_secs: default_provision_wait_secs(),
            spawn_warmup_secs: default_spawn_warmup_secs(),
            private_subscription_days: default_private_subscription_days(),
        }
    }
}

impl ControlPlaneConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_servers_per_host == 0 {
            return Err("max_servers_per_host must be greater than zero".into());
        }
        if self.max_servers_in_master == 0 {
            return Err("max_servers_in_master must be greater than zero".into());
        }
        if self.server_capacity < 2 {
            return Err("server_capacity must be at least 2 to honor the reserve-slot rule".into());
        }
        if self.private_port_range_start >= self.private_port_range_end {
            return Err("private_port_range_start must be less than private_port_range_end".into());
        }
        if self.host_idle_secs == 0 || self.server_idle_secs == 0 {
            return Err("idle grace periods must be greater than zero".into());
        }
        if self.provision_wait_secs == 0 {
            return Err("provision_wait_secs must be greater than zero".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_spec_values() {
        let cfg = ControlPlaneConfig::default();
        assert_eq!(cfg.max_servers_per_host, 6);
        assert_eq!(cfg.max_servers_in_master, 4);
        assert_eq!(cfg.host_inactive_secs, 120);
        assert_eq!(cfg.host_stale_secs, 180);
        assert_eq!(cfg.server_idle_secs, 15);
    }

    #[test]
    fn defaults_validate_cleanly() {
        assert!(ControlPlaneConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut cfg = ControlPlaneConfig::default();
        cfg.max_servers_per_host = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_private_port_range_is_rejected() {
        let mut cfg = ControlPlaneConfig::default();
        cfg.private_port_range_start = 500;
        cfg.private_port_range_end = 100;
        assert!(cfg.validate().is_err());
    }
}
