//! The shared data model: hosts, servers, and the heartbeat wire shape that rewrites them.
//!
//! These types are intentionally plain and serializable so they can cross the wire between
//! the worker agent and the control plane unchanged, and so tests can construct them directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The reserved id naming the control plane's own host. Never reaped by the lifecycle monitor.
pub const MASTER_HOST_ID: &str = "master";

/// An opaque worker host identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub String);

impl HostId {
    pub fn master() -> Self {
        Self(MASTER_HOST_ID.to_string())
    }

    pub fn is_master(&self) -> bool {
        self.0 == MASTER_HOST_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for HostId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for HostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A server uid, unique within its host's server table.
///
/// Convention: `"<host-id>-<port>"` for public servers, `"private_<user-id>_<host-id>"` for
/// private ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerUid(pub String);

impl ServerUid {
    pub fn public(host_id: &HostId, port: u16) -> Self {
        Self(format!("{}-{}", host_id.0, port))
    }

    pub fn private(user_id: u64, host_id: &HostId) -> Self {
        Self(format!("private_{}_{}", user_id, host_id.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ServerUid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Provisioning,
    Active,
    Inactive,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Starting,
    Running,
    Stopping,
    Dead,
}

/// A worker host as tracked by the Host Registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub address: String,
    /// Cloud-resource id; absent for the master host, which is not provisioned by us.
    pub resource_id: Option<String>,
    pub status: HostStatus,
    pub created_at: u64,
    pub last_heartbeat: u64,
    /// Set the instant every server on this host reads zero players; cleared the instant any
    /// server reports a nonzero count.
    pub empty_since: Option<u64>,
    pub is_master: bool,
    pub servers: std::collections::BTreeMap<ServerUid, Server>,
}

impl Host {
    pub fn new_master(address: String) -> Self {
        let now = crate::time::now_unix();
        Self {
            id: HostId::master(),
            address,
            resource_id: None,
            status: HostStatus::Active,
            created_at: now,
            last_heartbeat: now,
            empty_since: None,
            is_master: true,
            servers: Default::default(),
        }
    }

    pub fn new_provisioning(id: HostId, address: String, resource_id: Option<String>) -> Self {
        let now = crate::time::now_unix();
        Self {
            id,
            address,
            resource_id,
            status: HostStatus::Provisioning,
            created_at: now,
            last_heartbeat: now,
            empty_since: None,
            is_master: false,
            servers: Default::default(),
        }
    }

    pub fn total_players(&self) -> u32 {
        self.servers.values().map(|s| s.player_count).sum()
    }

    pub fn has_capacity_for_master_slot(&self, max_servers_in_master: usize) -> bool {
        self.servers.len() < max_servers_in_master
    }

    pub fn has_capacity(&self, max_servers_per_host: usize) -> bool {
        self.servers.len() < max_servers_per_host
    }
}

/// A game-server process as tracked by its owning host's server table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub uid: ServerUid,
    pub port: u16,
    pub player_count: u32,
    pub status: ServerStatus,
    pub last_heartbeat: u64,
    pub empty_since: Option<u64>,
    /// Non-null iff private; constant for the server's lifetime (invariant 4).
    pub owner_id: Option<u64>,
}

impl Server {
    pub fn is_private(&self) -> bool {
        self.owner_id.is_some()
    }

    pub fn is_selectable(&self) -> bool {
        matches!(self.status, ServerStatus::Starting | ServerStatus::Running)
    }
}

/// One server's view as reported inside a heartbeat; the wire shape, not the registry's own
/// `Server`. Deliberately explicit and rejecting of absent fields (see `SPEC_FULL.md` §9 on
/// duck-typed heartbeat payloads).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSnapshot {
    pub uid: ServerUid,
    pub port: u16,
    pub player_count: u32,
    pub status: ServerStatus,
    #[serde(default)]
    pub owner_id: Option<u64>,
    #[serde(default)]
    pub private: bool,
}

/// Heartbeat RPC request, agent -> control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub host_id: HostId,
    pub servers: Vec<ServerSnapshot>,
    pub timestamp: u64,
    pub total_players: u32,
}

/// Heartbeat RPC response, control plane -> agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: &'static str,
    pub command: Option<HeartbeatCommand>,
}

impl HeartbeatResponse {
    pub fn ok() -> Self {
        Self { status: "ok", command: None }
    }

    pub fn shutdown() -> Self {
        Self { status: "ok", command: Some(HeartbeatCommand::Shutdown) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatCommand {
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_uid_conventions_match_the_spec() {
        let host = HostId::from("host-7");
        assert_eq!(ServerUid::public(&host, 9000).as_str(), "host-7-9000");
        assert_eq!(ServerUid::private(42, &host).as_str(), "private_42_host-7");
    }

    #[test]
    fn master_host_id_is_recognized() {
        assert!(HostId::master().is_master());
        assert!(!HostId::from("worker-1").is_master());
    }

    #[test]
    fn total_players_sums_server_counts() {
        let mut host = Host::new_master("127.0.0.1:9000".into());
        host.servers.insert(
            ServerUid::from("master-9000".to_string()),
            Server {
                uid: "master-9000".to_string().into(),
                port: 9000,
                player_count: 3,
                status: ServerStatus::Running,
                last_heartbeat: 0,
                empty_since: None,
                owner_id: None,
            },
        );
        host.servers.insert(
            ServerUid::from("master-9001".to_string()),
            Server {
                uid: "master-9001".to_string().into(),
                port: 9001,
                player_count: 5,
                status: ServerStatus::Running,
                last_heartbeat: 0,
                empty_since: None,
                owner_id: None,
            },
        );
        assert_eq!(host.total_players(), 8);
    }
}
