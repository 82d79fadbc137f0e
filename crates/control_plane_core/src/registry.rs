//! The Host Registry: the single shared authoritative view of worker hosts and their server
//! tables (`SPEC_FULL.md` §4.3). One asynchronous lock guards the whole map; every method here
//! acquires it for the duration of a single, finite, non-blocking mutation or read and releases
//! it before returning, matching the no-I/O-under-lock rule in §5.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use control_plane_common::{now_unix, Host, HostId, HostStatus, Server, ServerStatus, ServerUid};

use crate::config::ControlPlaneConfig;

/// The result of folding a heartbeat into the registry: which uids were newly seen and which
/// were present before this heartbeat but are now gone (and so need their player bindings
/// cleared by the caller, after the lock is released).
#[derive(Debug, Default, Clone)]
pub struct HeartbeatDiff {
    pub added: Vec<ServerUid>,
    pub removed: Vec<ServerUid>,
    pub transitioned_to_active: bool,
}

/// A host + the uid of a server that just appeared on it for the first time, used to wake a
/// matchmaker provisioning wait (`SPEC_FULL.md` §4.4 step 6, §9's notification-over-polling note).
#[derive(Debug, Clone)]
pub struct ServerPublished {
    pub host_id: HostId,
    pub uid: ServerUid,
}

struct Inner {
    hosts: IndexMap<HostId, Host>,
}

/// In-memory worker host table, shared via `Arc` across the matchmaker, the lifecycle monitor
/// and the HTTP front adapter.
pub struct HostRegistry {
    inner: RwLock<Inner>,
    /// Fired whenever a heartbeat publishes a server on a host that previously had none of its
    /// own; the matchmaker's provisioning wait subscribes to this instead of pure polling.
    publish_notify: Notify,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner { hosts: IndexMap::new() }),
            publish_notify: Notify::new(),
        }
    }

    /// Registers the control plane's own host. Call once at startup.
    pub async fn register_master(&self, address: String) {
        let mut inner = self.inner.write().await;
        inner.hosts.insert(HostId::master(), Host::new_master(address));
    }

    /// Registers a newly provisioned host in `provisioning` status, before its first heartbeat.
    pub async fn register_provisioning_host(&self, host_id: HostId, address: String, resource_id: Option<String>) {
        let mut inner = self.inner.write().await;
        inner
            .hosts
            .insert(host_id.clone(), Host::new_provisioning(host_id, address, resource_id));
    }

    pub async fn get(&self, host_id: &HostId) -> Option<Host> {
        self.inner.read().await.hosts.get(host_id).cloned()
    }

    pub async fn host_count(&self) -> usize {
        self.inner.read().await.hosts.len()
    }

    /// Every known host regardless of status, in registration order. Used by the health check
    /// and by diagnostics; matchmaking and lifecycle code use the more targeted queries above.
    pub async fn all_hosts(&self) -> Vec<Host> {
        self.inner.read().await.hosts.values().cloned().collect()
    }

    /// Active hosts, in registration order, master first logically excluded by the caller where
    /// needed (the matchmaker's "remote hosts" step filters `is_master` itself).
    pub async fn active_hosts_in_registration_order(&self) -> Vec<Host> {
        self.inner
            .read()
            .await
            .hosts
            .values()
            .filter(|h| h.status == HostStatus::Active)
            .cloned()
            .collect()
    }

    /// Folds a heartbeat into the host's server table: upserts the host, flips
    /// `provisioning -> active` on first heartbeat, diffs the uid set (additive + remove-missing)
    /// and recomputes `empty_since`. Idempotent: replaying the same snapshot twice leaves the
    /// registry unchanged (invariant tested in `tests` below).
    pub async fn apply_heartbeat(
        &self,
        host_id: &HostId,
        snapshots: Vec<control_plane_common::ServerSnapshot>,
    ) -> Option<HeartbeatDiff> {
        let now = now_unix();
        let mut inner = self.inner.write().await;
        let Some(host) = inner.hosts.get_mut(host_id) else {
            warn!(%host_id, "heartbeat from unregistered host, dropping");
            return None;
        };

        let mut diff = HeartbeatDiff::default();
        if host.status == HostStatus::Provisioning {
            host.status = HostStatus::Active;
            diff.transitioned_to_active = true;
            info!(%host_id, "host transitioned provisioning -> active on first heartbeat");
        } else if host.status == HostStatus::Inactive {
            host.status = HostStatus::Active;
            info!(%host_id, "host transitioned inactive -> active, heartbeat resumed");
        }
        host.last_heartbeat = now;

        let incoming_uids: HashSet<ServerUid> = snapshots.iter().map(|s| s.uid.clone()).collect();
        for existing_uid in host.servers.keys().cloned().collect::<Vec<_>>() {
            if !incoming_uids.contains(&existing_uid) {
                diff.removed.push(existing_uid);
            }
        }
        for uid in &diff.removed {
            host.servers.remove(uid);
        }

        let had_any_server_before = !host.servers.is_empty() || !diff.removed.is_empty();
        for snapshot in snapshots {
            let is_new = !host.servers.contains_key(&snapshot.uid);
            if is_new {
                diff.added.push(snapshot.uid.clone());
            }
            let empty_since = host
                .servers
                .get(&snapshot.uid)
                .and_then(|s| s.empty_since)
                .filter(|_| snapshot.player_count == 0);
            let empty_since = if snapshot.player_count == 0 {
                empty_since.or(Some(now))
            } else {
                None
            };
            host.servers.insert(
                snapshot.uid.clone(),
                Server {
                    uid: snapshot.uid,
                    port: snapshot.port,
                    player_count: snapshot.player_count,
                    status: snapshot.status,
                    last_heartbeat: now,
                    empty_since,
                    owner_id: snapshot.owner_id,
                },
            );
        }

        // empty_since tracks the host as a whole: unset the instant any server is nonzero.
        if host.servers.values().any(|s| s.player_count > 0) {
            host.empty_since = None;
        } else if !host.servers.is_empty() || had_any_server_before {
            host.empty_since.get_or_insert(now);
        }

        if !diff.added.is_empty() {
            debug!(%host_id, added = ?diff.added, "heartbeat published new servers");
            drop(inner);
            self.publish_notify.notify_waiters();
            return Some(diff);
        }

        Some(diff)
    }

    /// Waits until any host publishes a new server, or `timeout` elapses. Used by the
    /// matchmaker's provisioning wait so it does not have to busy-poll every tick.
    pub async fn wait_for_publish(&self, timeout: std::time::Duration) {
        let _ = tokio::time::timeout(timeout, self.publish_notify.notified()).await;
    }

    /// Scans active hosts for a server owned by `user_id`. Step 2 of the matchmaker.
    pub async fn find_private_server(&self, user_id: u64) -> Option<(HostId, ServerUid)> {
        let inner = self.inner.read().await;
        for host in inner.hosts.values() {
            if host.status != HostStatus::Active {
                continue;
            }
            for server in host.servers.values() {
                if server.owner_id == Some(user_id) && server.is_selectable() {
                    return Some((host.id.clone(), server.uid.clone()));
                }
            }
        }
        None
    }

    /// Selects the server with the lowest player count across active hosts among public,
    /// selectable servers with `player_count <= capacity - 2`, breaking ties by host id then
    /// uid. Step 3 of the matchmaker.
    pub async fn find_best_public_server(&self, capacity: u32) -> Option<(HostId, ServerUid, u32)> {
        let reserve_limit = capacity.saturating_sub(2);
        let inner = self.inner.read().await;
        let mut best: Option<(HostId, ServerUid, u32)> = None;
        for host in inner.hosts.values() {
            if host.status != HostStatus::Active {
                continue;
            }
            for server in host.servers.values() {
                if server.is_private() || !server.is_selectable() {
                    continue;
                }
                if server.player_count > reserve_limit {
                    continue;
                }
                let candidate = (host.id.clone(), server.uid.clone(), server.player_count);
                best = Some(match best {
                    None => candidate,
                    Some(current) => {
                        if candidate.2 < current.2
                            || (candidate.2 == current.2
                                && (candidate.0.clone(), candidate.1.clone()) < (current.0.clone(), current.1.clone()))
                        {
                            candidate
                        } else {
                            current
                        }
                    }
                });
            }
        }
        best
    }

    pub async fn master_server_count(&self) -> usize {
        self.inner
            .read()
            .await
            .hosts
            .get(&HostId::master())
            .map(|h| h.servers.len())
            .unwrap_or(0)
    }

    /// Records a server that was just asked to spawn, in `starting` status, ahead of its first
    /// heartbeat confirmation. Used by the matchmaker immediately after a successful spawn RPC
    /// so a racing request a moment later sees the reservation.
    pub async fn record_starting_server(&self, host_id: &HostId, server: Server) {
        let mut inner = self.inner.write().await;
        if let Some(host) = inner.hosts.get_mut(host_id) {
            host.servers.insert(server.uid.clone(), server);
        }
    }

    /// Builds the removal list for the host monitor without holding the lock past this call.
    /// See `SPEC_FULL.md` §4.5's serializing rule: lock only to decide, I/O after release.
    pub async fn hosts_needing_attention(&self, cfg: &ControlPlaneConfig) -> Vec<HostMonitorAction> {
        let now = now_unix();
        let inner = self.inner.read().await;
        let mut actions = Vec::new();
        for host in inner.hosts.values() {
            if host.is_master {
                continue;
            }
            let since_heartbeat = now.saturating_sub(host.last_heartbeat);
            if since_heartbeat > cfg.host_stale_secs {
                actions.push(HostMonitorAction::Cleanup(host.clone()));
                continue;
            }
            if since_heartbeat > cfg.host_inactive_secs && host.status == HostStatus::Active {
                actions.push(HostMonitorAction::MarkInactive(host.id.clone()));
            }
            if !host.servers.is_empty() && host.servers.values().all(|s| s.player_count == 0) {
                if let Some(empty_since) = host.empty_since {
                    if now.saturating_sub(empty_since) > cfg.host_idle_secs {
                        actions.push(HostMonitorAction::GracefulShutdown(host.clone()));
                    }
                }
            }
        }
        actions
    }

    pub async fn mark_inactive(&self, host_id: &HostId) {
        let mut inner = self.inner.write().await;
        if let Some(host) = inner.hosts.get_mut(host_id) {
            host.status = HostStatus::Inactive;
        }
    }

    pub async fn remove_host(&self, host_id: &HostId) -> Option<Host> {
        let mut inner = self.inner.write().await;
        inner.hosts.shift_remove(host_id)
    }

    /// Master-server monitor: builds the removal list for the master host's own server table.
    pub async fn master_servers_needing_removal(&self, cfg: &ControlPlaneConfig) -> Vec<ServerUid> {
        let now = now_unix();
        let inner = self.inner.read().await;
        let Some(master) = inner.hosts.get(&HostId::master()) else {
            return Vec::new();
        };
        let mut removals = Vec::new();
        for server in master.servers.values() {
            let since_heartbeat = now.saturating_sub(server.last_heartbeat);
            if since_heartbeat > cfg.server_stale_secs {
                removals.push(server.uid.clone());
                continue;
            }
            if let Some(empty_since) = server.empty_since {
                if server.player_count == 0 && now.saturating_sub(empty_since) > cfg.server_idle_secs {
                    removals.push(server.uid.clone());
                }
            }
        }
        removals
    }

    pub async fn remove_server(&self, host_id: &HostId, uid: &ServerUid) {
        let mut inner = self.inner.write().await;
        if let Some(host) = inner.hosts.get_mut(host_id) {
            host.servers.remove(uid);
        }
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// An action the host monitor decided on, to be carried out off-lock by the caller.
#[derive(Debug, Clone)]
pub enum HostMonitorAction {
    MarkInactive(HostId),
    GracefulShutdown(Host),
    Cleanup(Host),
}

pub type SharedRegistry = Arc<HostRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use control_plane_common::ServerSnapshot;

    fn snapshot(uid: &str, port: u16, players: u32) -> ServerSnapshot {
        ServerSnapshot {
            uid: uid.to_string().into(),
            port,
            player_count: players,
            status: ServerStatus::Running,
            owner_id: None,
            private: false,
        }
    }

    #[tokio::test]
    async fn heartbeat_on_unregistered_host_is_dropped() {
        let registry = HostRegistry::new();
        let diff = registry.apply_heartbeat(&HostId::from("ghost"), vec![]).await;
        assert!(diff.is_none());
    }

    #[tokio::test]
    async fn first_heartbeat_transitions_provisioning_to_active() {
        let registry = HostRegistry::new();
        let host_id = HostId::from("worker-1");
        registry.register_provisioning_host(host_id.clone(), "10.0.0.1:9000".into(), Some("res-1".into())).await;

        let diff = registry.apply_heartbeat(&host_id, vec![snapshot("worker-1-9000", 9000, 0)]).await.unwrap();
        assert!(diff.transitioned_to_active);
        assert_eq!(diff.added, vec![ServerUid::from("worker-1-9000".to_string())]);

        let host = registry.get(&host_id).await.unwrap();
        assert_eq!(host.status, HostStatus::Active);
    }

    #[tokio::test]
    async fn heartbeat_diffing_is_additive_and_removes_missing() {
        let registry = HostRegistry::new();
        let host_id = HostId::from("worker-1");
        registry.register_provisioning_host(host_id.clone(), "addr".into(), None).await;

        registry
            .apply_heartbeat(&host_id, vec![snapshot("a", 1, 1), snapshot("b", 2, 0)])
            .await;
        let diff = registry.apply_heartbeat(&host_id, vec![snapshot("a", 1, 2)]).await.unwrap();
        assert_eq!(diff.removed, vec![ServerUid::from("b".to_string())]);

        let host = registry.get(&host_id).await.unwrap();
        assert_eq!(host.servers.len(), 1);
        assert_eq!(host.total_players(), 2);
    }

    #[tokio::test]
    async fn replaying_the_same_heartbeat_is_idempotent() {
        let registry = HostRegistry::new();
        let host_id = HostId::from("worker-1");
        registry.register_provisioning_host(host_id.clone(), "addr".into(), None).await;

        let snaps = vec![snapshot("a", 1, 3)];
        registry.apply_heartbeat(&host_id, snaps.clone()).await;
        let before = registry.get(&host_id).await.unwrap();
        registry.apply_heartbeat(&host_id, snaps).await;
        let after = registry.get(&host_id).await.unwrap();

        assert_eq!(before.servers.len(), after.servers.len());
        assert_eq!(before.total_players(), after.total_players());
    }

    #[tokio::test]
    async fn empty_since_is_not_set_for_a_host_with_no_servers() {
        let registry = HostRegistry::new();
        let host_id = HostId::from("worker-1");
        registry.register_provisioning_host(host_id.clone(), "addr".into(), None).await;
        registry.apply_heartbeat(&host_id, vec![]).await;
        let host = registry.get(&host_id).await.unwrap();
        assert!(host.empty_since.is_none());
    }

    #[tokio::test]
    async fn empty_since_clears_when_a_player_joins() {
        let registry = HostRegistry::new();
        let host_id = HostId::from("worker-1");
        registry.register_provisioning_host(host_id.clone(), "addr".into(), None).await;
        registry.apply_heartbeat(&host_id, vec![snapshot("a", 1, 0)]).await;
        assert!(registry.get(&host_id).await.unwrap().empty_since.is_some());

        registry.apply_heartbeat(&host_id, vec![snapshot("a", 1, 4)]).await;
        assert!(registry.get(&host_id).await.unwrap().empty_since.is_none());
    }

    #[tokio::test]
    async fn best_public_fit_honors_the_capacity_minus_two_reserve() {
        let registry = HostRegistry::new();
        registry.register_master("127.0.0.1:9000".into()).await;
        registry
            .apply_heartbeat(&HostId::master(), vec![snapshot("master-9000", 9000, 7)])
            .await;

        // capacity 8: 7 players exceeds capacity-2=6, must be skipped.
        assert!(registry.find_best_public_server(8).await.is_none());

        registry
            .apply_heartbeat(&HostId::master(), vec![snapshot("master-9000", 9000, 6)])
            .await;
        let picked = registry.find_best_public_server(8).await;
        assert_eq!(picked.map(|(_, uid, _)| uid), Some(ServerUid::from("master-9000".to_string())));
    }

    #[tokio::test]
    async fn private_server_lookup_only_matches_its_owner() {
        let registry = HostRegistry::new();
        registry.register_master("addr".into()).await;
        registry
            .apply_heartbeat(
                &HostId::master(),
                vec![ServerSnapshot {
                    uid: "private_7_master".to_string().into(),
                    port: 20000,
                    player_count: 1,
                    status: ServerStatus::Running,
                    owner_id: Some(7),
                    private: true,
                }],
            )
            .await;

        assert!(registry.find_private_server(7).await.is_some());
        assert!(registry.find_private_server(8).await.is_none());
    }
}
