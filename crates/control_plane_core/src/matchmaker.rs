//! The Matchmaker: the 6-step request-dispatch decision order (`SPEC_FULL.md` §4.4).

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use control_plane_common::{
    ControlPlaneError, Host, HostId, PlayerDataStore, Result, Server, ServerStatus, ServerUid,
};

use crate::agent_client::{AgentClient, SpawnServerRequest};
use crate::broadcast::BroadcastBus;
use crate::config::ControlPlaneConfig;
use crate::provisioner::CloudProvisioner;
use crate::registry::HostRegistry;
use crate::save_barrier::SaveBarrier;

#[derive(Debug, Clone, serde::Serialize)]
pub struct MatchResult {
    pub uid: ServerUid,
    pub address: String,
    pub port: u16,
    pub host_id: HostId,
    pub private: bool,
}

pub struct Matchmaker {
    registry: Arc<HostRegistry>,
    player_data: Arc<dyn PlayerDataStore>,
    provisioner: Arc<dyn CloudProvisioner>,
    agent_client: AgentClient,
    broadcast: Arc<BroadcastBus>,
    config: Arc<ControlPlaneConfig>,
    save_barrier: Arc<SaveBarrier>,
}

impl Matchmaker {
    pub fn new(
        registry: Arc<HostRegistry>,
        player_data: Arc<dyn PlayerDataStore>,
        provisioner: Arc<dyn CloudProvisioner>,
        agent_client: AgentClient,
        broadcast: Arc<BroadcastBus>,
        config: Arc<ControlPlaneConfig>,
        save_barrier: Arc<SaveBarrier>,
    ) -> Self {
        Self {
            registry,
            player_data,
            provisioner,
            agent_client,
            broadcast,
            config,
            save_barrier,
        }
    }

    /// Runs the 6-step decision order for `user_id`, in order, first match wins.
    pub async fn request_server(&self, user_id: u64) -> Result<MatchResult> {
        // Step 1: maintenance check.
        if self.broadcast.is_maintenance_mode() {
            return Err(ControlPlaneError::MaintenanceMode);
        }

        // Step 2: private binding.
        if self.player_data.is_private_subscription_active(user_id).await {
            if let Some((host_id, uid)) = self.registry.find_private_server(user_id).await {
                return self.bind_and_return(user_id, host_id, uid, true).await;
            }
            // No matching server found despite an active subscription: fall through so the
            // caller can retry once a background path re-creates it.
        }

        // Step 3: best public fit.
        if let Some((host_id, uid, _)) = self
            .registry
            .find_best_public_server(self.config.server_capacity)
            .await
        {
            return self.bind_and_return(user_id, host_id, uid, false).await;
        }

        // Step 4: spawn on master.
        if self.registry.master_server_count().await < self.config.max_servers_in_master {
            match self.spawn_on_host(&HostId::master(), None, false).await {
                Ok((uid, _host)) => {
                    tokio::time::sleep(Duration::from_secs(self.config.spawn_warmup_secs)).await;
                    return self.bind_and_return(user_id, HostId::master(), uid, false).await;
                }
                Err(err) => warn!(error = %err, "spawn on master failed, falling through"),
            }
        }

        // Step 5: spawn on remote.
        for host in self.registry.active_hosts_in_registration_order().await {
            if host.is_master {
                continue;
            }
            if !host.has_capacity(self.config.max_servers_per_host) {
                continue;
            }
            match self.spawn_on_host(&host.id, None, false).await {
                Ok((uid, _)) => {
                    tokio::time::sleep(Duration::from_secs(self.config.spawn_warmup_secs)).await;
                    return self.bind_and_return(user_id, host.id, uid, false).await;
                }
                Err(err) => {
                    warn!(host_id = %host.id, error = %err, "remote spawn failed, trying next host");
                    continue;
                }
            }
        }

        // Step 6: provision a new host.
        self.provision_and_wait(user_id).await
    }

    async fn spawn_on_host(
        &self,
        host_id: &HostId,
        owner_id: Option<u64>,
        private: bool,
    ) -> Result<(ServerUid, Host)> {
        let host = self
            .registry
            .get(host_id)
            .await
            .ok_or_else(|| ControlPlaneError::ServerNotFound(host_id.to_string()))?;

        let port = self.config.base_port + host.servers.len() as u16;
        let response = self
            .agent_client
            .spawn_server(
                &host.address,
                &SpawnServerRequest { port, owner_id, private },
            )
            .await?;

        let uid = ServerUid::from(response.uid);
        self.registry
            .record_starting_server(
                host_id,
                Server {
                    uid: uid.clone(),
                    port: response.port,
                    player_count: 0,
                    status: ServerStatus::Starting,
                    last_heartbeat: control_plane_common::now_unix(),
                    empty_since: None,
                    owner_id,
                },
            )
            .await;

        Ok((uid, host))
    }

    async fn provision_and_wait(&self, user_id: u64) -> Result<MatchResult> {
        let provisioned = self.provisioner.provision_host().await?;
        self.registry
            .register_provisioning_host(
                provisioned.host_id.clone(),
                provisioned.address.clone(),
                Some(provisioned.resource_id.clone()),
            )
            .await;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.provision_wait_secs);
        loop {
            if let Some(host) = self.registry.get(&provisioned.host_id).await {
                if let Some(server) = host.servers.values().next() {
                    return self
                        .bind_and_return(user_id, provisioned.host_id.clone(), server.uid.clone(), false)
                        .await;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(host_id = %provisioned.host_id, "provisioning wait timed out");
                return Err(ControlPlaneError::Timeout);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let wait = remaining.min(Duration::from_secs(self.config.provision_poll_interval_secs));
            self.registry.wait_for_publish(wait).await;
        }
    }

    async fn bind_and_return(
        &self,
        user_id: u64,
        host_id: HostId,
        uid: ServerUid,
        private: bool,
    ) -> Result<MatchResult> {
        let save_id = self.save_barrier.start(user_id, "bind_server").await;
        self.player_data.bind_server(user_id, &uid).await;
        self.save_barrier.complete(&save_id, true).await;

        let host = self
            .registry
            .get(&host_id)
            .await
            .ok_or_else(|| ControlPlaneError::ServerNotFound(host_id.to_string()))?;
        let port = host
            .servers
            .get(&uid)
            .map(|s| s.port)
            .ok_or_else(|| ControlPlaneError::ServerNotFound(uid.to_string()))?;
        info!(%user_id, %uid, %host_id, private, "matched user to server");
        Ok(MatchResult {
            uid,
            address: host.address,
            port,
            host_id,
            private,
        })
    }

    /// Private-server subscribe: debit currency, mark the subscription, spawn on the master host.
    pub async fn subscribe_private_server(&self, user_id: u64, price: i64) -> Result<MatchResult> {
        let debit_save_id = self.save_barrier.start(user_id, "debit_currency").await;
        let debited = self.player_data.debit_currency(user_id, price).await;
        self.save_barrier.complete(&debit_save_id, debited).await;
        if !debited {
            return Err(ControlPlaneError::InsufficientFunds);
        }

        let expires_at = control_plane_common::now_unix()
            + self.config.private_subscription_days * 24 * 3600;
        let sub_save_id = self.save_barrier.start(user_id, "set_private_subscription").await;
        self.player_data.set_private_subscription(user_id, true, Some(expires_at)).await;
        self.save_barrier.complete(&sub_save_id, true).await;

        let uid = ServerUid::private(user_id, &HostId::master());
        let port = self.allocate_private_port(&HostId::master()).await?;

        let master = self
            .registry
            .get(&HostId::master())
            .await
            .ok_or_else(|| ControlPlaneError::ServerNotFound("master".into()))?;

        let response = self
            .agent_client
            .spawn_server(
                &master.address,
                &SpawnServerRequest { port, owner_id: Some(user_id), private: true },
            )
            .await?;

        self.registry
            .record_starting_server(
                &HostId::master(),
                Server {
                    uid: uid.clone(),
                    port: response.port,
                    player_count: 0,
                    status: ServerStatus::Starting,
                    last_heartbeat: control_plane_common::now_unix(),
                    empty_since: None,
                    owner_id: Some(user_id),
                },
            )
            .await;

        self.bind_and_return(user_id, HostId::master(), uid, true).await
    }

    /// Private-server cancel: reverses the subscription mark and gracefully stops the server.
    pub async fn cancel_private_server(&self, user_id: u64) -> Result<()> {
        let sub_save_id = self.save_barrier.start(user_id, "set_private_subscription").await;
        self.player_data.set_private_subscription(user_id, false, None).await;
        self.save_barrier.complete(&sub_save_id, true).await;

        let uid = ServerUid::private(user_id, &HostId::master());
        if let Some(host) = self.registry.get(&HostId::master()).await {
            if host.servers.contains_key(&uid) {
                self.agent_client.shutdown_server(&host.address, uid.as_str()).await?;
                self.registry.remove_server(&HostId::master(), &uid).await;
                let clear_save_id = self.save_barrier.start(user_id, "clear_bindings_to").await;
                self.player_data.clear_bindings_to(&uid).await;
                self.save_barrier.complete(&clear_save_id, true).await;
            }
        }
        Ok(())
    }

    /// Port allocator for private servers: lowest free port in the dedicated private range,
    /// resolving the Open Question in `SPEC_FULL.md` §9 (the distilled `10000 + user_id` formula
    /// collides across nearby ids and is not used here).
    async fn allocate_private_port(&self, host_id: &HostId) -> Result<u16> {
        let host = self
            .registry
            .get(host_id)
            .await
            .ok_or_else(|| ControlPlaneError::ServerNotFound(host_id.to_string()))?;
        let used: std::collections::HashSet<u16> = host.servers.values().map(|s| s.port).collect();
        (self.config.private_port_range_start..self.config.private_port_range_end)
            .find(|p| !used.contains(p))
            .ok_or(ControlPlaneError::MaxServersReached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::mock::MockProvisioner;
    use control_plane_common::InMemoryPlayerDataStore;

    fn matchmaker() -> (Matchmaker, Arc<HostRegistry>, Arc<InMemoryPlayerDataStore>) {
        let registry = Arc::new(HostRegistry::new());
        let player_data = Arc::new(InMemoryPlayerDataStore::new());
        let provisioner = Arc::new(MockProvisioner::default());
        let agent_client = AgentClient::new(Duration::from_secs(1));
        let broadcast = Arc::new(BroadcastBus::new());
        let config = Arc::new(ControlPlaneConfig::default());
        let save_barrier = Arc::new(SaveBarrier::new(Duration::from_secs(300)));
        let mm = Matchmaker::new(
            registry.clone(),
            player_data.clone(),
            provisioner,
            agent_client,
            broadcast,
            config,
            save_barrier,
        );
        (mm, registry, player_data)
    }

    #[tokio::test]
    async fn maintenance_mode_short_circuits_every_step() {
        let (mm, _registry, _player_data) = matchmaker();
        mm.broadcast.set_maintenance_mode(true, None).await;
        let result = mm.request_server(1).await;
        assert!(matches!(result, Err(ControlPlaneError::MaintenanceMode)));
    }

    #[tokio::test]
    async fn best_fit_prefers_the_least_populated_public_server() {
        let (mm, registry, player_data) = matchmaker();
        registry.register_master("127.0.0.1:9000".into()).await;
        registry
            .apply_heartbeat(
                &HostId::master(),
                vec![
                    control_plane_common::ServerSnapshot {
                        uid: "master-9000".to_string().into(),
                        port: 9000,
                        player_count: 4,
                        status: ServerStatus::Running,
                        owner_id: None,
                        private: false,
                    },
                    control_plane_common::ServerSnapshot {
                        uid: "master-9001".to_string().into(),
                        port: 9001,
                        player_count: 1,
                        status: ServerStatus::Running,
                        owner_id: None,
                        private: false,
                    },
                ],
            )
            .await;
        player_data.seed_user(1, 0).await;

        let result = mm.request_server(1).await.unwrap();
        assert_eq!(result.uid.as_str(), "master-9001");
    }
}
