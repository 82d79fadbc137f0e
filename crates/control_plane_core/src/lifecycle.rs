//! The Lifecycle Monitor: the host monitor and master-server monitor periodic tasks
//! (`SPEC_FULL.md` §4.5). Both take the registry lock only to decide, then perform RPCs and
//! database updates after releasing it, then re-take the lock to apply removals.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use control_plane_common::PlayerDataStore;

use crate::agent_client::AgentClient;
use crate::config::ControlPlaneConfig;
use crate::provisioner::CloudProvisioner;
use crate::registry::{HostMonitorAction, HostRegistry};
use crate::save_barrier::SaveBarrier;

pub struct LifecycleMonitor {
    registry: Arc<HostRegistry>,
    player_data: Arc<dyn PlayerDataStore>,
    provisioner: Arc<dyn CloudProvisioner>,
    agent_client: AgentClient,
    config: Arc<ControlPlaneConfig>,
    save_barrier: Arc<SaveBarrier>,
}

impl LifecycleMonitor {
    pub fn new(
        registry: Arc<HostRegistry>,
        player_data: Arc<dyn PlayerDataStore>,
        provisioner: Arc<dyn CloudProvisioner>,
        agent_client: AgentClient,
        config: Arc<ControlPlaneConfig>,
        save_barrier: Arc<SaveBarrier>,
    ) -> Self {
        Self {
            registry,
            player_data,
            provisioner,
            agent_client,
            config,
            save_barrier,
        }
    }

    /// Spawns the two periodic tasks on the current runtime. Returns their join handles so the
    /// caller can abort them on shutdown.
    pub fn spawn(self: Arc<Self>) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let host_monitor_loop = {
            let this = self.clone();
            tokio::spawn(async move { this.run_host_monitor().await })
        };
        let server_monitor_loop = {
            let this = self.clone();
            tokio::spawn(async move { this.run_master_server_monitor().await })
        };
        (host_monitor_loop, server_monitor_loop)
    }

    async fn run_host_monitor(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.monitor_interval_secs));
        loop {
            ticker.tick().await;
            self.host_monitor_pass().await;
        }
    }

    async fn run_master_server_monitor(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.monitor_interval_secs));
        loop {
            ticker.tick().await;
            self.master_server_monitor_pass().await;
        }
    }

    /// One pass of the host monitor; exposed separately so tests can drive it deterministically
    /// instead of waiting on the real interval.
    pub async fn host_monitor_pass(&self) {
        let actions = self.registry.hosts_needing_attention(&self.config).await;
        for action in actions {
            match action {
                HostMonitorAction::MarkInactive(host_id) => {
                    info!(%host_id, "host missed heartbeat past inactive threshold");
                    self.registry.mark_inactive(&host_id).await;
                }
                HostMonitorAction::GracefulShutdown(host) => {
                    info!(host_id = %host.id, "host empty past idle threshold, shutting down gracefully");
                    if let Err(err) = self.agent_client.shutdown_host(&host.address).await {
                        warn!(host_id = %host.id, error = %err, "graceful host shutdown RPC failed, proceeding with teardown anyway");
                    }
                    self.teardown_host(&host).await;
                }
                HostMonitorAction::Cleanup(host) => {
                    warn!(host_id = %host.id, "host stale past cleanup threshold, tearing down");
                    self.teardown_host(&host).await;
                }
            }
        }
    }

    async fn teardown_host(&self, host: &control_plane_common::Host) {
        if let Some(resource_id) = &host.resource_id {
            if let Err(err) = self.provisioner.deprovision_host(resource_id).await {
                warn!(host_id = %host.id, error = %err, "failed to deprovision host resource");
            }
        }
        for uid in host.servers.keys() {
            let save_id = self.save_barrier.start(0, "clear_bindings_to").await;
            self.player_data.clear_bindings_to(uid).await;
            self.save_barrier.complete(&save_id, true).await;
        }
        self.registry.remove_host(&host.id).await;
    }

    pub async fn master_server_monitor_pass(&self) {
        let removals = self.registry.master_servers_needing_removal(&self.config).await;
        if removals.is_empty() {
            return;
        }

        let master = self.registry.get(&control_plane_common::HostId::master()).await;
        for uid in removals {
            info!(%uid, "removing master-host server past idle or stale threshold");
            if let Some(host) = &master {
                if let Err(err) = self.agent_client.shutdown_server(&host.address, uid.as_str()).await {
                    warn!(%uid, error = %err, "graceful server stop RPC failed, removing from registry anyway");
                }
            }
            let save_id = self.save_barrier.start(0, "clear_bindings_to").await;
            self.player_data.clear_bindings_to(&uid).await;
            self.save_barrier.complete(&save_id, true).await;
            self.registry
                .remove_server(&control_plane_common::HostId::master(), &uid)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::mock::MockProvisioner;
    use control_plane_common::{HostId, InMemoryPlayerDataStore, ServerSnapshot, ServerStatus};

    fn monitor() -> (Arc<LifecycleMonitor>, Arc<HostRegistry>) {
        let registry = Arc::new(HostRegistry::new());
        let player_data = Arc::new(InMemoryPlayerDataStore::new());
        let provisioner = Arc::new(MockProvisioner::default());
        let agent_client = AgentClient::new(Duration::from_millis(100));
        let mut config = ControlPlaneConfig::default();
        config.host_inactive_secs = 0;
        config.host_stale_secs = 0;
        let save_barrier = Arc::new(crate::save_barrier::SaveBarrier::new(Duration::from_secs(300)));
        let monitor = Arc::new(LifecycleMonitor::new(
            registry.clone(),
            player_data,
            provisioner,
            agent_client,
            Arc::new(config),
            save_barrier,
        ));
        (monitor, registry)
    }

    #[tokio::test]
    async fn stale_host_is_torn_down_and_removed_from_the_registry() {
        let (monitor, registry) = monitor();
        let host_id = HostId::from("worker-1");
        registry
            .register_provisioning_host(host_id.clone(), "10.0.0.1:9000".into(), Some("res-1".into()))
            .await;
        registry
            .apply_heartbeat(&host_id, vec![ServerSnapshot {
                uid: "worker-1-9000".to_string().into(),
                port: 9000,
                player_count: 0,
                status: ServerStatus::Running,
                owner_id: None,
                private: false,
            }])
            .await;

        // host_stale_secs is 0 in this config; wait past a one-second boundary so the
        // integer-seconds `since_heartbeat` comparison is guaranteed to exceed it.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        monitor.host_monitor_pass().await;

        assert!(registry.get(&host_id).await.is_none());
    }

    #[tokio::test]
    async fn master_host_is_never_torn_down_by_the_host_monitor() {
        let (monitor, registry) = monitor();
        registry.register_master("127.0.0.1:9000".into()).await;
        monitor.host_monitor_pass().await;
        assert!(registry.get(&HostId::master()).await.is_some());
    }
}
