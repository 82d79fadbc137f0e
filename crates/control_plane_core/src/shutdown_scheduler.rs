//! Maintenance-mode delayed global shutdown (`SPEC_FULL.md` §4.7): once maintenance mode is
//! enabled, gracefully stops every local (master host) server and tears down every non-master
//! host after a fixed delay. Kept separate from `BroadcastBus` so the bus stays free of
//! host/server-stopping logic (see its own `set_maintenance_mode` doc comment).

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use control_plane_common::{HostId, PlayerDataStore};

use crate::agent_client::AgentClient;
use crate::provisioner::CloudProvisioner;
use crate::registry::HostRegistry;
use crate::save_barrier::SaveBarrier;

const MAINTENANCE_SHUTDOWN_DELAY_SECS: u64 = 30;

pub struct ShutdownScheduler {
    registry: Arc<HostRegistry>,
    player_data: Arc<dyn PlayerDataStore>,
    provisioner: Arc<dyn CloudProvisioner>,
    agent_client: AgentClient,
    save_barrier: Arc<SaveBarrier>,
}

impl ShutdownScheduler {
    pub fn new(
        registry: Arc<HostRegistry>,
        player_data: Arc<dyn PlayerDataStore>,
        provisioner: Arc<dyn CloudProvisioner>,
        agent_client: AgentClient,
        save_barrier: Arc<SaveBarrier>,
    ) -> Self {
        Self {
            registry,
            player_data,
            provisioner,
            agent_client,
            save_barrier,
        }
    }

    /// Spawns the delayed teardown and returns immediately; fire-and-forget like `BroadcastBus::add`.
    pub fn schedule_maintenance_shutdown(self: Arc<Self>) {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(MAINTENANCE_SHUTDOWN_DELAY_SECS)).await;
            self.run().await;
        });
    }

    async fn run(&self) {
        info!("maintenance shutdown delay elapsed, stopping every local server and non-master host");

        if let Some(master) = self.registry.get(&HostId::master()).await {
            for uid in master.servers.keys().cloned().collect::<Vec<_>>() {
                if let Err(err) = self.agent_client.shutdown_server(&master.address, uid.as_str()).await {
                    warn!(%uid, error = %err, "maintenance shutdown: graceful server stop failed, removing anyway");
                }
                let save_id = self.save_barrier.start(0, "clear_bindings_to").await;
                self.player_data.clear_bindings_to(&uid).await;
                self.save_barrier.complete(&save_id, true).await;
                self.registry.remove_server(&HostId::master(), &uid).await;
            }
        }

        for host in self.registry.all_hosts().await {
            if host.is_master {
                continue;
            }
            if let Err(err) = self.agent_client.shutdown_host(&host.address).await {
                warn!(host_id = %host.id, error = %err, "maintenance shutdown: host shutdown RPC failed, tearing down anyway");
            }
            if let Some(resource_id) = &host.resource_id {
                if let Err(err) = self.provisioner.deprovision_host(resource_id).await {
                    warn!(host_id = %host.id, error = %err, "maintenance shutdown: failed to deprovision host resource");
                }
            }
            for uid in host.servers.keys() {
                let save_id = self.save_barrier.start(0, "clear_bindings_to").await;
                self.player_data.clear_bindings_to(uid).await;
                self.save_barrier.complete(&save_id, true).await;
            }
            self.registry.remove_host(&host.id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::mock::MockProvisioner;
    use control_plane_common::{InMemoryPlayerDataStore, ServerSnapshot, ServerStatus};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn tears_down_non_master_hosts_and_master_servers() {
        let registry = Arc::new(HostRegistry::new());
        let player_data: Arc<dyn PlayerDataStore> = Arc::new(InMemoryPlayerDataStore::new());
        let provisioner: Arc<dyn CloudProvisioner> = Arc::new(MockProvisioner::default());
        let agent_client = AgentClient::new(StdDuration::from_millis(100));

        registry.register_master("127.0.0.1:7000".into()).await;
        registry
            .apply_heartbeat(
                &HostId::master(),
                vec![ServerSnapshot {
                    uid: "master-9000".to_string().into(),
                    port: 9000,
                    player_count: 0,
                    status: ServerStatus::Running,
                    owner_id: None,
                    private: false,
                }],
            )
            .await;
        registry
            .register_provisioning_host(HostId::from("worker-1"), "10.0.0.1:9000".into(), Some("res-1".into()))
            .await;

        let save_barrier = Arc::new(SaveBarrier::new(StdDuration::from_secs(300)));
        let scheduler = ShutdownScheduler::new(registry.clone(), player_data, provisioner, agent_client, save_barrier);
        scheduler.run().await;

        assert!(registry.get(&HostId::from("worker-1")).await.is_none());
        let master = registry.get(&HostId::master()).await.unwrap();
        assert!(master.servers.is_empty());
    }
}
