//! The Worker Agent's single shared state and its two driving loops: the heartbeat to the
//! control plane and the graceful shutdown barrier (`SPEC_FULL.md` §4.2).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use control_plane_common::{
    now_unix, HeartbeatCommand, HeartbeatRequest, HeartbeatResponse, ServerSnapshot, ServerUid,
};
use control_plane_core::SaveBarrier;
use sysinfo::{Pid, System};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::port_allocator::PortAllocator;
use crate::process::ManagedServer;

pub struct AgentState {
    pub config: AgentConfig,
    pub servers: HashMap<ServerUid, ManagedServer>,
    pub ports: PortAllocator,
}

/// Cheaply cloneable handle shared between the axum router, the heartbeat loop and the
/// shutdown task. The inner state is single-task-conceptually-owned (`SPEC_FULL.md` §5) but
/// guarded by one mutex since axum dispatches handlers onto arbitrary tasks.
#[derive(Clone)]
pub struct Agent {
    state: Arc<Mutex<AgentState>>,
    pub save_barrier: Arc<SaveBarrier>,
    shutting_down: Arc<AtomicBool>,
    consecutive_heartbeat_failures: Arc<std::sync::atomic::AtomicU32>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let ports = PortAllocator::new(config.base_port, config.max_servers_per_host);
        let drain_secs = config.drain_secs;
        Self {
            state: Arc::new(Mutex::new(AgentState {
                config,
                servers: HashMap::new(),
                ports,
            })),
            save_barrier: Arc::new(SaveBarrier::new(Duration::from_secs(drain_secs))),
            shutting_down: Arc::new(AtomicBool::new(false)),
            consecutive_heartbeat_failures: Arc::new(std::sync::atomic::AtomicU32::new(0)),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// `spawn_server(uid?, port?, owner?)`. Allocates (or reserves the requested) port, launches
    /// the configured binary, records the process with `status=starting`.
    pub async fn spawn_server(
        &self,
        requested_uid: Option<String>,
        requested_port: Option<u16>,
        owner_id: Option<u64>,
        private: bool,
    ) -> Result<(ServerUid, u16), String> {
        let mut state = self.state.lock().await;

        let port = match requested_port {
            Some(port) => {
                if !state.ports.reserve(port) {
                    return Err("max_servers_reached".to_string());
                }
                port
            }
            None => state
                .ports
                .get_next_available_port()
                .ok_or_else(|| "max_servers_reached".to_string())?,
        };

        let uid = ServerUid::from(
            requested_uid.unwrap_or_else(|| format!("{}-{}", state.config.host_id, port)),
        );

        let master_url = state.config.control_plane_url.clone();
        let binary_path = state.config.binary_path.clone();
        let warmup = Duration::from_secs(state.config.spawn_warmup_secs);

        let managed = ManagedServer::spawn(&binary_path, uid.clone(), port, &master_url, owner_id, private)
            .map_err(|e| {
                state.ports.release(port);
                format!("failed to spawn process: {e}")
            })?;
        state.servers.insert(uid.clone(), managed);
        drop(state);

        let agent = self.clone();
        let uid_for_warmup = uid.clone();
        tokio::spawn(async move {
            tokio::time::sleep(warmup).await;
            let mut state = agent.state.lock().await;
            if let Some(server) = state.servers.get_mut(&uid_for_warmup) {
                server.mark_running();
                info!(uid = %uid_for_warmup, "server warmed up, now running");
            }
        });

        Ok((uid, port))
    }

    /// Stops one local server. `graceful`: `SIGTERM` then wait, else immediate force-kill.
    pub async fn shutdown_server(&self, uid: &ServerUid, graceful: bool) -> Result<(), String> {
        let (managed, grace, port) = {
            let mut state = self.state.lock().await;
            let Some(managed) = state.servers.remove(uid) else {
                return Err("server_not_found".to_string());
            };
            let grace = Duration::from_secs(state.config.stop_grace_secs);
            let port = managed.port;
            state.ports.release(port);
            (managed, grace, port)
        };
        info!(%uid, port, graceful, "stopping local server");
        managed.stop(graceful, grace).await;
        Ok(())
    }

    /// Host-wide shutdown. `graceful=true`: suppress heartbeats, wait up to `T_drain` for the
    /// pending-save set to empty, stop every local server gracefully, then return. `graceful=false`
    /// skips the drain wait and force-kills every local server immediately.
    pub async fn shutdown_host(&self, graceful: bool) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(graceful, "host shutdown initiated, suppressing further heartbeats");

        if graceful {
            let drain_secs = {
                let state = self.state.lock().await;
                state.config.drain_secs
            };
            if !self.save_barrier.wait_all(Duration::from_secs(drain_secs)).await {
                warn!("save barrier did not drain within T_drain, proceeding anyway");
            }
        }

        let uids: Vec<ServerUid> = {
            let state = self.state.lock().await;
            state.servers.keys().cloned().collect()
        };
        for uid in uids {
            if let Err(err) = self.shutdown_server(&uid, graceful).await {
                warn!(%uid, error = %err, "error stopping server during host shutdown");
            }
        }
    }

    /// Builds the heartbeat payload from the current local server table.
    async fn snapshot(&self) -> (String, Vec<ServerSnapshot>) {
        let state = self.state.lock().await;
        let host_id = state.config.host_id.clone();
        let snapshots = state
            .servers
            .values()
            .map(|s| ServerSnapshot {
                uid: s.uid.clone(),
                port: s.port,
                player_count: s.player_count,
                status: s.status,
                owner_id: s.owner_id,
                private: s.private,
            })
            .collect();
        (host_id, snapshots)
    }

    /// Runs forever, sending a heartbeat every `heartbeat_interval_secs`. After
    /// `heartbeat_failure_limit` consecutive failures, initiates its own graceful shutdown.
    pub async fn run_heartbeat_loop(self: Arc<Self>) {
        let (control_plane_url, interval_secs, failure_limit) = {
            let state = self.state.lock().await;
            (
                state.config.control_plane_url.clone(),
                state.config.heartbeat_interval_secs,
                state.config.heartbeat_failure_limit,
            )
        };
        let client = reqwest::Client::new();
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));

        loop {
            ticker.tick().await;
            if self.is_shutting_down() {
                return;
            }

            let (host_id, servers) = self.snapshot().await;
            let total_players = servers.iter().map(|s| s.player_count).sum();
            let request = HeartbeatRequest {
                host_id: host_id.clone().into(),
                servers,
                timestamp: now_unix(),
                total_players,
            };

            let result = client
                .post(format!("{control_plane_url}/heartbeat"))
                .json(&request)
                .timeout(Duration::from_secs(10))
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    self.consecutive_heartbeat_failures.store(0, Ordering::Release);
                    if let Ok(body) = response.json::<HeartbeatResponse>().await {
                        if matches!(body.command, Some(HeartbeatCommand::Shutdown)) {
                            info!("control plane commanded shutdown via heartbeat response");
                            self.clone().shutdown_host(true).await;
                            return;
                        }
                    }
                }
                _ => {
                    let failures = self.consecutive_heartbeat_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    warn!(failures, "heartbeat failed");
                    if failures >= failure_limit {
                        warn!("heartbeat failure limit reached, self-initiating shutdown");
                        self.clone().shutdown_host(true).await;
                        return;
                    }
                }
            }
        }
    }

    pub async fn status(&self) -> crate::http::AgentStatusPayload {
        let mut system = System::new();
        let (host_id, servers) = self.snapshot().await;
        let pids: Vec<Pid> = {
            let state = self.state.lock().await;
            state
                .servers
                .values()
                .filter_map(|s| s.pid())
                .map(|pid| Pid::from_u32(pid))
                .collect()
        };
        system.refresh_cpu_usage();
        system.refresh_memory();
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&pids), true);

        let cpu_percent = system.global_cpu_usage();
        let memory_used_mb = system.used_memory() / (1024 * 1024);

        crate::http::AgentStatusPayload {
            host_id,
            servers,
            cpu_percent,
            memory_used_mb,
            pending_saves: self.save_barrier.pending_count().await,
        }
    }

    pub async fn update_players(&self, uid: &ServerUid, player_count: u32) -> Result<(), String> {
        let mut state = self.state.lock().await;
        let Some(server) = state.servers.get_mut(uid) else {
            return Err("server_not_found".to_string());
        };
        server.player_count = player_count;
        server.last_update = now_unix();
        if player_count == 0 {
            server.empty_since.get_or_insert_with(now_unix);
        } else {
            server.empty_since = None;
        }
        Ok(())
    }
}
