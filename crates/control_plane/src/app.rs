//! Top-level application wiring: builds every control-plane component from `AppConfig`, owns
//! the HTTP front adapter's accept loop and the Lifecycle Monitor's periodic tasks, and drives
//! the signal-triggered graceful shutdown sequence (`SPEC_FULL.md` §4.3-§4.7, §6).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use cloud_provisioner::HttpCloudProvisioner;
use control_plane_common::{InMemoryPlayerDataStore, PlayerDataStore, ShutdownState};
use control_plane_core::security::SecurityManager;
use control_plane_core::{
    AgentClient, BroadcastBus, HealthManager, HostRegistry, LifecycleMonitor, Matchmaker,
    SaveBarrier, ShutdownScheduler,
};

use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::http;
use crate::logging::display_banner;
use crate::signals::{setup_signal_handlers, setup_signal_handlers_silent};
use crate::token_store::InMemoryTokenStore;

/// Everything the HTTP front adapter's handlers need, bundled for `axum`'s `State` extractor.
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<HostRegistry>,
    pub player_data: Arc<dyn PlayerDataStore>,
    pub matchmaker: Matchmaker,
    pub broadcast: Arc<BroadcastBus>,
    pub health: Arc<HealthManager>,
    pub security: Arc<SecurityManager>,
    pub token_store: Arc<InMemoryTokenStore>,
    pub agent_client: AgentClient,
    pub shutdown_scheduler: Arc<ShutdownScheduler>,
    pub http_client: reqwest::Client,
    pub shutdown: ShutdownState,
    pub save_barrier: Arc<SaveBarrier>,
}

pub struct Application {
    config: AppConfig,
    state: Arc<AppState>,
    lifecycle: Arc<LifecycleMonitor>,
}

impl Application {
    /// Loads configuration, applies CLI overrides, validates, and wires every component. No
    /// I/O beyond the config file read happens here; the HTTP listener binds in `run`.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        info!("configuration loaded from {}", args.config_path.display());

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| format!("configuration validation failed: {e}"))?;
        info!("configuration validated");

        display_banner();

        let core_config = Arc::new(config.control_plane.clone());
        let registry = Arc::new(HostRegistry::new());
        let player_data: Arc<dyn PlayerDataStore> = Arc::new(InMemoryPlayerDataStore::new());
        let broadcast = Arc::new(BroadcastBus::new());
        let save_barrier = Arc::new(SaveBarrier::new(Duration::from_secs(core_config.save_stale_secs)));
        let agent_client = AgentClient::new(Duration::from_secs(5));

        let provisioner = Arc::new(HttpCloudProvisioner::new(config.to_iaas_config()));
        let provisioner_dyn: Arc<dyn control_plane_core::CloudProvisioner> = provisioner.clone();

        registry
            .register_master(config.server.master_agent_address.clone())
            .await;
        info!(address = %config.server.master_agent_address, "master host pre-registered");

        let matchmaker = Matchmaker::new(
            registry.clone(),
            player_data.clone(),
            provisioner_dyn.clone(),
            agent_client.clone(),
            broadcast.clone(),
            core_config.clone(),
            save_barrier.clone(),
        );

        let lifecycle = Arc::new(LifecycleMonitor::new(
            registry.clone(),
            player_data.clone(),
            provisioner_dyn.clone(),
            agent_client.clone(),
            core_config.clone(),
            save_barrier.clone(),
        ));

        let shutdown_scheduler = Arc::new(ShutdownScheduler::new(
            registry.clone(),
            player_data.clone(),
            provisioner_dyn,
            agent_client.clone(),
            save_barrier.clone(),
        ));

        let health = Arc::new(HealthManager::new());
        health.add_circuit_breaker(provisioner.circuit_breaker().clone()).await;

        let security = Arc::new(SecurityManager::new(config.security.clone()));
        let token_store = Arc::new(InMemoryTokenStore::new());

        let state = Arc::new(AppState {
            config: config.clone(),
            registry,
            player_data,
            matchmaker,
            broadcast,
            health,
            security,
            token_store,
            agent_client,
            shutdown_scheduler,
            http_client: reqwest::Client::new(),
            shutdown: ShutdownState::new(),
            save_barrier,
        });

        Ok(Self { config, state, lifecycle })
    }

    /// Binds the HTTP listener, spawns the Lifecycle Monitor's periodic tasks and a janitor
    /// task, then blocks until a shutdown signal arrives and drains outstanding work.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("starting control plane application");

        let bind_address: SocketAddr = self.config.server.bind_address.parse()?;
        let router = http::router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(bind_address).await?;
        info!(%bind_address, "HTTP front adapter listening");

        let (host_monitor, server_monitor) = self.lifecycle.clone().spawn();
        let janitor = spawn_janitor(self.state.clone(), self.state.save_barrier.clone());

        let server_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            {
                error!("HTTP server error: {e:?}");
            }
        });

        info!("control plane is now accepting requests");
        info!("press Ctrl+C to begin graceful shutdown");

        let signal_shutdown_state = setup_signal_handlers().await?;

        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("failed to arm the second shutdown signal handler: {e}");
                return;
            }
            warn!("second shutdown signal received, exiting immediately");
            std::process::exit(1);
        });

        if signal_shutdown_state.is_shutdown_initiated() {
            self.state.shutdown.initiate_shutdown();
        }

        info!("shutdown signal received, draining outstanding saves");
        let drain_secs = self.config.control_plane.drain_secs;
        if !self.state.save_barrier.wait_all(Duration::from_secs(drain_secs)).await {
            warn!("save barrier did not drain within T_drain, proceeding anyway");
        }

        janitor.abort();
        host_monitor.abort();
        server_monitor.abort();
        server_handle.abort();

        self.state.shutdown.complete_shutdown();
        info!("control plane shutdown complete");

        Ok(())
    }
}

/// Periodic housekeeping: expires stale save-barrier entries and stale connection-tracker rows.
/// Neither failure mode is ever surfaced to a caller, so this runs on its own interval rather
/// than piggybacking on the Lifecycle Monitor's host/server reaping passes.
fn spawn_janitor(state: Arc<AppState>, save_barrier: Arc<SaveBarrier>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            save_barrier.cleanup_stale().await;
            state.security.cleanup_stale_entries().await;
        }
    })
}
