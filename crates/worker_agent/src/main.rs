use std::path::PathBuf;

use clap::{Arg, Command};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use worker_agent::{agent::Agent, config::AgentConfig};

fn parse_args() -> (PathBuf, Option<String>, Option<String>, Option<String>) {
    let matches = Command::new("Worker Agent")
        .version("0.1.0")
        .about("Per-host process supervisor for the control plane")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .default_value("agent.toml"),
        )
        .arg(Arg::new("host-id").long("host-id").value_name("ID"))
        .arg(Arg::new("control-plane-url").long("control-plane-url").value_name("URL"))
        .arg(Arg::new("binary-path").long("binary-path").value_name("PATH"))
        .get_matches();

    (
        PathBuf::from(matches.get_one::<String>("config").expect("has default")),
        matches.get_one::<String>("host-id").cloned(),
        matches.get_one::<String>("control-plane-url").cloned(),
        matches.get_one::<String>("binary-path").cloned(),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config_path, host_id, control_plane_url, binary_path) = parse_args();

    let mut config = AgentConfig::load_from_file(&config_path).await?;
    if let Some(host_id) = host_id {
        config.host_id = host_id;
    }
    if let Some(control_plane_url) = control_plane_url {
        config.control_plane_url = control_plane_url;
    }
    if let Some(binary_path) = binary_path {
        config.binary_path = binary_path;
    }
    config.validate().map_err(|e| format!("invalid agent config: {e}"))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_ansi(true)).init();
    }

    info!(host_id = %config.host_id, bind = %config.bind_address, "starting worker agent");

    let bind_address: std::net::SocketAddr = config.bind_address.parse()?;
    let agent = Agent::new(config);

    let heartbeat_handle = tokio::spawn(Agent::run_heartbeat_loop(std::sync::Arc::new(agent.clone())));

    let router = worker_agent::http::router(agent.clone());
    let listener = tokio::net::TcpListener::bind(bind_address).await?;

    let server_agent = agent.clone();
    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                error!("agent HTTP server error: {e:?}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            server_agent.shutdown_host(true).await;
        }
    }

    heartbeat_handle.abort();
    Ok(())
}
