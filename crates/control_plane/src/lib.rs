//! # Control Plane
//!
//! The control-plane binary: HTTP front adapter, matchmaker, lifecycle monitor, and cloud
//! provisioner wired together into one long-running process for a multi-tenant game backend.
//!
//! ## Quick start
//!
//! ```bash
//! # Run with default configuration
//! control_plane
//!
//! # Specify custom configuration
//! control_plane --config production.toml
//!
//! # Override specific settings
//! control_plane --bind 0.0.0.0:8080 --log-level debug
//!
//! # JSON logging for production
//! control_plane --json-logs
//! ```
//!
//! ## Configuration
//!
//! Loaded from a TOML file (default `control_plane.toml`); a default file is created if it
//! doesn't exist yet.
//!
//! ## Signal handling
//!
//! `SIGINT`/`SIGTERM` trigger the graceful shutdown path: stop accepting, drain the save
//! barrier up to `T_drain`, tear down the lifecycle tasks, exit.

use tracing::error;

mod app;
mod cli;
mod config;
mod http;
mod logging;
mod signals;
mod token_store;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point, called from `main`'s `#[tokio::main]` context.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("failed to set up logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("application error: {e:?}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn default_config_validates_cleanly() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cli_args_carry_overrides() {
        let args = CliArgs {
            config_path: PathBuf::from("test.toml"),
            bind_address: Some("127.0.0.1:9000".to_string()),
            log_level: Some("debug".to_string()),
            json_logs: true,
        };

        assert_eq!(args.config_path, PathBuf::from("test.toml"));
        assert_eq!(args.bind_address, Some("127.0.0.1:9000".to_string()));
        assert_eq!(args.log_level, Some("debug".to_string()));
        assert!(args.json_logs);
    }

    #[tokio::test]
    async fn application_creation_fails_on_invalid_bind_override() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs {
            config_path: dir.path().join("control_plane.toml"),
            bind_address: Some("not-an-address".to_string()),
            log_level: None,
            json_logs: false,
        };

        assert!(Application::new(args).await.is_err());
    }
}
