//! Command-line interface handling for the control plane.
//!
//! A single long-running process with no interactive subcommands (`SPEC_FULL.md` §6); the
//! flags here only override the TOML-loaded configuration before validation.

use clap::{Arg, Command};
use std::path::PathBuf;

/// Command-line options that override configuration-file settings.
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub bind_address: Option<String>,
    pub log_level: Option<String>,
    pub json_logs: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        let matches = Command::new("Control Plane")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Control plane for a multi-tenant game backend")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("control_plane.toml"),
            )
            .arg(
                Arg::new("bind")
                    .short('b')
                    .long("bind")
                    .value_name("ADDRESS")
                    .help("Bind address (e.g. 0.0.0.0:8080)"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(clap::ArgAction::SetTrue),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .expect("default config path should always be set"),
            ),
            bind_address: matches.get_one::<String>("bind").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_overrides() {
        let args = CliArgs {
            config_path: PathBuf::from("control_plane.toml"),
            bind_address: None,
            log_level: None,
            json_logs: false,
        };
        assert!(args.bind_address.is_none());
        assert!(!args.json_logs);
    }
}
