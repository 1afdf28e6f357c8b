// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 hiveot.net

//! HiveOT Hub CLI
//!
//! Runs the hub: digital twins, directory and the protocol bindings.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: HTTP/SSE/WSS on 8444, MQTT on 8883 and 8884
//! hiveot-hub
//!
//! # Using a configuration file
//! hiveot-hub --config hub.toml
//!
//! # HTTP only, on another port, with debug logging
//! hiveot-hub --port 9444 --no-mqtt --log-level debug
//!
//! # Generate and check a configuration file
//! hiveot-hub gen-config --output hub.toml
//! hiveot-hub validate --config hub.toml
//! ```

use clap::{Parser, Subcommand};
use hiveot_messaging::roles;
use hiveot_runtime::config::ENV_LOG_LEVEL;
use hiveot_runtime::{authenticator_from_config, ClientConfig, HubConfig, HubRuntime};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for bad arguments and invalid configuration.
const EXIT_BAD_ARGUMENT: u8 = 2;

/// HiveOT digital-twin hub
#[derive(Parser, Debug)]
#[command(name = "hiveot-hub")]
#[command(about = "HiveOT Hub - WoT digital twins, directory and protocol bindings")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory (overrides HIVEOT_HOME and the config file)
    #[arg(long)]
    home: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error or a tracing directive)
    #[arg(long)]
    log_level: Option<String>,

    /// HTTP/SSE/WebSocket port
    #[arg(short, long)]
    port: Option<u16>,

    /// Disable the MQTT binding
    #[arg(long)]
    no_mqtt: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "hub.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        let level = args
            .log_level
            .clone()
            .or_else(|| std::env::var(ENV_LOG_LEVEL).ok())
            .unwrap_or_else(|| "info".to_string());
        init_logging(&level);
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let mut config = match &args.config {
        Some(path) => match HubConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                return ExitCode::from(EXIT_BAD_ARGUMENT);
            }
        },
        None => HubConfig::default(),
    };
    config.apply_env();
    if let Some(home) = args.home {
        config.home = home;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if let Some(port) = args.port {
        config.http.port = port;
    }
    if args.no_mqtt {
        config.mqtt.enabled = false;
    }

    init_logging(&config.log_level);
    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::from(EXIT_BAD_ARGUMENT);
    }
    if config.clients.is_empty() {
        warn!("no clients configured, only in-process clients can connect");
    }

    info!("HiveOT Hub v{}", env!("CARGO_PKG_VERSION"));
    info!("home: {}", config.home.display());

    let authn = authenticator_from_config(&config);
    let hub = match HubRuntime::start(config, authn).await {
        Ok(hub) => hub,
        Err(e) => {
            error!("failed to start the hub: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to wait for Ctrl+C: {}", e);
    }
    info!("shutting down...");
    hub.stop().await;
    ExitCode::SUCCESS
}

/// Install the global subscriber. An invalid filter falls back to `info`.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn cmd_gen_config(output: PathBuf) -> ExitCode {
    let mut config = HubConfig::default();
    config.clients = vec![
        ClientConfig {
            id: "admin".into(),
            password: "change-me".into(),
            role: roles::ADMIN.into(),
        },
        ClientConfig {
            id: "agent1".into(),
            password: "change-me".into(),
            role: roles::AGENT.into(),
        },
        ClientConfig {
            id: "viewer1".into(),
            password: "change-me".into(),
            role: roles::VIEWER.into(),
        },
    ];
    match config.to_file(&output) {
        Ok(()) => {
            println!("Generated configuration file: {}", output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to write {}: {}", output.display(), e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_validate(config_path: PathBuf) -> ExitCode {
    match HubConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Home:    {}", config.home.display());
            println!("Storage: {}", config.storage_path().display());
            println!(
                "HTTP:    {}",
                if config.http.enabled {
                    format!("{}:{}", config.http.bind, config.http.port)
                } else {
                    "disabled".into()
                }
            );
            println!(
                "MQTT:    {}",
                if config.mqtt.enabled {
                    format!(
                        "{}:{} (ws {})",
                        config.mqtt.bind, config.mqtt.port, config.mqtt.ws_port
                    )
                } else {
                    "disabled".into()
                }
            );
            println!("Clients: {}", config.clients.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            ExitCode::from(EXIT_BAD_ARGUMENT)
        }
    }
}
