//! MQTT presence client - main entry point
//!
//! Connects with the rumqttc transport, announces presence and logs every
//! command received until SIGINT or SIGTERM triggers a clean teardown.

use clap::{Parser, Subcommand};
use mqtt_presence::config::PresenceConfig;
use mqtt_presence::coordinator::{Coordinator, CoordinatorSettings};
use mqtt_presence::observability::init_default_logging;
use mqtt_presence::protocol::ClientIdentity;
use mqtt_presence::transport::MqttTransport;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "mqtt-presence")]
#[command(about = "MQTT presence client with connection resilience")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and maintain presence until interrupted
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting mqtt-presence v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_client(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<PresenceConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(PresenceConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["presence.toml", "config/presence.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(PresenceConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create presence.toml".into())
        }
    }
}

async fn run_client(config: PresenceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let identity = ClientIdentity::generate(&config.client.id_prefix)?;
    let settings = CoordinatorSettings::from_config(&config, &identity);
    info!(
        client_id = %identity,
        status_topic = %settings.status_topic,
        command_topic = %settings.command_topic,
        "Client starting"
    );

    let transport = Arc::new(MqttTransport::new(config.mqtt.clone()));
    let (command_tx, mut command_rx) = mpsc::channel(64);

    let (coordinator, handle) = Coordinator::new(identity, settings, transport, command_tx);
    let coordinator_task = tokio::spawn(coordinator.run());

    tokio::spawn(async move {
        while let Some(envelope) = command_rx.recv().await {
            info!(
                topic = %envelope.topic,
                received_at = %envelope.received_at.to_rfc3339(),
                command = ?envelope.command,
                "Command"
            );
        }
    });

    // No host connectivity monitor here; assume the network is up
    handle.connectivity_changed(true)?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Client is running and waiting for commands on MQTT...");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    handle.shutdown().await?;
    if let Err(e) = coordinator_task.await {
        warn!("Coordinator task ended abnormally: {}", e);
    }

    let metrics = handle.metrics();
    info!(
        "Final metrics: {}",
        serde_json::to_string(&metrics).unwrap_or_default()
    );
    Ok(())
}

fn handle_config_command(
    config: &PresenceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
