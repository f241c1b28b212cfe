//! shadowlink - device shadow bridge entry point

use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use shadowlink::config::BridgeConfig;
use shadowlink::jsonrpc::{CommandExecutor, ControlRequest, ControlResponse, HttpCommandExecutor};
use shadowlink::observability::{init_default_logging, level_from_verbosity, BridgeMetrics};
use shadowlink::shadow::ShadowTopics;
use shadowlink::transport::mqtt::MqttClient;
use shadowlink::BridgeService;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["shadowlink.toml", "config/shadowlink.toml"];

/// Device shadow bridge for a JSON-RPC media player
#[derive(Parser)]
#[command(name = "shadowlink")]
#[command(about = "Bridges a local JSON-RPC media player to a cloud device shadow over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SHADOWLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until SIGINT/SIGTERM; SIGHUP reloads the configuration
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Print the shadow topics derived from the configuration
    Topics,
    /// Connect to the broker and ping the device, then exit
    Check {
        /// How long to wait for the broker to accept the connection
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
        /// Only check the broker
        #[arg(long)]
        skip_device: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(level_from_verbosity(cli.verbose));

    info!("Starting shadowlink v{}", env!("CARGO_PKG_VERSION"));

    let config_path = match resolve_config_path(cli.config.as_deref()) {
        Some(path) => path,
        None => {
            error!(
                "No configuration file found. Please provide one with -c/--config or create shadowlink.toml"
            );
            process::exit(1);
        }
    };

    info!("Loading configuration from: {}", config_path.display());
    let config = match BridgeConfig::load_from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_bridge(config, config_path).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Topics => {
            print_topics(&config);
            Ok(())
        }
        Commands::Check {
            timeout_secs,
            skip_device,
        } => check_connectivity(config, timeout_secs, skip_device).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

async fn run_bridge(
    config: BridgeConfig,
    config_path: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(thing = %config.thing.name, "Bridge starting");

    let metrics = Arc::new(BridgeMetrics::new());
    let (settings_tx, settings_rx) = watch::channel(config.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let signal_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading {}", config_path.display());
                    match BridgeConfig::load_from_file(&config_path) {
                        Ok(config) => {
                            let _ = settings_tx.send(config);
                        }
                        Err(e) => warn!("Keeping current settings, reload failed: {}", e),
                    }
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully...");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully...");
                    break;
                }
            }
        }
        let _ = shutdown_tx.send(true);
    });

    let mut service = BridgeService::new(config, metrics.clone(), |config: &BridgeConfig| {
        HttpCommandExecutor::from_device(&config.device)
    });
    let result = service.run(settings_rx, shutdown_rx).await;
    signal_task.abort();

    match serde_json::to_string(&metrics.snapshot()) {
        Ok(snapshot) => info!(metrics = %snapshot, "Final bridge metrics"),
        Err(e) => warn!("Failed to serialize metrics: {}", e),
    }

    Ok(result?)
}

fn handle_config_command(
    config: &BridgeConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

fn print_topics(config: &BridgeConfig) {
    let topics = ShadowTopics::from_config(config);
    println!("update   (publish)   {}", topics.update());
    println!("delta    (subscribe) {}", topics.delta());
    println!("rejected (subscribe) {}", topics.rejected());
}

async fn check_connectivity(
    config: BridgeConfig,
    timeout_secs: u64,
    skip_device: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Keep the receiver alive so the transport worker keeps running
    let (inbound_tx, _inbound_rx) = mpsc::unbounded_channel();
    let mut client = MqttClient::new(Arc::new(config.clone()), Arc::new(BridgeMetrics::new()));
    client.connect(inbound_tx)?;

    let connected = client
        .wait_for_connection(Duration::from_secs(timeout_secs))
        .await;
    client.disconnect().await?;
    connected?;
    println!(
        "Broker OK: {}:{} as {}",
        config.broker.host,
        config.broker.port,
        config.client_id()
    );

    if skip_device {
        return Ok(());
    }

    let executor = HttpCommandExecutor::from_device(&config.device)?;
    let mut ping = Map::new();
    ping.insert("method".to_string(), json!("JSONRPC.Ping"));
    let request = ControlRequest::from_state(&ping);

    let raw = tokio::time::timeout(
        config.device.command_timeout(),
        executor.execute(&request.to_json()?),
    )
    .await
    .map_err(|_| format!("device did not answer within {}ms", config.device.command_timeout_ms))??;

    let response = ControlResponse::parse(&raw)?;
    if response.is_error() {
        return Err(format!("device returned an error: {raw}").into());
    }
    let state: Value = response.into_device_state();
    println!("Device OK: {} -> {}", executor.url(), state);
    Ok(())
}
