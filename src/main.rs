//! Hono device client - Main Entry Point

use clap::{Parser, Subcommand};
use hono_device::config::DeviceConfig;
use hono_device::error::{DeviceError, DeviceResult};
use hono_device::observability::init_default_logging;
use hono_device::protocol::SendResult;
use hono_device::session::DeviceSession;
use hono_device::transport::mqtt::MqttTransport;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Device-side client for the Eclipse Hono MQTT adapter
#[derive(Parser)]
#[command(name = "hono-device")]
#[command(about = "Eclipse Hono MQTT device client")]
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
    /// Receive commands until interrupted, answering request/response commands
    Listen {
        /// Status code sent with each response
        #[arg(long, default_value_t = 200)]
        status: u16,
    },
    /// Publish one telemetry message
    Telemetry {
        #[arg(long)]
        payload: String,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Publish one event
    Event {
        #[arg(long)]
        payload: String,
        #[arg(long)]
        content_type: Option<String>,
    },
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

    info!("Starting Hono device client v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Listen { status } => run_listener(&config, status).await,
        Commands::Telemetry {
            payload,
            content_type,
        } => publish_once(&config, Endpoint::Telemetry, payload, content_type).await,
        Commands::Event {
            payload,
            content_type,
        } => publish_once(&config, Endpoint::Event, payload, content_type).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        if e.is_retryable() {
            warn!("The failure is transient; retrying later may succeed");
        }
        process::exit(e.exit_code());
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> DeviceResult<DeviceConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(DeviceConfig::load_from_file(path)?);
    }

    for path_str in ["device.toml", "config/device.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(DeviceConfig::load_from_file(&path)?);
        }
    }

    Err(DeviceError::invalid_input(
        "No configuration file found. Please provide one with -c/--config or create device.toml",
    ))
}

async fn connect(config: &DeviceConfig) -> DeviceResult<DeviceSession<MqttTransport>> {
    let session = DeviceSession::from_config(config)?;
    session.connect_and_subscribe().await?;
    Ok(session)
}

async fn run_listener(config: &DeviceConfig, status: u16) -> DeviceResult<()> {
    let session = connect(config).await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .map_err(|e| DeviceError::invalid_input(format!("Cannot install SIGINT handler: {e}")))?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .map_err(|e| DeviceError::invalid_input(format!("Cannot install SIGTERM handler: {e}")))?;

    info!("Waiting for commands...");

    loop {
        let received = tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            received = session.receive_command() => received,
        };

        let mut command = match received {
            Ok(command) => command,
            Err(e) => {
                warn!("Command receiver stopped: {}", e);
                break;
            }
        };

        info!(
            command = command.name(),
            request_id = command.request_id.as_deref().unwrap_or("-"),
            properties = ?command.property_bag,
            payload = %String::from_utf8_lossy(&command.payload),
            "Received command"
        );

        if command.is_request_response() {
            let payload = command.payload.clone();
            let result = session
                .send_command_response(&mut command, status, payload, None)
                .await;
            log_result("Command response", &result);
        }
    }

    session.shutdown().await?;
    Ok(())
}

enum Endpoint {
    Telemetry,
    Event,
}

async fn publish_once(
    config: &DeviceConfig,
    endpoint: Endpoint,
    payload: String,
    content_type: Option<String>,
) -> DeviceResult<()> {
    let session = connect(config).await?;

    let result = match endpoint {
        Endpoint::Telemetry => {
            session
                .send_telemetry(payload, content_type.as_deref())
                .await
        }
        Endpoint::Event => session.send_event(payload, content_type.as_deref()).await,
    };

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!("Failed to render send result: {}", e),
    }

    session.shutdown().await?;
    Ok(())
}

fn log_result(what: &str, result: &SendResult) {
    if result.is_success() {
        info!("{} sent", what);
    } else {
        warn!(
            code = result.result_code,
            reason = %result.result_code_text,
            "{} failed: {}",
            what,
            result.result_message
        );
    }
}

fn handle_config_command(config: &DeviceConfig, show: bool) -> DeviceResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| DeviceError::invalid_input(format!("Cannot render configuration: {e}")))?;
        println!("Current configuration:");
        println!("{rendered}");
        println!("Authentication: {}", config.auth_mode());
    }

    info!("Configuration validation complete");
    Ok(())
}
