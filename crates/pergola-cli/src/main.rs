//! Pergola CLI
//!
//! Main entry point for the pergola shade controller server.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use pergola_controller::{create_router, AppState, BroadcastHub, Config, Controller, TransportKind};
use pergola_hardware::{
    BridgeRunner, HardwareBridge, HardwareCommand, ModbusBridge, SensorFrame, SerialBridge,
    SimulatedBridge,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Board commands that may wait for the bridge runner.
const HARDWARE_QUEUE: usize = 32;

/// Sensor frames that may wait for the controller.
const FRAME_QUEUE: usize = 8;

/// Pergola - sun-tracking shade controller
///
/// Drives the panel actuators from light sensors and the sun position, and
/// serves the state to WebSocket clients.
#[derive(Parser, Debug)]
#[command(name = "pergola")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: pergola.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Serial device to use instead of probing the configured list
    #[arg(long, value_name = "PATH")]
    serial_port: Option<String>,

    /// Run against a simulated board
    #[arg(long)]
    simulate: bool,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Pergola controller starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Wires the bridge runner, the controller and the HTTP server together and
/// serves until Ctrl+C.
async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    // Apply CLI argument overrides
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(serial_port) = args.serial_port {
        config.hardware.serial_ports = vec![serial_port];
    }
    if args.simulate {
        config.hardware.transport = TransportKind::Simulated;
    }

    // Re-validate after overrides
    config.validate()?;

    print_config(&config);

    let (hardware_tx, hardware_rx) = mpsc::channel(HARDWARE_QUEUE);
    let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE);
    let bridge_handle = spawn_bridge(&config, hardware_rx, frames_tx);

    let hub = BroadcastHub::new();
    let (controller, handle) = Controller::from_config(&config, hub.clone(), hardware_tx);
    let controller_handle = tokio::spawn(controller.run(frames_rx));

    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    let router = create_router(AppState::new(handle, hub));

    println!("Listening on ws://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    controller_handle.abort();
    bridge_handle.abort();
    Ok(())
}

/// Starts the bridge runner for the configured transport.
fn spawn_bridge(
    config: &Config,
    commands: mpsc::Receiver<HardwareCommand>,
    frames: mpsc::Sender<SensorFrame>,
) -> JoinHandle<()> {
    let poll = config.sensor_poll_interval();
    match config.hardware.transport {
        TransportKind::Serial => {
            let bridge = SerialBridge::new(config.hardware.serial_settings());
            spawn_runner(BridgeRunner::new(bridge, poll), commands, frames)
        }
        TransportKind::Modbus => {
            let bridge = ModbusBridge::new(
                config.hardware.serial_settings(),
                config.hardware.modbus_unit_id,
            );
            spawn_runner(BridgeRunner::new(bridge, poll), commands, frames)
        }
        TransportKind::Simulated => {
            tracing::warn!("Running with a simulated board");
            let bridge = SimulatedBridge::new(config.hardware.simulated_readings);
            spawn_runner(BridgeRunner::new(bridge, poll), commands, frames)
        }
    }
}

fn spawn_runner<B>(
    runner: BridgeRunner<B>,
    commands: mpsc::Receiver<HardwareCommand>,
    frames: mpsc::Sender<SensorFrame>,
) -> JoinHandle<()>
where
    B: HardwareBridge + 'static,
{
    tokio::spawn(async move {
        runner.run(commands, frames).await;
        tracing::info!("Bridge runner stopped");
    })
}

/// Resolves when the process receives Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Listen address: {}", config.bind_address());
    println!("  Night threshold: {} lux", config.night_threshold_lux);
    println!("  Sensor poll: {}ms", config.sensor_poll_ms);
    println!("  Broadcast interval: {}ms", config.broadcast_interval_ms);
    match config.location {
        Some(location) => println!(
            "  Location: {:.4}, {:.4}",
            location.latitude, location.longitude
        ),
        None => println!("  Location: none (light sensors only)"),
    }
    println!("  Transport: {}", config.hardware.transport);
    if config.hardware.transport.uses_serial_port() {
        println!("  Serial ports: {}", config.hardware.serial_ports.join(", "));
        println!("  Baud rate: {}", config.hardware.baud_rate);
    }
    if config.hardware.transport == TransportKind::Modbus {
        println!("  Modbus unit: {}", config.hardware.modbus_unit_id);
    }
}
