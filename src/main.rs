mod adb;
mod agent;
mod device;
mod error;
mod http;
mod scrcpy;
mod session;
mod utils;
mod ws;

use adb::AdbExecutor;
use agent::AgentLogBroker;
use clap::Parser;
use error::Result;
use http::AppState;
use session::{Registry, StreamOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};

/// Multi-device Android control gateway: scrcpy video streaming over ADB,
/// fanned out to browsers and AI agent drivers over WebSocket and Socket.IO.
#[derive(Parser, Debug)]
#[command(name = "scrcpy-gateway")]
#[command(version)]
#[command(about = "Stream Android device screens to web and agent clients", long_about = None)]
struct Args {
    /// ADB executable path. Defaults to probing common install locations,
    /// then falling back to `adb` on PATH.
    #[arg(short, long, default_value = "adb")]
    adb_path: PathBuf,

    /// scrcpy-server JAR to push to each device.
    #[arg(short, long, default_value = "scrcpy-server.jar")]
    server_path: PathBuf,

    /// Bind address for the HTTP/WS server.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Bind port for the HTTP/WS server.
    #[arg(short = 'p', long, default_value = "8000")]
    port: u16,

    /// Default maximum video resolution (width or height, whichever is larger).
    #[arg(short = 'm', long, default_value = "1280")]
    max_size: u32,

    /// Default video bitrate in bits per second.
    #[arg(short = 'b', long, default_value = "4000000")]
    bit_rate: u32,

    /// Default maximum frames per second.
    #[arg(short = 'f', long, default_value = "60")]
    max_fps: u32,

    /// Default IDR (keyframe) interval in seconds.
    #[arg(short = 'i', long, default_value = "1")]
    idr_interval: u32,

    /// Screenshot polling interval for the `/ws/screen/{id}` fallback.
    #[arg(long, default_value = "2")]
    screenshot_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => {
            eprintln!("invalid log level '{}', using 'info'", other);
            Level::INFO
        }
    };
    tracing_subscriber::fmt().with_max_level(log_level).init();

    info!("starting scrcpy-gateway");
    info!("adb path (requested): {:?}", args.adb_path);
    info!("server jar: {:?}", args.server_path);

    let adb_path = AdbExecutor::resolve(Some(args.adb_path));
    let adb = Arc::new(AdbExecutor::new(adb_path));

    match adb.list_devices().await {
        Ok(devices) => info!("found {} connected device(s): {:?}", devices.len(), devices),
        Err(e) => tracing::warn!("failed to list adb devices at startup: {}", e),
    }

    let registry = Registry::new(adb, args.server_path);
    let agent_logs = Arc::new(AgentLogBroker::new());

    let default_stream_options = StreamOptions {
        max_size: args.max_size,
        bit_rate: args.bit_rate,
        max_fps: args.max_fps,
        idr_interval_secs: args.idr_interval,
        ..StreamOptions::default()
    };

    let state = Arc::new(AppState {
        registry,
        agent_logs,
        default_stream_options,
        screenshot_interval_secs: args.screenshot_interval_secs,
    });

    let app = http::build_router(state);

    let addr = format!("{}:{}", args.host, args.port);
    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
