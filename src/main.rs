//! SockHub Server: real-time bidirectional messaging
//!
//! Main entry point that loads configuration, installs logging, registers
//! the demo event handlers and starts the server.

use clap::Parser;
use serde_json::{Value, json};
use tracing_subscriber::{EnvFilter, fmt};

use sockhub_core::config::AppConfig;
use sockhub_core::AppResult;
use sockhub_realtime::{Connection, EventContext, HandlerError, HandlerResult, RealtimeEngine};

/// Command-line options. Each one overrides the loaded configuration.
#[derive(Debug, Parser)]
#[command(name = "sockhub-server", version, about = "SockHub real-time server")]
struct Args {
    /// Configuration environment (`config/{env}.toml` is layered over `config/default.toml`)
    #[arg(short, long, env = "SOCKHUB_ENV", default_value = "development")]
    env: String,

    /// Bind host
    #[arg(long)]
    host: Option<String>,

    /// Bind port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_configuration(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from files and environment, then apply CLI overrides.
fn load_configuration(args: &Args) -> AppResult<AppConfig> {
    let mut config = AppConfig::load(&args.env)?;
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    Ok(config)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> AppResult<()> {
    tracing::info!("Starting SockHub v{}", env!("CARGO_PKG_VERSION"));

    let engine = RealtimeEngine::new(config.realtime.clone());
    engine.on_connection(register_handlers);

    sockhub_api::run_server(config, engine).await
}

/// Demo handlers installed on every new connection.
fn register_handlers(conn: &Connection) {
    tracing::info!(conn_id = %conn.id(), "a user connected");

    // Older clients misspell the greeting event.
    conn.on("messgae", greet);
    conn.on("message", greet);
    conn.on("echo", |_ctx, data| async move { Ok(data) });
    conn.on("join", |ctx, data| async move {
        let room = room_name(&data)?;
        ctx.connection.join(room)?;
        Ok(json!({ "rooms": ctx.connection.rooms() }))
    });
    conn.on("leave", |ctx, data| async move {
        let room = room_name(&data)?;
        Ok(json!({ "left": ctx.connection.leave(room) }))
    });
    conn.on("chat", |ctx, data| async move {
        let room = room_name(&data)?;
        let text = data.get("text").cloned().unwrap_or(Value::Null);
        let report = ctx
            .connection
            .broadcast_to(room, "chat", json!({ "from": ctx.connection.id(), "text": text }))
            .await?;
        Ok(serde_json::to_value(report)?)
    });

    conn.on_disconnect(|conn, reason| {
        tracing::info!(conn_id = %conn.id(), reason = %reason, "user disconnected");
    });
}

async fn greet(ctx: EventContext, data: Value) -> HandlerResult {
    tracing::info!(conn_id = %ctx.connection.id(), data = %data, "message received");
    Ok(json!("hi client!"))
}

fn room_name(data: &Value) -> Result<&str, HandlerError> {
    data.get("room")
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::new("expected {\"room\": <name>}"))
}
