//! vibemq-aio demo binary.
//!
//! Usage:
//!   vibemq-aio hub [--bind ADDR]
//!   vibemq-aio tcp-client --host HOST --port PORT
//!   vibemq-aio mqtt --host HOST --port PORT --topic TOPIC
//!   vibemq-aio signal-demo
//!
//! Each subcommand exercises one component end to end against the
//! configuration loaded from `--config` (file) layered with
//! `VIBEMQAIO__SECTION__FIELD` environment overrides, the same precedence
//! the library's `Config::load` documents.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use vibemq_aio::config::Config;
use vibemq_aio::hub::SocketHub;
use vibemq_aio::mqtt::MqttClient;
use vibemq_aio::protocol::QoS;
use vibemq_aio::signal::SignalBus;
use vibemq_aio::tcp_client::TcpClient;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// vibemq-aio - async networking primitives demo
#[derive(Parser, Debug)]
#[command(name = "vibemq-aio")]
#[command(author = "VibeMQ-AIO Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Exercise SocketHub, TcpClient, MqttClient, and SignalBus")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a SocketHub server that echoes and broadcasts text messages.
    Hub {
        /// Port to listen on
        #[arg(short, long, default_value_t = 9000)]
        port: u16,
    },
    /// Connect to a TCP server, send one line, print what comes back.
    TcpClient {
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: u16,
        /// Line to send after connecting
        #[arg(long, default_value = "ping")]
        line: String,
    },
    /// Connect to an MQTT broker, subscribe, publish once, print inbound messages.
    Mqtt {
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 1883)]
        port: u16,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "hello from vibemq-aio")]
        payload: String,
    },
    /// Register SIGINT/SIGTERM handlers and wait for one.
    SignalDemo,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = if let Some(path) = &args.config {
        match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("error loading config file: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::from_env().unwrap_or_default()
    };

    let log_level = args.log_level.unwrap_or_else(|| match file_config.log.level.to_lowercase().as_str() {
        "error" => LogLevel::Error,
        "warn" => LogLevel::Warn,
        "info" => LogLevel::Info,
        "debug" => LogLevel::Debug,
        "trace" => LogLevel::Trace,
        _ => LogLevel::Warn,
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Hub { port } => run_hub(file_config, port).await,
        Command::TcpClient { host, port, line } => run_tcp_client(file_config, host, port, line).await,
        Command::Mqtt { host, port, topic, payload } => run_mqtt(file_config, host, port, topic, payload).await,
        Command::SignalDemo => run_signal_demo(file_config),
    }
}

async fn run_hub(config: Config, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let hub = SocketHub::new(config.hub.to_hub_config());

    hub.on_connect(|id, addr| info!("client {} connected from {}", id, addr)).await;
    hub.on_disconnect(|id, reason| info!("client {} disconnected: {}", id, reason)).await;
    hub.on_message(|message, from| info!("{} bytes from client {}", message.payload.len(), from)).await;
    hub.on_error(|err, id| error!("client {}: {}", id, err)).await;

    info!("starting hub on port {}", port);
    hub.start(port).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down hub");
    hub.stop().await?;
    Ok(())
}

async fn run_tcp_client(
    config: Config,
    host: String,
    port: u16,
    line: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = TcpClient::new(config.tcp_client.to_connection_config());
    if config.tcp_client.heartbeat_interval > Duration::ZERO {
        client.set_heartbeat_interval(config.tcp_client.heartbeat_interval, None);
    }

    client.on_connected(|| info!("connected"));
    client.on_disconnected(|| info!("disconnected"));
    client.on_error(|err| error!("transport error: {}", err));

    if !client.connect(&host, port, Some(Duration::from_secs(5))).await {
        error!("failed to connect to {}:{}", host, port);
        std::process::exit(1);
    }

    let mut payload = line.into_bytes();
    payload.push(b'\n');
    client.send(Bytes::from(payload)).await;

    let reply = client.receive_until(b'\n', Some(Duration::from_secs(5))).await;
    info!("received: {}", reply.trim_end());

    client.disconnect().await;
    Ok(())
}

async fn run_mqtt(
    config: Config,
    host: String,
    port: u16,
    topic: String,
    payload: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let mqtt_config = config.mqtt.to_mqtt_config()?;
    let client = MqttClient::new(mqtt_config);

    client.on_connected(|session_present| info!("connected (session_present={})", session_present));
    client.on_disconnected(|| info!("disconnected"));
    client.on_error(|err| error!("mqtt error: {}", err));
    client.on_message(|message| {
        info!(
            "message on {}: {} bytes (qos={:?})",
            message.topic,
            message.payload.len(),
            message.qos
        );
    });

    client.connect(&host, port, Some(Duration::from_secs(10))).await?;
    client.subscribe(&[(topic.as_str(), QoS::AtLeastOnce)]).await?;
    client
        .publish(&topic, Bytes::from(payload.into_bytes()), QoS::AtLeastOnce, false)
        .await?;

    tokio::time::sleep(Duration::from_secs(2)).await;

    client.disconnect().await;
    Ok(())
}

fn run_signal_demo(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let bus = SignalBus::global();
    bus.set_handler_timeout(config.signal.handler_timeout);

    let (tx, rx) = std::sync::mpsc::channel();
    bus.register(
        signal_hook::consts::signal::SIGINT,
        std::sync::Arc::new(move |sig| {
            let _ = tx.send(sig);
        }),
        100,
        "cli-shutdown",
    );

    info!("waiting for SIGINT (Ctrl+C)...");
    match rx.recv() {
        Ok(sig) => info!("received signal {}, exiting", sig),
        Err(_) => error!("signal channel closed unexpectedly"),
    }
    Ok(())
}
