use anyhow::Result;
use clap::Parser;
use std::sync::Arc;

use fleet_telemetry_rs::mqtt::{self, MqttConfig};
use fleet_telemetry_rs::persist::LogWriter;
use fleet_telemetry_rs::registry::SubscriberRegistry;
use fleet_telemetry_rs::router::IngestionRouter;
use fleet_telemetry_rs::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "fleet_telemetry")]
#[command(about = "Fleet telemetry hub - MQTT ingest, live WebSocket fan-out, per-day CSV logs", long_about = None)]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value = "1883")]
    broker_port: u16,

    /// MQTT username
    #[arg(long)]
    broker_username: Option<String>,

    /// MQTT password
    #[arg(long)]
    broker_password: Option<String>,

    /// MQTT client id
    #[arg(long, default_value = "fleet_telemetry_hub")]
    client_id: String,

    /// Telemetry topic pattern (second segment is the vehicle id)
    #[arg(long, default_value = "vehicle/+/data")]
    topic: String,

    /// HTTP/WebSocket bind port
    #[arg(long, default_value = "8000")]
    http_port: u16,

    /// Directory for per-day CSV logs
    #[arg(long, default_value = "logs")]
    log_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    log::info!("Fleet Telemetry Hub starting");
    log::info!("  Broker: {}:{}", args.broker_host, args.broker_port);
    log::info!("  Topic: {}", args.topic);
    log::info!("  HTTP Port: {}", args.http_port);
    log::info!("  Log Dir: {}", args.log_dir);

    let registry = Arc::new(SubscriberRegistry::new());
    let writer = LogWriter::new(&args.log_dir)?;
    let router = Arc::new(IngestionRouter::new(writer, registry.clone()));

    let mqtt_config = MqttConfig {
        host: args.broker_host,
        port: args.broker_port,
        username: args.broker_username,
        password: args.broker_password,
        client_id: args.client_id,
        topic: args.topic,
    };
    tokio::spawn(mqtt::run_subscriber(mqtt_config, router));

    server::start_server(
        AppState {
            registry,
            log_dir: args.log_dir.into(),
        },
        args.http_port,
    )
    .await
}
