use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::router::IngestionRouter;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    /// Wildcard subscription, e.g. `vehicle/+/data`.
    pub topic: String,
}

/// Broker-facing ingest loop. Every received publish is handed to the
/// router; connection errors tear the session down and a fresh one is
/// started after a fixed delay, forever.
pub async fn run_subscriber(config: MqttConfig, router: Arc<IngestionRouter>) {
    loop {
        if let Err(e) = run_connection(&config, &router).await {
            log::error!("[MQTT] connection error: {}", e);
        }
        log::warn!("[MQTT] reconnecting in {}s", RECONNECT_DELAY.as_secs());
        sleep(RECONNECT_DELAY).await;
    }
}

async fn run_connection(config: &MqttConfig, router: &IngestionRouter) -> Result<()> {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(Duration::from_secs(60));
    options.set_clean_session(true);
    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        options.set_credentials(user, pass);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 100);

    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::ConnAck(_)) => {
                log::info!("[MQTT] connected to {}:{}", config.host, config.port);
                // Subscribe on every (re)connect; the session is clean.
                client.subscribe(&config.topic, QoS::AtMostOnce).await?;
            }
            Event::Incoming(Packet::SubAck(_)) => {
                log::info!("[MQTT] subscribed to {}", config.topic);
            }
            Event::Incoming(Packet::Publish(publish)) => {
                router.route(&publish.topic, &publish.payload).await;
            }
            _ => {}
        }
    }
}
