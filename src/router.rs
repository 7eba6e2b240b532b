use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::persist::LogWriter;
use crate::registry::SubscriberRegistry;
use crate::state::StateStore;
use crate::stress::StressDetector;
use crate::telemetry::{current_timestamp, TelemetryEvent};

/// Emit an ingest summary line every this many events per vehicle.
const SUMMARY_EVERY: u64 = 100;

/// Extract the vehicle identity from the second topic segment
/// (`vehicle/{id}/data`). Under-length topics yield `None`.
pub fn vehicle_id_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    parts.next()?;
    match parts.next() {
        Some(id) if !id.is_empty() => Some(id),
        _ => None,
    }
}

/// Top-level ingest coordinator. Classifies an inbound message, drives
/// reconciliation, persistence and stress detection, then fans the live
/// event out. Nothing here propagates an error upward: every step logs
/// its own failures and the remaining steps still run.
pub struct IngestionRouter {
    state: StateStore,
    stress: StressDetector,
    writer: LogWriter,
    registry: Arc<SubscriberRegistry>,
    ingest_counts: Mutex<HashMap<String, u64>>,
}

impl IngestionRouter {
    pub fn new(writer: LogWriter, registry: Arc<SubscriberRegistry>) -> Self {
        IngestionRouter {
            state: StateStore::new(),
            stress: StressDetector::new(),
            writer,
            registry,
            ingest_counts: Mutex::new(HashMap::new()),
        }
    }

    pub async fn route(&self, topic: &str, payload: &[u8]) {
        let vehicle_id = match vehicle_id_from_topic(topic) {
            Some(id) => id.to_string(),
            None => {
                log::debug!("[ROUTER] dropping message on under-length topic {:?}", topic);
                return;
            }
        };

        let mut event: TelemetryEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("[ROUTER] dropping undecodable payload on {}: {}", topic, e);
                return;
            }
        };
        // Routing-derived identity always wins over whatever the payload claims.
        event.vehicle_id = vehicle_id.clone();

        let row = self.state.reconcile(&vehicle_id, &event);
        if let Err(e) = self.writer.append(&vehicle_id, &row) {
            log::error!("[LOG] append failed for {}: {}", vehicle_id, e);
        }

        if let Some(record) = self.stress.evaluate(&vehicle_id, &event, current_timestamp()) {
            log::warn!(
                "[STRESS] {} {} (current={}, temp={})",
                vehicle_id,
                record.reason,
                record.motor_current,
                record.motor_temp
            );
            if let Err(e) = self.writer.record_stress(&record) {
                log::error!("[LOG] stress append failed for {}: {}", vehicle_id, e);
            }
        }

        // Observers get the live event as received, not the reconciled row.
        match serde_json::to_string(&event) {
            Ok(text) => self.registry.publish(&vehicle_id, &text).await,
            Err(e) => log::error!("[ROUTER] serialize failed for {}: {}", vehicle_id, e),
        }

        self.bump_ingest_count(&vehicle_id);
    }

    fn bump_ingest_count(&self, vehicle_id: &str) {
        let mut counts = self.ingest_counts.lock().unwrap();
        let count = counts.entry(vehicle_id.to_string()).or_insert(0);
        *count += 1;
        if *count % SUMMARY_EVERY == 0 {
            log::info!("[ROUTER] {}: {} events ingested", vehicle_id, count);
        }
    }
}
