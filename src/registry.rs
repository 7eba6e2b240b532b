use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc::Sender;

/// Per-sink delivery budget; a slower observer is treated as gone.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Identifies one registration. Dropping or re-removing a handle is
/// always safe.
#[derive(Clone, Debug)]
pub struct SubscriptionHandle {
    vehicle_id: String,
    id: u64,
}

/// Observers grouped by vehicle identity. The registry only keeps sender
/// clones; the channel receiver lives with the connection task, so a
/// closed channel is indistinguishable from a disconnect and prunes the
/// same way a send timeout does.
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<(u64, Sender<String>)>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        SubscriberRegistry {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, vehicle_id: &str, sink: Sender<String>) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.lock().unwrap();
        subs.entry(vehicle_id.to_string())
            .or_default()
            .push((id, sink));
        log::info!(
            "[WS] subscribed to {} ({} observers)",
            vehicle_id,
            subs[vehicle_id].len()
        );
        SubscriptionHandle {
            vehicle_id: vehicle_id.to_string(),
            id,
        }
    }

    /// Idempotent: unknown or already-removed handles are a no-op.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.remove(&handle.vehicle_id, &[handle.id]);
    }

    fn remove(&self, vehicle_id: &str, ids: &[u64]) {
        let mut subs = self.subscribers.lock().unwrap();
        if let Some(sinks) = subs.get_mut(vehicle_id) {
            sinks.retain(|(id, _)| !ids.contains(id));
            if sinks.is_empty() {
                subs.remove(vehicle_id);
            }
        }
    }

    /// Deliver `text` to every observer of `vehicle_id`. Sends run
    /// concurrently with a per-sink timeout; failed sinks are collected
    /// during iteration and pruned afterwards so a bad observer never
    /// blocks or aborts delivery to its siblings. Publishing to a vehicle
    /// nobody watches returns immediately without allocating an entry.
    pub async fn publish(&self, vehicle_id: &str, text: &str) {
        let targets: Vec<(u64, Sender<String>)> = {
            let subs = self.subscribers.lock().unwrap();
            match subs.get(vehicle_id) {
                Some(sinks) => sinks.clone(),
                None => return,
            }
        };

        let sends = targets.iter().map(|(id, sink)| async move {
            match sink.send_timeout(text.to_string(), SEND_TIMEOUT).await {
                Ok(()) => None,
                Err(_) => Some(*id),
            }
        });
        let failed: Vec<u64> = join_all(sends).await.into_iter().flatten().collect();

        if !failed.is_empty() {
            log::warn!(
                "[WS] pruning {} dead observer(s) of {}",
                failed.len(),
                vehicle_id
            );
            self.remove(vehicle_id, &failed);
        }
    }

    pub fn subscriber_count(&self, vehicle_id: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(vehicle_id)
            .map_or(0, |sinks| sinks.len())
    }

    /// Number of vehicle ids currently holding at least one observer.
    pub fn tracked_vehicles(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
