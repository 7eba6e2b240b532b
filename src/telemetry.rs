use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamps at or above this magnitude are epoch milliseconds.
/// Heuristic carried over from the device firmware, which reports either
/// unit depending on GNSS module revision.
const EPOCH_MS_THRESHOLD: f64 = 1.0e12;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GnssFix {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub sats: Option<f64>,
    pub hdop: Option<f64>,
    pub fix: Option<f64>,
}

/// One inbound measurement as published on the broker. Sparse by design:
/// devices send only the blocks that changed since the last sample.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Always stamped from the topic by the router; any payload value is
    /// overwritten.
    #[serde(default)]
    pub vehicle_id: String,
    #[serde(default)]
    pub gnss: Option<GnssFix>,
    /// Open signal map; null values count as absent.
    #[serde(default)]
    pub signals: Option<HashMap<String, Option<f64>>>,
    #[serde(default)]
    pub heading: Option<f64>,
    /// Source timestamp, epoch seconds or milliseconds.
    #[serde(default)]
    pub timestamp: Option<f64>,
    /// Any payload fields we don't model are kept and passed through to
    /// live observers verbatim.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TelemetryEvent {
    /// Source timestamp normalized to epoch seconds.
    pub fn timestamp_secs(&self) -> Option<f64> {
        self.timestamp.map(|t| {
            if t >= EPOCH_MS_THRESHOLD {
                t / 1000.0
            } else {
                t
            }
        })
    }

    /// First non-null value among `sources`, in priority order.
    pub fn signal(&self, sources: &[&str]) -> Option<f64> {
        let signals = self.signals.as_ref()?;
        for name in sources {
            if let Some(Some(v)) = signals.get(*name) {
                return Some(*v);
            }
        }
        None
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_seconds_passthrough() {
        let event = TelemetryEvent {
            timestamp: Some(1_700_000_000.0),
            ..Default::default()
        };
        assert_eq!(event.timestamp_secs(), Some(1_700_000_000.0));
    }

    #[test]
    fn test_timestamp_millis_normalized() {
        let event = TelemetryEvent {
            timestamp: Some(1_700_000_000_000.0),
            ..Default::default()
        };
        assert_eq!(event.timestamp_secs(), Some(1_700_000_000.0));
    }

    #[test]
    fn test_decode_sparse_payload() {
        let event: TelemetryEvent =
            serde_json::from_str(r#"{"signals":{"Speed":12.5,"SOC":null}}"#).unwrap();
        assert!(event.gnss.is_none());
        assert_eq!(event.signal(&["Speed"]), Some(12.5));
        // null counts as absent
        assert_eq!(event.signal(&["SOC"]), None);
    }

    #[test]
    fn test_signal_priority_order() {
        let event: TelemetryEvent = serde_json::from_str(
            r#"{"signals":{"BatterySOC":81.0,"SOC":80.0,"StateOfCharge":79.0}}"#,
        )
        .unwrap();
        assert_eq!(
            event.signal(&["SOC", "StateOfCharge", "BatterySOC"]),
            Some(80.0)
        );
    }

    #[test]
    fn test_unknown_fields_survive_reserialization() {
        let event: TelemetryEvent =
            serde_json::from_str(r#"{"firmware":"v2.1","signals":{"Speed":3.0}}"#).unwrap();
        let text = serde_json::to_string(&event).unwrap();
        assert!(text.contains("firmware"));
    }
}
