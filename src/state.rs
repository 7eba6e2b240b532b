use chrono::Local;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::telemetry::TelemetryEvent;

/// Canonical fill-forward fields and the signal names that feed them, in
/// priority order. The first non-null source wins and is what gets stored.
pub const FIELD_SOURCES: &[(&str, &[&str])] = &[
    ("speed", &["Speed", "VehicleSpeed"]),
    ("motor_current", &["MotorCurrent", "Current"]),
    ("motor_temp", &["MotorTemp", "MotorTemperature"]),
    ("soc", &["SOC", "StateOfCharge", "BatterySOC"]),
    ("battery_voltage", &["BatteryVoltage", "PackVoltage"]),
    ("throttle", &["Throttle", "ThrottlePct"]),
    ("spray", &["Spray", "SprayStatus"]),
    ("field_mode", &["FieldMode"]),
];

pub const CSV_HEADER: &str = "timestamp,date,time,lat,lon,alt,sats,hdop,fix,heading,\
speed,motor_current,motor_temp,soc,battery_voltage,throttle,spray,field_mode";

/// One complete log row. Position fields are raw (never filled forward);
/// every other value is either from the current event or the last one
/// observed for this vehicle.
#[derive(Clone, Debug, Default)]
pub struct ReconciledRow {
    pub timestamp: Option<f64>,
    pub date: String,
    pub time: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub sats: Option<f64>,
    pub hdop: Option<f64>,
    pub fix: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub motor_current: Option<f64>,
    pub motor_temp: Option<f64>,
    pub soc: Option<f64>,
    pub battery_voltage: Option<f64>,
    pub throttle: Option<f64>,
    pub spray: Option<f64>,
    pub field_mode: Option<f64>,
}

fn cell(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

impl ReconciledRow {
    pub fn to_csv_line(&self) -> String {
        [
            cell(self.timestamp),
            self.date.clone(),
            self.time.clone(),
            cell(self.lat),
            cell(self.lon),
            cell(self.alt),
            cell(self.sats),
            cell(self.hdop),
            cell(self.fix),
            cell(self.heading),
            cell(self.speed),
            cell(self.motor_current),
            cell(self.motor_temp),
            cell(self.soc),
            cell(self.battery_voltage),
            cell(self.throttle),
            cell(self.spray),
            cell(self.field_mode),
        ]
        .join(",")
    }
}

type VehicleState = HashMap<&'static str, f64>;

/// Per-vehicle last-known-good signal cache. The outer lock is only held
/// long enough to fetch or insert the per-vehicle entry, so vehicles
/// reconcile without contending with each other.
pub struct StateStore {
    vehicles: Mutex<HashMap<String, Arc<Mutex<VehicleState>>>>,
}

impl StateStore {
    pub fn new() -> Self {
        StateStore {
            vehicles: Mutex::new(HashMap::new()),
        }
    }

    fn vehicle_entry(&self, vehicle_id: &str) -> Arc<Mutex<VehicleState>> {
        let mut vehicles = self.vehicles.lock().unwrap();
        vehicles
            .entry(vehicle_id.to_string())
            .or_default()
            .clone()
    }

    /// Fill-forward reconciliation: produce a complete row from a sparse
    /// event, updating the stored last-known values as a side effect.
    pub fn reconcile(&self, vehicle_id: &str, event: &TelemetryEvent) -> ReconciledRow {
        let entry = self.vehicle_entry(vehicle_id);
        let mut state = entry.lock().unwrap();

        let mut resolve = |canonical: &'static str, sources: &[&str]| -> Option<f64> {
            if let Some(v) = event.signal(sources) {
                state.insert(canonical, v);
                return Some(v);
            }
            state.get(canonical).copied()
        };

        let speed = resolve("speed", FIELD_SOURCES[0].1);
        let motor_current = resolve("motor_current", FIELD_SOURCES[1].1);
        let motor_temp = resolve("motor_temp", FIELD_SOURCES[2].1);
        let soc = resolve("soc", FIELD_SOURCES[3].1);
        let battery_voltage = resolve("battery_voltage", FIELD_SOURCES[4].1);
        let throttle = resolve("throttle", FIELD_SOURCES[5].1);
        let spray = resolve("spray", FIELD_SOURCES[6].1);
        let field_mode = resolve("field_mode", FIELD_SOURCES[7].1);

        // Heading arrives top-level rather than in the signal map but
        // fills forward the same way.
        let heading = match event.heading {
            Some(h) => {
                state.insert("heading", h);
                Some(h)
            }
            None => state.get("heading").copied(),
        };

        let gnss = event.gnss.as_ref();
        let now = Local::now();

        ReconciledRow {
            timestamp: event.timestamp_secs(),
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            // GPS is never filled forward: a stale fix stitched onto a
            // fresh one would draw a straight-line segment that the
            // vehicle never drove.
            lat: gnss.and_then(|g| g.lat),
            lon: gnss.and_then(|g| g.lon),
            alt: gnss.and_then(|g| g.alt),
            sats: gnss.and_then(|g| g.sats),
            hdop: gnss.and_then(|g| g.hdop),
            fix: gnss.and_then(|g| g.fix),
            heading,
            speed,
            motor_current,
            motor_temp,
            soc,
            battery_voltage,
            throttle,
            spray,
            field_mode,
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::GnssFix;

    fn event_with_signals(pairs: &[(&str, f64)]) -> TelemetryEvent {
        let signals = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(*v)))
            .collect();
        TelemetryEvent {
            signals: Some(signals),
            ..Default::default()
        }
    }

    #[test]
    fn test_fill_forward_uses_last_known_value() {
        let store = StateStore::new();
        let row = store.reconcile("v1", &event_with_signals(&[("Speed", 10.0)]));
        assert_eq!(row.speed, Some(10.0));

        // Next event omits Speed entirely
        let row = store.reconcile("v1", &event_with_signals(&[("SOC", 90.0)]));
        assert_eq!(row.speed, Some(10.0));
        assert_eq!(row.soc, Some(90.0));
    }

    #[test]
    fn test_current_value_overwrites_stored() {
        let store = StateStore::new();
        store.reconcile("v1", &event_with_signals(&[("Speed", 10.0)]));
        let row = store.reconcile("v1", &event_with_signals(&[("Speed", 20.0)]));
        assert_eq!(row.speed, Some(20.0));
        let row = store.reconcile("v1", &TelemetryEvent::default());
        assert_eq!(row.speed, Some(20.0));
    }

    #[test]
    fn test_never_observed_stays_unset() {
        let store = StateStore::new();
        let row = store.reconcile("v1", &TelemetryEvent::default());
        assert_eq!(row.speed, None);
        assert_eq!(row.soc, None);
    }

    #[test]
    fn test_alternate_source_names_fill_same_field() {
        let store = StateStore::new();
        let row = store.reconcile("v1", &event_with_signals(&[("StateOfCharge", 75.0)]));
        assert_eq!(row.soc, Some(75.0));
        // Higher-priority name wins when both are present
        let row = store.reconcile(
            "v1",
            &event_with_signals(&[("SOC", 60.0), ("StateOfCharge", 99.0)]),
        );
        assert_eq!(row.soc, Some(60.0));
        // And the winning value is what was stored
        let row = store.reconcile("v1", &TelemetryEvent::default());
        assert_eq!(row.soc, Some(60.0));
    }

    #[test]
    fn test_position_never_filled_forward() {
        let store = StateStore::new();
        let with_fix = TelemetryEvent {
            gnss: Some(GnssFix {
                lat: Some(52.1),
                lon: Some(4.3),
                alt: Some(10.0),
                sats: Some(9.0),
                hdop: Some(0.8),
                fix: Some(1.0),
            }),
            ..Default::default()
        };
        let row = store.reconcile("v1", &with_fix);
        assert_eq!(row.lat, Some(52.1));

        let row = store.reconcile("v1", &TelemetryEvent::default());
        assert_eq!(row.lat, None);
        assert_eq!(row.lon, None);
        assert_eq!(row.alt, None);
    }

    #[test]
    fn test_heading_fills_forward() {
        let store = StateStore::new();
        let row = store.reconcile(
            "v1",
            &TelemetryEvent {
                heading: Some(180.0),
                ..Default::default()
            },
        );
        assert_eq!(row.heading, Some(180.0));
        let row = store.reconcile("v1", &TelemetryEvent::default());
        assert_eq!(row.heading, Some(180.0));
    }

    #[test]
    fn test_vehicles_are_independent() {
        let store = StateStore::new();
        store.reconcile("v1", &event_with_signals(&[("Speed", 10.0)]));
        let row = store.reconcile("v2", &TelemetryEvent::default());
        assert_eq!(row.speed, None);
    }

    #[test]
    fn test_csv_line_has_empty_cells_for_unset() {
        let store = StateStore::new();
        let row = store.reconcile("v1", &event_with_signals(&[("Speed", 12.5)]));
        let line = row.to_csv_line();
        assert_eq!(line.split(',').count(), CSV_HEADER.split(',').count());
        assert!(line.contains("12.5"));
        // lat cell is empty
        assert_eq!(line.split(',').nth(3), Some(""));
    }
}
