use chrono::Local;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::telemetry::TelemetryEvent;

/// Shared threshold for both checks: amps for current magnitude, degrees
/// Celsius for motor temperature.
pub const STRESS_THRESHOLD: f64 = 50.0;

/// Minimum seconds between logged stress events for one vehicle.
pub const COOLDOWN_SECS: f64 = 60.0;

#[derive(Clone, Debug)]
pub struct StressRecord {
    pub vehicle_id: String,
    pub date: String,
    pub time: String,
    pub reason: String,
    pub motor_current: f64,
    pub motor_temp: f64,
}

impl StressRecord {
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{},{},{}",
            self.vehicle_id, self.date, self.time, self.reason, self.motor_current, self.motor_temp
        )
    }
}

/// Threshold detector with a per-vehicle cooldown so a sustained overload
/// produces one record per window instead of one per sample.
pub struct StressDetector {
    cooldown: f64,
    last_logged: Mutex<HashMap<String, f64>>,
}

impl StressDetector {
    pub fn new() -> Self {
        Self::with_cooldown(COOLDOWN_SECS)
    }

    pub fn with_cooldown(cooldown: f64) -> Self {
        StressDetector {
            cooldown,
            last_logged: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate raw (not filled-forward) signals at `timestamp` (epoch
    /// seconds). Returns a record only when a threshold is crossed and the
    /// vehicle is outside its cooldown window. A suppressed event does not
    /// reset the window.
    pub fn evaluate(
        &self,
        vehicle_id: &str,
        event: &TelemetryEvent,
        timestamp: f64,
    ) -> Option<StressRecord> {
        let current = event.signal(&["MotorCurrent", "Current"]);
        let temp = event.signal(&["MotorTemp", "MotorTemperature"]);

        let high_current = current.map_or(false, |c| c.abs() > STRESS_THRESHOLD);
        let overheat = temp.map_or(false, |t| t > STRESS_THRESHOLD);
        if !high_current && !overheat {
            return None;
        }

        {
            let mut last = self.last_logged.lock().unwrap();
            if let Some(prev) = last.get(vehicle_id) {
                if timestamp - prev < self.cooldown {
                    return None;
                }
            }
            last.insert(vehicle_id.to_string(), timestamp);
        }

        let mut reasons = Vec::new();
        if high_current {
            reasons.push("high current");
        }
        if overheat {
            reasons.push("overheat");
        }

        let now = Local::now();
        Some(StressRecord {
            vehicle_id: vehicle_id.to_string(),
            date: now.format("%Y-%m-%d").to_string(),
            time: now.format("%H:%M:%S").to_string(),
            reason: reasons.join(" + "),
            motor_current: current.unwrap_or(0.0),
            motor_temp: temp.unwrap_or(0.0),
        })
    }
}

impl Default for StressDetector {
    fn default() -> Self {
        Self::new()
    }
}
