use chrono::{Local, NaiveDate};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::state::{ReconciledRow, CSV_HEADER};
use crate::stress::StressRecord;

pub const STRESS_FILE: &str = "stress_events.csv";
const STRESS_HEADER: &str = "vehicle_id,date,time,reason,motor_current,motor_temp";

pub fn day_file_name(date: NaiveDate, vehicle_id: &str) -> String {
    format!("{}_{}.csv", date.format("%Y-%m-%d"), vehicle_id)
}

/// Append-only CSV writer: one file per vehicle per calendar day, plus a
/// single cross-vehicle stress-event file that is never rotated. All I/O
/// errors surface as `io::Result` and the caller decides whether to
/// swallow them (the ingestion path does).
pub struct LogWriter {
    log_dir: PathBuf,
    swept_day: Mutex<Option<NaiveDate>>,
    vehicle_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    stress_lock: Mutex<()>,
}

impl LogWriter {
    pub fn new(log_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let log_dir = log_dir.into();
        fs::create_dir_all(&log_dir)?;
        Ok(LogWriter {
            log_dir,
            swept_day: Mutex::new(None),
            vehicle_locks: Mutex::new(HashMap::new()),
            stress_lock: Mutex::new(()),
        })
    }

    /// Path of today's file for a vehicle.
    pub fn today_file(&self, vehicle_id: &str) -> PathBuf {
        self.log_dir
            .join(day_file_name(Local::now().date_naive(), vehicle_id))
    }

    fn vehicle_lock(&self, vehicle_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.vehicle_locks.lock().unwrap();
        locks
            .entry(vehicle_id.to_string())
            .or_default()
            .clone()
    }

    /// Delete every day-file whose embedded date is not `today`. The
    /// stress file is exempt. Runs at most once per observed day.
    fn sweep_if_new_day(&self, today: NaiveDate) {
        {
            let mut swept = self.swept_day.lock().unwrap();
            if *swept == Some(today) {
                return;
            }
            *swept = Some(today);
        }

        let prefix = today.format("%Y-%m-%d").to_string();
        let entries = match fs::read_dir(&self.log_dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("[LOG] retention sweep failed to list {:?}: {}", self.log_dir, e);
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(".csv") || name == STRESS_FILE || name.starts_with(&prefix) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => log::info!("[LOG] retention sweep removed {}", name),
                Err(e) => log::error!("[LOG] retention sweep failed on {}: {}", name, e),
            }
        }
    }

    fn append_line(path: &Path, header: &str, line: &str) -> io::Result<()> {
        let fresh = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if fresh {
            writeln!(file, "{}", header)?;
        }
        writeln!(file, "{}", line)
    }

    /// Append one reconciled row to today's file for this vehicle,
    /// writing the header on first use and running the retention sweep on
    /// day rollover.
    pub fn append(&self, vehicle_id: &str, row: &ReconciledRow) -> io::Result<()> {
        let today = Local::now().date_naive();
        self.sweep_if_new_day(today);

        let lock = self.vehicle_lock(vehicle_id);
        let _guard = lock.lock().unwrap();
        let path = self.log_dir.join(day_file_name(today, vehicle_id));
        Self::append_line(&path, CSV_HEADER, &row.to_csv_line())
    }

    /// Append to the cross-vehicle stress log.
    pub fn record_stress(&self, record: &StressRecord) -> io::Result<()> {
        let _guard = self.stress_lock.lock().unwrap();
        let path = self.log_dir.join(STRESS_FILE);
        Self::append_line(&path, STRESS_HEADER, &record.to_csv_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateStore;
    use crate::telemetry::TelemetryEvent;

    fn sample_row() -> ReconciledRow {
        let store = StateStore::new();
        store.reconcile("v1", &TelemetryEvent::default())
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::new(dir.path()).unwrap();
        let row = sample_row();
        writer.append("v1", &row).unwrap();
        writer.append("v1", &row).unwrap();

        let contents = fs::read_to_string(writer.today_file("v1")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert_ne!(lines[1], CSV_HEADER);
    }

    #[test]
    fn test_sweep_removes_stale_days_but_not_stress_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2000-01-01_v1.csv"), "old\n").unwrap();
        fs::write(dir.path().join(STRESS_FILE), "keep\n").unwrap();

        let writer = LogWriter::new(dir.path()).unwrap();
        writer.append("v1", &sample_row()).unwrap();

        assert!(!dir.path().join("2000-01-01_v1.csv").exists());
        assert!(dir.path().join(STRESS_FILE).exists());
        assert!(writer.today_file("v1").exists());
    }

    #[test]
    fn test_stress_records_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::new(dir.path()).unwrap();
        let record = StressRecord {
            vehicle_id: "v1".to_string(),
            date: "2026-08-30".to_string(),
            time: "12:00:00".to_string(),
            reason: "high current".to_string(),
            motor_current: 80.0,
            motor_temp: 30.0,
        };
        writer.record_stress(&record).unwrap();
        writer.record_stress(&record).unwrap();

        let contents = fs::read_to_string(dir.path().join(STRESS_FILE)).unwrap();
        assert_eq!(contents.lines().count(), 3);
        assert!(contents.contains("high current"));
    }

    #[test]
    fn test_vehicles_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogWriter::new(dir.path()).unwrap();
        writer.append("v1", &sample_row()).unwrap();
        writer.append("v2", &sample_row()).unwrap();
        assert!(writer.today_file("v1").exists());
        assert!(writer.today_file("v2").exists());
    }
}
