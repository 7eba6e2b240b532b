use chrono::Local;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::persist::day_file_name;

/// Segments at or below this length are GPS jitter and dropped entirely.
pub const NOISE_FLOOR_KM: f64 = 0.0005;

const EARTH_RADIUS_KM: f64 = 6371.0;

// Column positions in the day-file layout (see state::CSV_HEADER).
const LAT_COL: usize = 3;
const LON_COL: usize = 4;
const SPRAY_COL: usize = 16;
const FIELD_MODE_COL: usize = 17;

/// (lat, lon, spray flag, field-mode flag); serializes as a JSON array.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct PathPoint(pub f64, pub f64, pub f64, pub f64);

#[derive(Debug, Default, Serialize)]
pub struct VehicleHistory {
    pub path: Vec<PathPoint>,
    pub gps_distance_km: f64,
    pub spray_distance_km: f64,
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_KM * c
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn parse_point(line: &str) -> Option<PathPoint> {
    let cols: Vec<&str> = line.split(',').collect();
    let lat: f64 = cols.get(LAT_COL)?.parse().ok()?;
    let lon: f64 = cols.get(LON_COL)?.parse().ok()?;
    if !lat.is_finite() || !lon.is_finite() {
        return None;
    }
    let spray = cols
        .get(SPRAY_COL)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);
    let field_mode = cols
        .get(FIELD_MODE_COL)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);
    Some(PathPoint(lat, lon, spray, field_mode))
}

/// Distances over an ordered point list. Sub-floor segments count toward
/// neither total; a counted segment adds to the spray subtotal when its
/// starting point's spray flag is 1.
pub fn compute_distances(points: &[PathPoint]) -> (f64, f64) {
    let mut total = 0.0;
    let mut spray = 0.0;
    for pair in points.windows(2) {
        let d = haversine_km(pair[0].0, pair[0].1, pair[1].0, pair[1].1);
        if d <= NOISE_FLOOR_KM {
            continue;
        }
        total += d;
        if pair[0].2 == 1.0 {
            spray += d;
        }
    }
    (round3(total), round3(spray))
}

/// Rebuild today's path for a vehicle from its persisted rows. Rows
/// without a parseable fix are skipped, not treated as gaps. A missing or
/// empty file yields the empty history.
pub fn reconstruct(log_dir: &Path, vehicle_id: &str) -> VehicleHistory {
    let path = log_dir.join(day_file_name(Local::now().date_naive(), vehicle_id));
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(_) => return VehicleHistory::default(),
    };

    let points: Vec<PathPoint> = contents
        .lines()
        .skip(1) // header
        .filter_map(parse_point)
        .collect();

    let (gps_distance_km, spray_distance_km) = compute_distances(&points);
    VehicleHistory {
        path: points,
        gps_distance_km,
        spray_distance_km,
    }
}
