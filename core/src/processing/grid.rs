use crate::interface::{Reading, SensorType};
use crate::prelude::{FusionError, FusionResult};
use chrono::{DateTime, Duration, TimeZone, Utc};
use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const EARTH_RADIUS_M: f64 = 6_371_008.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// H3 resolution, 0 (coarsest) to 15.
    pub resolution: u8,
    pub bucket_width_secs: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            resolution: 12,
            bucket_width_secs: 300,
        }
    }
}

/// Spatial cell plus time bucket. Sensor type is kept alongside, not in the
/// key, so one key groups every sensor that observed the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey {
    pub cell: u64,
    pub bucket: i64,
}

impl CellKey {
    pub fn cell_index(&self) -> FusionResult<CellIndex> {
        CellIndex::try_from(self.cell)
            .map_err(|err| FusionError::InvalidParameter(format!("cell {:x}: {}", self.cell, err)))
    }

    /// Centre of the hexagon as (latitude, longitude) in degrees.
    pub fn center(&self) -> FusionResult<(f64, f64)> {
        let center = LatLng::from(self.cell_index()?);
        Ok((center.lat(), center.lng()))
    }
}

pub fn bucket_of(timestamp: DateTime<Utc>, width_ms: i64) -> i64 {
    timestamp.timestamp_millis().div_euclid(width_ms)
}

/// Great-circle distance in metres.
pub fn haversine_m(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let (phi_a, phi_b) = (lat_a.to_radians(), lat_b.to_radians());
    let d_phi = phi_b - phi_a;
    let d_lambda = (lon_b - lon_a).to_radians();
    let h = (d_phi / 2.0).sin().powi(2) + phi_a.cos() * phi_b.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

pub fn resolution_from(value: u8) -> FusionResult<Resolution> {
    Resolution::try_from(value)
        .map_err(|_| FusionError::InvalidParameter(format!("unsupported H3 resolution {}", value)))
}

pub fn cell_at(latitude: f64, longitude: f64, resolution: Resolution) -> FusionResult<CellIndex> {
    let position = LatLng::new(latitude, longitude).map_err(|err| {
        FusionError::InvalidParameter(format!("coordinates ({}, {}): {}", latitude, longitude, err))
    })?;
    Ok(position.to_cell(resolution))
}

pub type CellGroups<'a> = BTreeMap<CellKey, BTreeMap<SensorType, Vec<&'a Reading>>>;

/// Hexagonal spatial binning combined with fixed-width time buckets.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    resolution: Resolution,
    bucket_width_ms: i64,
}

impl SpatialGrid {
    pub fn new(config: &GridConfig) -> FusionResult<Self> {
        let resolution = resolution_from(config.resolution)?;
        let bucket_width_ms = i64::try_from(config.bucket_width_secs)
            .ok()
            .and_then(|secs| secs.checked_mul(1000))
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                FusionError::InvalidParameter(format!(
                    "bucket width of {} seconds",
                    config.bucket_width_secs
                ))
            })?;
        Ok(Self {
            resolution,
            bucket_width_ms,
        })
    }

    pub fn resolution(&self) -> u8 {
        u8::from(self.resolution)
    }

    pub fn bucket_width(&self) -> Duration {
        Duration::milliseconds(self.bucket_width_ms)
    }

    pub fn bucket_start(&self, key: &CellKey) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(key.bucket.checked_mul(self.bucket_width_ms)?)
            .single()
    }

    pub fn key_for(&self, latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> FusionResult<CellKey> {
        let cell = cell_at(latitude, longitude, self.resolution)?;
        Ok(CellKey {
            cell: u64::from(cell),
            bucket: bucket_of(timestamp, self.bucket_width_ms),
        })
    }

    pub fn assign(&self, reading: &Reading) -> FusionResult<CellKey> {
        self.key_for(reading.latitude, reading.longitude, reading.timestamp)
    }

    /// Groups readings by cell and sensor type. Within a group readings are
    /// ordered by (timestamp, id) so filter updates replay identically.
    pub fn group<'a>(&self, readings: &'a [Reading]) -> FusionResult<CellGroups<'a>> {
        let mut groups: CellGroups<'a> = BTreeMap::new();
        for reading in readings {
            let key = self.assign(reading)?;
            groups
                .entry(key)
                .or_default()
                .entry(reading.sensor_type)
                .or_default()
                .push(reading);
        }
        for sensors in groups.values_mut() {
            for group in sensors.values_mut() {
                group.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
            }
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{QualityIndicators, SensorPayload};
    use uuid::Uuid;

    fn reading_at(lat: f64, lon: f64, millis: i64, sensor: SensorType) -> Reading {
        Reading {
            id: Uuid::new_v4(),
            scan_id: Uuid::nil(),
            sensor_type: sensor,
            timestamp: Utc.timestamp_millis_opt(millis).unwrap(),
            latitude: lat,
            longitude: lon,
            altitude: 0.0,
            value: 1.0,
            variance: 0.1,
            quality: QualityIndicators { signal_strength: 200 },
            payload: SensorPayload::Ranging {
                median_deviation: 0.05,
                sample_count: 1,
            },
        }
    }

    #[test]
    fn assignment_is_deterministic() {
        let grid = SpatialGrid::new(&GridConfig::default()).unwrap();
        let a = grid.assign(&reading_at(48.4647, 35.0462, 1_700_000_123_456, SensorType::Ranging)).unwrap();
        let b = grid.assign(&reading_at(48.4647, 35.0462, 1_700_000_123_456, SensorType::Acoustic)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bucket_is_floor_division() {
        assert_eq!(bucket_of(Utc.timestamp_millis_opt(299_999).unwrap(), 300_000), 0);
        assert_eq!(bucket_of(Utc.timestamp_millis_opt(300_000).unwrap(), 300_000), 1);
        assert_eq!(bucket_of(Utc.timestamp_millis_opt(-1).unwrap(), 300_000), -1);
    }

    #[test]
    fn coarser_resolution_merges_cells() {
        let fine = SpatialGrid::new(&GridConfig { resolution: 13, bucket_width_secs: 60 }).unwrap();
        let coarse = SpatialGrid::new(&GridConfig { resolution: 5, bucket_width_secs: 60 }).unwrap();
        let p = reading_at(48.46470, 35.04620, 0, SensorType::Magnetic);
        let q = reading_at(48.46520, 35.04700, 0, SensorType::Magnetic);
        assert_ne!(fine.assign(&p).unwrap(), fine.assign(&q).unwrap());
        assert_eq!(coarse.assign(&p).unwrap(), coarse.assign(&q).unwrap());
    }

    #[test]
    fn center_lies_inside_own_cell() {
        let grid = SpatialGrid::new(&GridConfig::default()).unwrap();
        let key = grid.assign(&reading_at(48.4647, 35.0462, 0, SensorType::Ranging)).unwrap();
        let (lat, lon) = key.center().unwrap();
        assert!(haversine_m(lat, lon, 48.4647, 35.0462) < 20.0);
        assert_eq!(grid.key_for(lat, lon, Utc.timestamp_millis_opt(0).unwrap()).unwrap(), key);
    }

    #[test]
    fn rejects_bad_configuration_and_coordinates() {
        assert!(SpatialGrid::new(&GridConfig { resolution: 16, bucket_width_secs: 60 }).is_err());
        assert!(SpatialGrid::new(&GridConfig { resolution: 9, bucket_width_secs: 0 }).is_err());
        let grid = SpatialGrid::new(&GridConfig::default()).unwrap();
        assert!(matches!(
            grid.assign(&reading_at(f64::NAN, 35.0, 0, SensorType::Ranging)),
            Err(FusionError::InvalidParameter(_))
        ));
    }

    #[test]
    fn groups_by_cell_then_sensor_in_time_order() {
        let grid = SpatialGrid::new(&GridConfig::default()).unwrap();
        let readings = vec![
            reading_at(48.4647, 35.0462, 2_000, SensorType::Ranging),
            reading_at(48.4647, 35.0462, 1_000, SensorType::Ranging),
            reading_at(48.4647, 35.0462, 1_500, SensorType::Magnetic),
        ];
        let groups = grid.group(&readings).unwrap();
        assert_eq!(groups.len(), 1);
        let sensors = groups.values().next().unwrap();
        assert_eq!(sensors.len(), 2);
        let ranging = &sensors[&SensorType::Ranging];
        assert!(ranging[0].timestamp < ranging[1].timestamp);
    }

    #[test]
    fn haversine_one_degree_latitude() {
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 10.0);
    }
}
