//! On-demand spatial heatmaps and time-series rollups over stored readings.
//!
//! Aggregation never touches live fusion state. Every result is written back
//! to the aggregate store under its full key, replacing whatever was there.

pub mod params;

pub use params::{BucketWidth, HeatmapResolution, TimeWindow};

use crate::interface::{Detection, Reading, Scan, ScanStatus, SensorType};
use crate::math::RunningStats;
use crate::prelude::{FusionError, FusionResult};
use crate::processing::grid::{bucket_of, cell_at, resolution_from};
use crate::store::Stores;
use chrono::{DateTime, TimeZone, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeatmapKey {
    pub scan_id: Uuid,
    pub sensor_type: Option<SensorType>,
    pub window: TimeWindow,
    pub resolution: HeatmapResolution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub cell: u64,
    pub latitude: f64,
    pub longitude: f64,
    pub count: usize,
    pub mean_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub key: HeatmapKey,
    /// Ordered by point count, densest first.
    pub cells: Vec<HeatmapCell>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RollupKey {
    pub scan_id: Uuid,
    pub sensor_type: Option<SensorType>,
    pub window: TimeWindow,
    pub width: BucketWidth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBucketStat {
    pub bucket_start: DateTime<Utc>,
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub key: RollupKey,
    pub buckets: Vec<TimeBucketStat>,
    pub computed_at: DateTime<Utc>,
}

/// Post-mission summary of a completed scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan: Scan,
    pub duration_secs: Option<i64>,
    pub reading_count: usize,
    pub rollups: BTreeMap<SensorType, Vec<TimeBucketStat>>,
    pub detections: Vec<Detection>,
}

#[derive(Default)]
struct CellAccumulator {
    latitude: RunningStats,
    longitude: RunningStats,
    value: RunningStats,
}

#[derive(Default)]
struct BucketAccumulator {
    value: RunningStats,
    latitude: RunningStats,
    longitude: RunningStats,
    altitude: RunningStats,
}

pub fn heatmap_cells(readings: &[Reading], resolution: HeatmapResolution) -> FusionResult<Vec<HeatmapCell>> {
    let resolution = resolution_from(resolution.get())?;
    let mut cells: HashMap<u64, CellAccumulator> = HashMap::new();
    for reading in readings {
        let cell = u64::from(cell_at(reading.latitude, reading.longitude, resolution)?);
        let acc = cells.entry(cell).or_default();
        acc.latitude.push(reading.latitude);
        acc.longitude.push(reading.longitude);
        acc.value.push(reading.value);
    }
    let mut rows: Vec<HeatmapCell> = cells
        .into_iter()
        .map(|(cell, acc)| HeatmapCell {
            cell,
            latitude: acc.latitude.mean(),
            longitude: acc.longitude.mean(),
            count: acc.value.count(),
            mean_value: acc.value.mean(),
        })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then(a.cell.cmp(&b.cell)));
    Ok(rows)
}

pub fn rollup_buckets(readings: &[Reading], width: BucketWidth) -> Vec<TimeBucketStat> {
    let width_ms = width.duration().num_milliseconds();
    let mut buckets: BTreeMap<i64, BucketAccumulator> = BTreeMap::new();
    for reading in readings {
        let acc = buckets.entry(bucket_of(reading.timestamp, width_ms)).or_default();
        acc.value.push(reading.value);
        acc.latitude.push(reading.latitude);
        acc.longitude.push(reading.longitude);
        acc.altitude.push(reading.altitude);
    }
    buckets
        .into_iter()
        .filter_map(|(bucket, acc)| {
            let bucket_start = Utc.timestamp_millis_opt(bucket.checked_mul(width_ms)?).single()?;
            Some(TimeBucketStat {
                bucket_start,
                count: acc.value.count(),
                mean: acc.value.mean(),
                min: acc.value.min(),
                max: acc.value.max(),
                stddev: acc.value.stddev(),
                latitude: acc.latitude.mean(),
                longitude: acc.longitude.mean(),
                altitude: acc.altitude.mean(),
            })
        })
        .collect()
}

pub struct AggregationService {
    stores: Stores,
}

impl AggregationService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    pub async fn heatmap(
        &self,
        scan_id: Uuid,
        sensor_type: Option<SensorType>,
        window: TimeWindow,
        resolution: u8,
    ) -> FusionResult<Heatmap> {
        let resolution = HeatmapResolution::new(resolution)?;
        self.heatmap_at(scan_id, sensor_type, window, resolution).await
    }

    pub async fn heatmap_for_grid_size(
        &self,
        scan_id: Uuid,
        sensor_type: Option<SensorType>,
        window: TimeWindow,
        grid_size_m: f64,
    ) -> FusionResult<Heatmap> {
        let resolution = HeatmapResolution::from_grid_size_m(grid_size_m)?;
        self.heatmap_at(scan_id, sensor_type, window, resolution).await
    }

    async fn heatmap_at(
        &self,
        scan_id: Uuid,
        sensor_type: Option<SensorType>,
        window: TimeWindow,
        resolution: HeatmapResolution,
    ) -> FusionResult<Heatmap> {
        self.stores.scans.scan(scan_id).await?;
        let readings = self
            .stores
            .readings
            .readings_in_window(scan_id, sensor_type, window)
            .await?;
        let heatmap = Heatmap {
            key: HeatmapKey {
                scan_id,
                sensor_type,
                window,
                resolution,
            },
            cells: heatmap_cells(&readings, resolution)?,
            computed_at: Utc::now(),
        };
        self.stores.aggregates.replace_heatmap(heatmap.clone()).await?;
        info!(
            "heatmap for scan {} at resolution {}: {} cells from {} readings",
            scan_id,
            resolution.get(),
            heatmap.cells.len(),
            readings.len()
        );
        Ok(heatmap)
    }

    /// Time-series rollup. The interval must be one of the labels of
    /// [`BucketWidth`]; anything else fails before any store is touched.
    pub async fn rollup(
        &self,
        scan_id: Uuid,
        sensor_type: Option<SensorType>,
        window: TimeWindow,
        interval: &str,
    ) -> FusionResult<Rollup> {
        let width: BucketWidth = interval.parse()?;
        self.rollup_with(scan_id, sensor_type, window, width).await
    }

    pub async fn rollup_with(
        &self,
        scan_id: Uuid,
        sensor_type: Option<SensorType>,
        window: TimeWindow,
        width: BucketWidth,
    ) -> FusionResult<Rollup> {
        self.stores.scans.scan(scan_id).await?;
        let readings = self
            .stores
            .readings
            .readings_in_window(scan_id, sensor_type, window)
            .await?;
        let rollup = Rollup {
            key: RollupKey {
                scan_id,
                sensor_type,
                window,
                width,
            },
            buckets: rollup_buckets(&readings, width),
            computed_at: Utc::now(),
        };
        self.stores.aggregates.replace_rollup(rollup.clone()).await?;
        Ok(rollup)
    }

    pub async fn report(&self, scan_id: Uuid) -> FusionResult<ScanReport> {
        let scan = self.stores.scans.scan(scan_id).await?;
        if scan.status != ScanStatus::Completed {
            return Err(FusionError::ScanNotCompleted(scan_id));
        }
        let window = TimeWindow::unbounded();
        let mut rollups = BTreeMap::new();
        let mut reading_count = 0;
        for sensor in SensorType::ALL {
            let rollup = self
                .rollup_with(scan_id, Some(sensor), window, BucketWidth::FiveMinutes)
                .await?;
            let count: usize = rollup.buckets.iter().map(|b| b.count).sum();
            if count > 0 {
                reading_count += count;
                rollups.insert(sensor, rollup.buckets);
            }
        }
        let detections = self.stores.detections.detections_for_scan(scan_id).await?;
        let duration_secs = scan.end_time.map(|end| (end - scan.start_time).num_seconds());
        Ok(ScanReport {
            scan,
            duration_secs,
            reading_count,
            rollups,
            detections,
        })
    }
}
