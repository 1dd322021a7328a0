//! Recursive per-cell state estimation and cross-sensor fusion.
//!
//! Each (cell, sensor type) pair runs a scalar Kalman filter over the
//! anomaly index. Buried objects do not move, so the predict step only
//! inflates the variance by a fixed process-noise term:
//!
//! ```text
//! predict:  P <- P + q
//! update:   K = P / (P + R)
//!           x <- x + K (z - x)
//!           P <- (1 - K) P
//! ```
//!
//! Filtered estimates from different sensor types in the same cell are
//! combined by inverse-variance weighting:
//!
//! ```text
//! P_f = 1 / sum(1 / P_i)
//! x_f = P_f * sum(x_i / P_i)
//! ```
//!
//! Live state is shared by every device worker. Each cell sits behind its
//! own mutex inside a sharded map, so readings for unrelated cells never
//! contend.

use crate::interface::{Reading, SensorType};
use crate::prelude::FusionResult;
use crate::processing::grid::{CellKey, SpatialGrid};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Variance added before every update after the first.
    pub process_noise: f64,
    /// When false, cells keep per-sensor estimates only and the classifier
    /// falls back to combining per-sensor beliefs.
    pub fuse_across_sensors: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.01,
            fuse_across_sensors: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub mean: f64,
    pub variance: f64,
    /// Number of measurements folded into the estimate.
    pub updates: u32,
}

impl Estimate {
    /// Magnitude of the estimate in standard deviations.
    pub fn snr(&self) -> f64 {
        if self.variance > 0.0 {
            self.mean.abs() / self.variance.sqrt()
        } else {
            f64::INFINITY
        }
    }

    pub fn confidence(&self) -> f64 {
        1.0 / (1.0 + self.variance.max(0.0))
    }
}

/// Inverse-variance combination. A single estimate is returned unchanged.
pub fn inverse_variance_fuse(estimates: &[Estimate]) -> Option<Estimate> {
    match estimates {
        [] => None,
        [only] => Some(*only),
        _ => {
            let information: f64 = estimates.iter().map(|e| 1.0 / e.variance).sum();
            let weighted: f64 = estimates.iter().map(|e| e.mean / e.variance).sum();
            let variance = 1.0 / information;
            Some(Estimate {
                mean: variance * weighted,
                variance,
                updates: estimates.iter().map(|e| e.updates).sum(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScalarKalman {
    state: Option<Estimate>,
    process_noise: f64,
}

impl ScalarKalman {
    pub fn new(process_noise: f64) -> Self {
        Self {
            state: None,
            process_noise,
        }
    }

    /// Folds in measurement `z` with measurement variance `r`.
    pub fn update(&mut self, z: f64, r: f64) -> Estimate {
        let next = match self.state {
            None => Estimate {
                mean: z,
                variance: r,
                updates: 1,
            },
            Some(prev) => {
                let predicted = prev.variance + self.process_noise;
                let gain = predicted / (predicted + r);
                Estimate {
                    mean: prev.mean + gain * (z - prev.mean),
                    variance: (1.0 - gain) * predicted,
                    updates: prev.updates + 1,
                }
            }
        };
        self.state = Some(next);
        next
    }

    pub fn estimate(&self) -> Option<Estimate> {
        self.state
    }
}

/// Point-in-time estimate set for one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionEstimate {
    pub per_sensor: BTreeMap<SensorType, Estimate>,
    /// Present only when two or more sensor types contributed.
    pub fused: Option<Estimate>,
}

impl FusionEstimate {
    pub fn from_per_sensor(per_sensor: BTreeMap<SensorType, Estimate>, fuse: bool) -> Self {
        let fused = if fuse && per_sensor.len() >= 2 {
            let estimates: Vec<Estimate> = per_sensor.values().copied().collect();
            inverse_variance_fuse(&estimates)
        } else {
            None
        };
        Self { per_sensor, fused }
    }

    pub fn contributing(&self) -> Vec<SensorType> {
        self.per_sensor.keys().copied().collect()
    }

    /// The fused estimate, or the sole sensor's estimate when only one
    /// sensor type contributed.
    pub fn combined(&self) -> Option<Estimate> {
        self.fused.or_else(|| {
            if self.per_sensor.len() == 1 {
                self.per_sensor.values().next().copied()
            } else {
                None
            }
        })
    }
}

/// Filter bank of a single cell.
#[derive(Debug, Clone, Default)]
pub struct CellFilters {
    filters: BTreeMap<SensorType, ScalarKalman>,
}

impl CellFilters {
    pub fn apply(&mut self, sensor: SensorType, z: f64, r: f64, process_noise: f64) -> Estimate {
        self.filters
            .entry(sensor)
            .or_insert_with(|| ScalarKalman::new(process_noise))
            .update(z, r)
    }

    pub fn snapshot(&self, fuse: bool) -> FusionEstimate {
        let per_sensor = self
            .filters
            .iter()
            .filter_map(|(sensor, filter)| filter.estimate().map(|e| (*sensor, e)))
            .collect();
        FusionEstimate::from_per_sensor(per_sensor, fuse)
    }
}

pub struct FusionEngine {
    config: FusionConfig,
    live: DashMap<(Uuid, CellKey), Arc<Mutex<CellFilters>>>,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            live: DashMap::new(),
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    fn cell(&self, scan_id: Uuid, key: CellKey) -> Arc<Mutex<CellFilters>> {
        // Clone the Arc out so the shard lock is released before the cell lock
        // is taken.
        let entry = self.live.entry((scan_id, key)).or_default();
        Arc::clone(entry.value())
    }

    /// Applies one measurement to the live state of a cell under that cell's
    /// lock.
    pub fn apply(&self, scan_id: Uuid, key: CellKey, sensor: SensorType, z: f64, r: f64) -> Estimate {
        let cell = self.cell(scan_id, key);
        let mut filters = cell.lock();
        filters.apply(sensor, z, r, self.config.process_noise)
    }

    pub fn apply_reading(&self, key: CellKey, reading: &Reading) -> Estimate {
        self.apply(reading.scan_id, key, reading.sensor_type, reading.value, reading.variance)
    }

    pub fn snapshot(&self, scan_id: Uuid, key: CellKey) -> Option<FusionEstimate> {
        let cell = self.live.get(&(scan_id, key)).map(|entry| Arc::clone(entry.value()))?;
        let estimate = cell.lock().snapshot(self.config.fuse_across_sensors);
        Some(estimate)
    }

    /// Snapshot of every live cell of a scan, ordered by cell key.
    pub fn snapshot_scan(&self, scan_id: Uuid) -> Vec<(CellKey, FusionEstimate)> {
        let cells: Vec<(CellKey, Arc<Mutex<CellFilters>>)> = self
            .live
            .iter()
            .filter(|entry| entry.key().0 == scan_id)
            .map(|entry| (entry.key().1, Arc::clone(entry.value())))
            .collect();
        let mut snapshot: Vec<(CellKey, FusionEstimate)> = cells
            .into_iter()
            .map(|(key, cell)| (key, cell.lock().snapshot(self.config.fuse_across_sensors)))
            .collect();
        snapshot.sort_by_key(|(key, _)| *key);
        snapshot
    }

    /// Drops the live state of a scan, returning the number of cells removed.
    pub fn evict_scan(&self, scan_id: Uuid) -> usize {
        let before = self.live.len();
        self.live.retain(|(scan, _), _| *scan != scan_id);
        before.saturating_sub(self.live.len())
    }

    pub fn live_cells(&self) -> usize {
        self.live.len()
    }

    /// Fresh filter run over a stored reading set. Readings are replayed in
    /// (timestamp, id) order so reruns over the same set agree exactly.
    pub fn run(&self, grid: &SpatialGrid, readings: &[Reading]) -> FusionResult<Vec<(CellKey, FusionEstimate)>> {
        let mut ordered: Vec<&Reading> = readings.iter().collect();
        ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        let mut cells: BTreeMap<CellKey, CellFilters> = BTreeMap::new();
        for reading in ordered {
            let key = grid.assign(reading)?;
            cells.entry(key).or_default().apply(
                reading.sensor_type,
                reading.value,
                reading.variance,
                self.config.process_noise,
            );
        }
        Ok(cells
            .into_iter()
            .map(|(key, filters)| (key, filters.snapshot(self.config.fuse_across_sensors)))
            .collect())
    }
}
