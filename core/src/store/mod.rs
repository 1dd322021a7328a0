//! Narrow persistence seams. Every collaborator the pipeline needs is reached
//! through one of these traits; [`MemoryStore`] implements all of them.

pub mod memory;

pub use memory::MemoryStore;

use crate::aggregation::{Heatmap, HeatmapKey, Rollup, RollupKey, TimeWindow};
use crate::interface::{Detection, Device, DeviceStatus, Reading, Scan, ScanStatus, SensorType};
use crate::prelude::FusionResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn device(&self, id: Uuid) -> FusionResult<Device>;

    /// Updates status and last-seen time.
    async fn update_device_status(&self, id: Uuid, status: DeviceStatus, at: DateTime<Utc>) -> FusionResult<()>;
}

#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn scan(&self, id: Uuid) -> FusionResult<Scan>;

    async fn insert_scan(&self, scan: Scan) -> FusionResult<()>;

    /// Sets the status; leaving `in_progress` also stamps the end time.
    async fn update_scan_status(&self, id: Uuid, status: ScanStatus, at: DateTime<Utc>) -> FusionResult<Scan>;

    async fn delete_scan(&self, id: Uuid) -> FusionResult<()>;
}

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// All-or-nothing insert.
    async fn insert_batch(&self, readings: &[Reading]) -> FusionResult<()>;

    async fn readings_for_scan(&self, scan_id: Uuid) -> FusionResult<Vec<Reading>>;

    /// Readings of a scan inside an inclusive window, optionally of a single
    /// sensor type, in timestamp order.
    async fn readings_in_window(
        &self,
        scan_id: Uuid,
        sensor_type: Option<SensorType>,
        window: TimeWindow,
    ) -> FusionResult<Vec<Reading>>;

    /// Readings of a scan within `radius_m` metres of a point, optionally of
    /// a single sensor type, nearest first.
    async fn readings_near(
        &self,
        scan_id: Uuid,
        sensor_type: Option<SensorType>,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
    ) -> FusionResult<Vec<Reading>>;

    async fn delete_scan_readings(&self, scan_id: Uuid) -> FusionResult<usize>;
}

#[async_trait]
pub trait DetectionStore: Send + Sync {
    /// Inserts unless an open detection already exists for the same scan and
    /// cell. The check and the insert are one atomic step.
    async fn insert_if_no_open(&self, detection: Detection) -> FusionResult<bool>;

    async fn detection(&self, id: Uuid) -> FusionResult<Detection>;

    /// Ordered by confidence, highest first.
    async fn detections_for_scan(&self, scan_id: Uuid) -> FusionResult<Vec<Detection>>;

    /// Detections of any scan within `radius_m` metres, by confidence.
    async fn detections_near(&self, latitude: f64, longitude: f64, radius_m: f64) -> FusionResult<Vec<Detection>>;

    async fn open_detection_at(&self, scan_id: Uuid, cell: u64) -> FusionResult<Option<Detection>>;

    /// Persists the verification fields of an existing detection. Fails with
    /// `InvalidTransition` unless the stored detection is still unverified;
    /// the check and the write are one atomic step.
    async fn save_verification(&self, detection: &Detection) -> FusionResult<()>;

    async fn delete_scan_detections(&self, scan_id: Uuid) -> FusionResult<usize>;
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn replace_heatmap(&self, heatmap: Heatmap) -> FusionResult<()>;

    async fn heatmap(&self, key: &HeatmapKey) -> FusionResult<Option<Heatmap>>;

    async fn replace_rollup(&self, rollup: Rollup) -> FusionResult<()>;

    async fn rollup(&self, key: &RollupKey) -> FusionResult<Option<Rollup>>;

    async fn delete_scan_aggregates(&self, scan_id: Uuid) -> FusionResult<usize>;
}

/// Address of an archived raw frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RawBlobKey {
    pub scan_id: Uuid,
    pub sensor_type: SensorType,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for RawBlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}.bin",
            self.scan_id,
            self.sensor_type,
            self.timestamp.timestamp_millis()
        )
    }
}

#[async_trait]
pub trait RawBlobStore: Send + Sync {
    async fn put_raw(&self, key: RawBlobKey, payload: Vec<u8>) -> FusionResult<()>;

    async fn get_raw(&self, key: &RawBlobKey) -> FusionResult<Vec<u8>>;

    async fn list_raw(&self, scan_id: Uuid) -> FusionResult<Vec<RawBlobKey>>;

    async fn delete_scan_raw(&self, scan_id: Uuid) -> FusionResult<usize>;
}

/// The full set of stores the service runs against.
#[derive(Clone)]
pub struct Stores {
    pub devices: Arc<dyn DeviceStore>,
    pub scans: Arc<dyn ScanStore>,
    pub readings: Arc<dyn ReadingStore>,
    pub detections: Arc<dyn DetectionStore>,
    pub aggregates: Arc<dyn AggregateStore>,
    pub raw: Arc<dyn RawBlobStore>,
}

impl Stores {
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            devices: store.clone(),
            scans: store.clone(),
            readings: store.clone(),
            detections: store.clone(),
            aggregates: store.clone(),
            raw: store,
        }
    }

    /// Deletes a scan together with everything derived from it.
    pub async fn purge_scan(&self, scan_id: Uuid) -> FusionResult<()> {
        self.scans.scan(scan_id).await?;
        self.readings.delete_scan_readings(scan_id).await?;
        self.detections.delete_scan_detections(scan_id).await?;
        self.aggregates.delete_scan_aggregates(scan_id).await?;
        self.raw.delete_scan_raw(scan_id).await?;
        self.scans.delete_scan(scan_id).await
    }
}
