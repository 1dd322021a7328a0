use crate::aggregation::{Heatmap, HeatmapKey, Rollup, RollupKey, TimeWindow};
use crate::interface::{
    Detection, Device, DeviceStatus, Reading, Scan, ScanStatus, SensorType, VerificationStatus,
};
use crate::prelude::{FusionError, FusionResult};
use crate::processing::grid::haversine_m;
use crate::store::{
    AggregateStore, DetectionStore, DeviceStore, RawBlobKey, RawBlobStore, ReadingStore, ScanStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Process-local implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<HashMap<Uuid, Device>>,
    scans: RwLock<HashMap<Uuid, Scan>>,
    readings: RwLock<HashMap<Uuid, Vec<Reading>>>,
    detections: RwLock<HashMap<Uuid, Detection>>,
    heatmaps: RwLock<HashMap<HeatmapKey, Heatmap>>,
    rollups: RwLock<HashMap<RollupKey, Rollup>>,
    raw: RwLock<BTreeMap<RawBlobKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_device(&self, device: Device) {
        self.devices.write().insert(device.id, device);
    }

    pub fn reading_count(&self) -> usize {
        self.readings.read().values().map(Vec::len).sum()
    }
}

fn by_confidence(detections: &mut [Detection]) {
    detections.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn device(&self, id: Uuid) -> FusionResult<Device> {
        self.devices
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| FusionError::not_found("device", id))
    }

    async fn update_device_status(&self, id: Uuid, status: DeviceStatus, at: DateTime<Utc>) -> FusionResult<()> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(&id)
            .ok_or_else(|| FusionError::not_found("device", id))?;
        device.status = status;
        device.last_connection_at = at;
        Ok(())
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn scan(&self, id: Uuid) -> FusionResult<Scan> {
        self.scans
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| FusionError::not_found("scan", id))
    }

    async fn insert_scan(&self, scan: Scan) -> FusionResult<()> {
        let mut scans = self.scans.write();
        if scans.contains_key(&scan.id) {
            return Err(FusionError::InvalidParameter(format!("scan {} already exists", scan.id)));
        }
        scans.insert(scan.id, scan);
        Ok(())
    }

    async fn update_scan_status(&self, id: Uuid, status: ScanStatus, at: DateTime<Utc>) -> FusionResult<Scan> {
        let mut scans = self.scans.write();
        let scan = scans
            .get_mut(&id)
            .ok_or_else(|| FusionError::not_found("scan", id))?;
        scan.status = status;
        scan.end_time = if status == ScanStatus::InProgress { None } else { Some(at) };
        Ok(scan.clone())
    }

    async fn delete_scan(&self, id: Uuid) -> FusionResult<()> {
        self.scans
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| FusionError::not_found("scan", id))
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    async fn insert_batch(&self, readings: &[Reading]) -> FusionResult<()> {
        let mut stored = self.readings.write();
        for reading in readings {
            stored.entry(reading.scan_id).or_default().push(reading.clone());
        }
        Ok(())
    }

    async fn readings_for_scan(&self, scan_id: Uuid) -> FusionResult<Vec<Reading>> {
        Ok(self.readings.read().get(&scan_id).cloned().unwrap_or_default())
    }

    async fn readings_in_window(
        &self,
        scan_id: Uuid,
        sensor_type: Option<SensorType>,
        window: TimeWindow,
    ) -> FusionResult<Vec<Reading>> {
        let mut matching: Vec<Reading> = self
            .readings
            .read()
            .get(&scan_id)
            .map(|readings| {
                readings
                    .iter()
                    .filter(|r| sensor_type.map_or(true, |s| r.sensor_type == s))
                    .filter(|r| window.contains(r.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn readings_near(
        &self,
        scan_id: Uuid,
        sensor_type: Option<SensorType>,
        latitude: f64,
        longitude: f64,
        radius_m: f64,
    ) -> FusionResult<Vec<Reading>> {
        let mut found: Vec<(f64, Reading)> = self
            .readings
            .read()
            .get(&scan_id)
            .map(|readings| {
                readings
                    .iter()
                    .filter(|r| sensor_type.map_or(true, |s| r.sensor_type == s))
                    .map(|r| (haversine_m(latitude, longitude, r.latitude, r.longitude), r))
                    .filter(|(distance, _)| *distance <= radius_m)
                    .map(|(distance, r)| (distance, r.clone()))
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.timestamp.cmp(&b.1.timestamp)));
        Ok(found.into_iter().map(|(_, r)| r).collect())
    }

    async fn delete_scan_readings(&self, scan_id: Uuid) -> FusionResult<usize> {
        Ok(self.readings.write().remove(&scan_id).map_or(0, |r| r.len()))
    }
}

#[async_trait]
impl DetectionStore for MemoryStore {
    async fn insert_if_no_open(&self, detection: Detection) -> FusionResult<bool> {
        let mut detections = self.detections.write();
        let blocked = detections.values().any(|d| {
            d.scan_id == detection.scan_id && d.cell == detection.cell && d.verification_status.is_open()
        });
        if blocked {
            return Ok(false);
        }
        detections.insert(detection.id, detection);
        Ok(true)
    }

    async fn detection(&self, id: Uuid) -> FusionResult<Detection> {
        self.detections
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| FusionError::not_found("detection", id))
    }

    async fn detections_for_scan(&self, scan_id: Uuid) -> FusionResult<Vec<Detection>> {
        let mut found: Vec<Detection> = self
            .detections
            .read()
            .values()
            .filter(|d| d.scan_id == scan_id)
            .cloned()
            .collect();
        by_confidence(&mut found);
        Ok(found)
    }

    async fn detections_near(&self, latitude: f64, longitude: f64, radius_m: f64) -> FusionResult<Vec<Detection>> {
        let mut found: Vec<Detection> = self
            .detections
            .read()
            .values()
            .filter(|d| haversine_m(latitude, longitude, d.latitude, d.longitude) <= radius_m)
            .cloned()
            .collect();
        by_confidence(&mut found);
        Ok(found)
    }

    async fn open_detection_at(&self, scan_id: Uuid, cell: u64) -> FusionResult<Option<Detection>> {
        Ok(self
            .detections
            .read()
            .values()
            .find(|d| d.scan_id == scan_id && d.cell == cell && d.verification_status.is_open())
            .cloned())
    }

    async fn save_verification(&self, detection: &Detection) -> FusionResult<()> {
        let mut detections = self.detections.write();
        let stored = detections
            .get_mut(&detection.id)
            .ok_or_else(|| FusionError::not_found("detection", detection.id))?;
        if stored.verification_status != VerificationStatus::Unverified {
            return Err(FusionError::InvalidTransition {
                id: stored.id,
                status: stored.verification_status,
            });
        }
        stored.verification_status = detection.verification_status;
        stored.verified_by = detection.verified_by.clone();
        stored.verified_at = detection.verified_at;
        Ok(())
    }

    async fn delete_scan_detections(&self, scan_id: Uuid) -> FusionResult<usize> {
        let mut detections = self.detections.write();
        let before = detections.len();
        detections.retain(|_, d| d.scan_id != scan_id);
        Ok(before - detections.len())
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn replace_heatmap(&self, heatmap: Heatmap) -> FusionResult<()> {
        self.heatmaps.write().insert(heatmap.key, heatmap);
        Ok(())
    }

    async fn heatmap(&self, key: &HeatmapKey) -> FusionResult<Option<Heatmap>> {
        Ok(self.heatmaps.read().get(key).cloned())
    }

    async fn replace_rollup(&self, rollup: Rollup) -> FusionResult<()> {
        self.rollups.write().insert(rollup.key, rollup);
        Ok(())
    }

    async fn rollup(&self, key: &RollupKey) -> FusionResult<Option<Rollup>> {
        Ok(self.rollups.read().get(key).cloned())
    }

    async fn delete_scan_aggregates(&self, scan_id: Uuid) -> FusionResult<usize> {
        let mut removed = 0;
        {
            let mut heatmaps = self.heatmaps.write();
            let before = heatmaps.len();
            heatmaps.retain(|key, _| key.scan_id != scan_id);
            removed += before - heatmaps.len();
        }
        let mut rollups = self.rollups.write();
        let before = rollups.len();
        rollups.retain(|key, _| key.scan_id != scan_id);
        removed += before - rollups.len();
        Ok(removed)
    }
}

#[async_trait]
impl RawBlobStore for MemoryStore {
    async fn put_raw(&self, key: RawBlobKey, payload: Vec<u8>) -> FusionResult<()> {
        self.raw.write().insert(key, payload);
        Ok(())
    }

    async fn get_raw(&self, key: &RawBlobKey) -> FusionResult<Vec<u8>> {
        self.raw
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| FusionError::not_found("raw blob", key))
    }

    async fn list_raw(&self, scan_id: Uuid) -> FusionResult<Vec<RawBlobKey>> {
        Ok(self
            .raw
            .read()
            .keys()
            .filter(|key| key.scan_id == scan_id)
            .copied()
            .collect())
    }

    async fn delete_scan_raw(&self, scan_id: Uuid) -> FusionResult<usize> {
        let mut raw = self.raw.write();
        let before = raw.len();
        raw.retain(|key, _| key.scan_id != scan_id);
        Ok(before - raw.len())
    }
}
