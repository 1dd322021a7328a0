use crate::interface::{DangerLevel, Detection, ObjectType, VerificationStatus};
use crate::prelude::{FusionError, FusionResult};
use crate::processing::classifier::Classification;
use crate::processing::grid::CellKey;
use crate::store::DetectionStore;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    /// Minimum probability, inclusive, for a cell to become a detection.
    pub confidence_threshold: f64,
    pub nominal_depth_m: f64,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            nominal_depth_m: 0.15,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmitOutcome {
    pub created: Vec<Detection>,
    /// Candidates dropped because an open detection already covers the cell.
    pub skipped: usize,
}

pub struct DetectionEmitter {
    config: EmitterConfig,
}

impl DetectionEmitter {
    pub fn new(config: EmitterConfig) -> FusionResult<Self> {
        if !(0.0..=1.0).contains(&config.confidence_threshold) {
            return Err(FusionError::InvalidParameter(format!(
                "confidence threshold {} outside [0, 1]",
                config.confidence_threshold
            )));
        }
        if !(config.nominal_depth_m.is_finite() && config.nominal_depth_m >= 0.0) {
            return Err(FusionError::InvalidParameter(format!(
                "nominal depth {}",
                config.nominal_depth_m
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    /// Materializes a detection for a cell whose probability reaches the
    /// threshold. Nothing is persisted here.
    pub fn emit(
        &self,
        scan_id: Uuid,
        key: &CellKey,
        classification: &Classification,
        at: DateTime<Utc>,
    ) -> FusionResult<Option<Detection>> {
        if classification.probability < self.config.confidence_threshold {
            return Ok(None);
        }
        let (latitude, longitude) = key.center()?;
        Ok(Some(Detection {
            id: Uuid::new_v4(),
            scan_id,
            cell: key.cell,
            latitude,
            longitude,
            depth: self.config.nominal_depth_m,
            object_type: classification.object_type.unwrap_or(ObjectType::Unknown),
            confidence: classification.probability.clamp(0.0, 1.0),
            danger_level: classification.danger_level.unwrap_or(DangerLevel::MODERATE),
            verification_status: VerificationStatus::Unverified,
            verified_by: None,
            verified_at: None,
            created_at: at,
        }))
    }

    /// Keeps the strongest candidate of every spatial cell across time
    /// buckets. Ties go to the earliest bucket.
    pub fn strongest_per_cell(
        candidates: Vec<(CellKey, Classification)>,
    ) -> Vec<(CellKey, Classification)> {
        let mut best: BTreeMap<u64, (CellKey, Classification)> = BTreeMap::new();
        for (key, classification) in candidates {
            match best.get(&key.cell) {
                Some((held_key, held))
                    if held.probability > classification.probability
                        || (held.probability == classification.probability
                            && held_key.bucket <= key.bucket) => {}
                _ => {
                    best.insert(key.cell, (key, classification));
                }
            }
        }
        best.into_values().collect()
    }

    /// Emits and persists detections for one scan, skipping cells that
    /// already carry an open detection.
    pub async fn emit_all(
        &self,
        scan_id: Uuid,
        candidates: Vec<(CellKey, Classification)>,
        store: &dyn DetectionStore,
    ) -> FusionResult<EmitOutcome> {
        let now = Utc::now();
        let mut outcome = EmitOutcome::default();
        for (key, classification) in Self::strongest_per_cell(candidates) {
            let Some(detection) = self.emit(scan_id, &key, &classification, now)? else {
                continue;
            };
            if store.insert_if_no_open(detection.clone()).await? {
                debug!(
                    "detection {} at cell {:x} confidence {:.3}",
                    detection.id, detection.cell, detection.confidence
                );
                outcome.created.push(detection);
            } else {
                outcome.skipped += 1;
            }
        }
        if !outcome.created.is_empty() {
            info!(
                "scan {}: {} new detection(s), {} already open",
                scan_id,
                outcome.created.len(),
                outcome.skipped
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::classifier::EvidenceBasis;
    use crate::processing::grid::{GridConfig, SpatialGrid};
    use crate::store::MemoryStore;

    fn key(bucket: i64) -> CellKey {
        let grid = SpatialGrid::new(&GridConfig::default()).unwrap();
        let mut key = grid
            .key_for(48.4647, 35.0462, Utc::now())
            .unwrap();
        key.bucket = bucket;
        key
    }

    fn classified(probability: f64) -> Classification {
        Classification {
            probability,
            object_type: None,
            danger_level: None,
            basis: EvidenceBasis::Fused,
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        let emitter = DetectionEmitter::new(EmitterConfig::default()).unwrap();
        let scan = Uuid::new_v4();
        assert!(emitter
            .emit(scan, &key(0), &classified(0.7), Utc::now())
            .unwrap()
            .is_some());
        assert!(emitter
            .emit(scan, &key(0), &classified(0.6999), Utc::now())
            .unwrap()
            .is_none());
    }

    #[test]
    fn unpromoted_detection_gets_defaults() {
        let emitter = DetectionEmitter::new(EmitterConfig::default()).unwrap();
        let det = emitter
            .emit(Uuid::new_v4(), &key(0), &classified(0.75), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(det.object_type, ObjectType::Unknown);
        assert_eq!(det.danger_level, DangerLevel::MODERATE);
        assert_eq!(det.depth, 0.15);
        assert_eq!(det.verification_status, VerificationStatus::Unverified);
        let (lat, lon) = key(0).center().unwrap();
        assert_eq!((det.latitude, det.longitude), (lat, lon));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        assert!(DetectionEmitter::new(EmitterConfig {
            confidence_threshold: 1.5,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn strongest_bucket_wins_and_ties_go_early() {
        let picked = DetectionEmitter::strongest_per_cell(vec![
            (key(3), classified(0.9)),
            (key(1), classified(0.9)),
            (key(2), classified(0.8)),
        ]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].0.bucket, 1);
    }

    #[tokio::test]
    async fn open_detection_blocks_duplicates() {
        let store = MemoryStore::new();
        let emitter = DetectionEmitter::new(EmitterConfig::default()).unwrap();
        let scan = Uuid::new_v4();

        let first = emitter
            .emit_all(scan, vec![(key(0), classified(0.85))], &store)
            .await
            .unwrap();
        assert_eq!(first.created.len(), 1);

        let second = emitter
            .emit_all(scan, vec![(key(4), classified(0.95))], &store)
            .await
            .unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.skipped, 1);
        assert_eq!(store.detections_for_scan(scan).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dismissed_detection_no_longer_blocks() {
        let store = MemoryStore::new();
        let emitter = DetectionEmitter::new(EmitterConfig::default()).unwrap();
        let scan = Uuid::new_v4();
        let mut created = emitter
            .emit_all(scan, vec![(key(0), classified(0.85))], &store)
            .await
            .unwrap()
            .created;
        let mut det = created.remove(0);
        det.verify(crate::interface::VerificationDecision::Dismiss, "sapper-2", Utc::now())
            .unwrap();
        store.save_verification(&det).await.unwrap();

        let again = emitter
            .emit_all(scan, vec![(key(0), classified(0.85))], &store)
            .await
            .unwrap();
        assert_eq!(again.created.len(), 1);
    }
}
