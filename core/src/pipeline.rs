//! Grid → fusion → classifier → emitter, over live state or a stored scan.

use crate::interface::{Detection, VerificationDecision};
use crate::prelude::{FusionResult, PipelineConfig};
use crate::processing::{
    CellKey, Classification, Classifier, DetectionEmitter, FusionEngine, FusionEstimate, SpatialGrid,
};
use crate::store::Stores;
use crate::telemetry::{LogManager, MetricsRecorder};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of one evaluation pass over a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRun {
    pub scan_id: Uuid,
    pub cells_evaluated: usize,
    /// Cells whose probability reached the emission threshold.
    pub candidates: usize,
    pub created: Vec<Detection>,
    pub skipped: usize,
}

pub struct DetectionPipeline {
    grid: SpatialGrid,
    fusion: Arc<FusionEngine>,
    classifier: Classifier,
    emitter: DetectionEmitter,
    stores: Stores,
    metrics: Arc<MetricsRecorder>,
    log: LogManager,
}

impl DetectionPipeline {
    pub fn new(
        config: &PipelineConfig,
        grid: SpatialGrid,
        fusion: Arc<FusionEngine>,
        stores: Stores,
        metrics: Arc<MetricsRecorder>,
    ) -> FusionResult<Self> {
        Ok(Self {
            grid,
            fusion,
            classifier: Classifier::new(config.classifier.clone()),
            emitter: DetectionEmitter::new(config.emitter.clone())?,
            stores,
            metrics,
            log: LogManager::new("pipeline"),
        })
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Current classification of one live cell.
    pub fn classify_live(&self, scan_id: Uuid, key: CellKey) -> Option<Classification> {
        self.fusion
            .snapshot(scan_id, key)
            .map(|estimate| self.classifier.classify(&estimate))
    }

    /// Fresh filter run over every stored reading of the scan. Reruns over an
    /// unchanged reading set produce no new detections.
    pub async fn run_scan(&self, scan_id: Uuid) -> FusionResult<DetectionRun> {
        self.stores.scans.scan(scan_id).await?;
        let readings = self.stores.readings.readings_for_scan(scan_id).await?;
        let estimates = self.fusion.run(&self.grid, &readings)?;
        self.log.record(&format!(
            "batch run over {} reading(s) of scan {} ({} cells)",
            readings.len(),
            scan_id,
            estimates.len()
        ));
        self.evaluate(scan_id, estimates).await
    }

    /// Evaluates the live state of a scan as it stands now.
    pub async fn evaluate_live(&self, scan_id: Uuid) -> FusionResult<DetectionRun> {
        let estimates = self.fusion.snapshot_scan(scan_id);
        self.evaluate(scan_id, estimates).await
    }

    async fn evaluate(
        &self,
        scan_id: Uuid,
        estimates: Vec<(CellKey, FusionEstimate)>,
    ) -> FusionResult<DetectionRun> {
        let cells_evaluated = estimates.len();
        let threshold = self.emitter.config().confidence_threshold;
        let classified: Vec<(CellKey, Classification)> = estimates
            .iter()
            .map(|(key, estimate)| (*key, self.classifier.classify(estimate)))
            .collect();
        let candidates = classified
            .iter()
            .filter(|(_, c)| c.probability >= threshold)
            .count();
        let outcome = self
            .emitter
            .emit_all(scan_id, classified, self.stores.detections.as_ref())
            .await?;
        self.metrics.record_detections(outcome.created.len());
        Ok(DetectionRun {
            scan_id,
            cells_evaluated,
            candidates,
            created: outcome.created,
            skipped: outcome.skipped,
        })
    }

    pub async fn verify(
        &self,
        detection_id: Uuid,
        decision: VerificationDecision,
        verifier: &str,
    ) -> FusionResult<Detection> {
        let mut detection = self.stores.detections.detection(detection_id).await?;
        detection.verify(decision, verifier, Utc::now())?;
        self.stores.detections.save_verification(&detection).await?;
        self.log.record(&format!(
            "detection {} {} by {}",
            detection.id, detection.verification_status, verifier
        ));
        Ok(detection)
    }
}
