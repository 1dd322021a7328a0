use crate::generator::profile::SurveyProfile;
use crate::workflow::config::GatewayConfig;
use anyhow::Context;
use minefusion::aggregation::ScanReport;
use minefusion::ingest::{connect, Inbound};
use minefusion::interface::{ControlMessage, Detection, Device, DeviceReply, ScanStatus};
use minefusion::store::MemoryStore;
use minefusion::telemetry::MetricsSnapshot;
use minefusion::FusionService;
use std::sync::Arc;
use uuid::Uuid;

pub struct SurveySummary {
    pub scan_id: Uuid,
    pub frames_sent: usize,
    pub readings_stored: usize,
    pub detections: Vec<Detection>,
    /// Detections the batch rerun found already open.
    pub rerun_skipped: usize,
    pub report: ScanReport,
    pub metrics: MetricsSnapshot,
}

/// Drives a synthetic survey through a device stream against an in-memory
/// deployment.
#[derive(Clone)]
pub struct Runner {
    service: Arc<FusionService>,
    store: Arc<MemoryStore>,
    profile: SurveyProfile,
}

impl Runner {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let (service, store) =
            FusionService::in_memory(config.pipeline.clone()).context("building fusion service")?;
        Ok(Self {
            service: Arc::new(service),
            store,
            profile: config.survey.clone(),
        })
    }

    pub fn service(&self) -> Arc<FusionService> {
        Arc::clone(&self.service)
    }

    pub async fn execute(&self) -> anyhow::Result<SurveySummary> {
        let device = Device::register("multi_sensor_rover", "SIM-0001", chrono::Utc::now());
        let device_id = device.id;
        self.store.insert_device(device);

        let scan_id = Uuid::new_v4();
        let frames = self
            .profile
            .frames(scan_id, &self.service.config().conditioning)
            .context("generating survey frames")?;

        let mut session = connect(self.service(), device_id)
            .await
            .context("connecting simulated device")?;
        let start = ControlMessage::ScanStart {
            scan_id,
            mission_id: None,
            scan_type: Some(self.profile.scan_type.clone()),
        };
        session
            .inbound
            .send(Inbound::Text(serde_json::to_string(&start)?))
            .await
            .context("sending scan_start")?;
        for frame in &frames {
            session
                .inbound
                .send(Inbound::Binary(frame.clone()))
                .await
                .context("streaming survey frame")?;
        }
        let end = ControlMessage::ScanEnd {
            scan_id,
            status: Some(ScanStatus::Completed),
        };
        session
            .inbound
            .send(Inbound::Text(serde_json::to_string(&end)?))
            .await
            .context("sending scan_end")?;

        loop {
            match session.outbound.recv().await {
                Some(DeviceReply::ScanAck {
                    status: ScanStatus::Completed,
                    ..
                }) => break,
                Some(DeviceReply::Rejected { reason, .. }) => {
                    log::warn!("device reply: rejected ({})", reason)
                }
                Some(_) => {}
                None => anyhow::bail!("device worker stopped before acknowledging scan_end"),
            }
        }
        drop(session.inbound);
        session.handle.await.context("joining device worker")?;

        let pipeline = self.service.pipeline();
        let rerun = pipeline
            .run_scan(scan_id)
            .await
            .context("batch rerun over stored readings")?;
        let report = self
            .service
            .aggregation()
            .report(scan_id)
            .await
            .context("building scan report")?;

        Ok(SurveySummary {
            scan_id,
            frames_sent: frames.len(),
            readings_stored: self.store.reading_count(),
            detections: report.detections.clone(),
            rerun_skipped: rerun.skipped,
            report,
            metrics: self.service.metrics().snapshot(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fine_grid() -> GatewayConfig {
        let mut cfg = GatewayConfig::default();
        // Cells about a metre across so each survey point lands in its own cell.
        cfg.pipeline.grid.resolution = 14;
        cfg
    }

    #[tokio::test]
    async fn runner_finds_planted_objects() {
        let cfg = fine_grid();
        let runner = Runner::new(&cfg).unwrap();
        let summary = runner.execute().await.unwrap();

        assert_eq!(summary.frames_sent, 12 * 12 * 3);
        assert_eq!(summary.readings_stored, summary.frames_sent);
        assert_eq!(summary.metrics.frames_accepted as usize, summary.frames_sent);
        assert!(!summary.detections.is_empty());
        assert!(summary.rerun_skipped <= summary.detections.len());
        assert_eq!(summary.report.scan.status, ScanStatus::Completed);
        assert_eq!(summary.report.rollups.len(), 3);

        // The strongest detection sits over the stronger planted object.
        let strongest = &summary.detections[0];
        let north = (strongest.latitude - cfg.survey.origin_lat) * 111_320.0;
        let east = (strongest.longitude - cfg.survey.origin_lon)
            * 111_320.0
            * cfg.survey.origin_lat.to_radians().cos();
        assert!(cfg.survey.anomaly_at(east, north) > 1.0, "at ({east:.1}, {north:.1})");
    }

    #[tokio::test]
    async fn quiet_field_raises_nothing() {
        let mut cfg = fine_grid();
        cfg.survey.rows = 4;
        cfg.survey.columns = 4;
        cfg.survey.objects.clear();
        let summary = Runner::new(&cfg).unwrap().execute().await.unwrap();
        assert!(summary.detections.is_empty());
        assert_eq!(summary.metrics.detections_emitted, 0);
    }

    #[tokio::test]
    async fn corrupted_frames_are_counted_not_fatal() {
        let mut cfg = fine_grid();
        cfg.survey.rows = 4;
        cfg.survey.columns = 4;
        cfg.survey.corrupt_fraction = 0.25;
        let summary = Runner::new(&cfg).unwrap().execute().await.unwrap();
        let m = summary.metrics;
        assert!(m.frames_dropped > 0);
        assert_eq!((m.frames_accepted + m.frames_dropped) as usize, summary.frames_sent);
        assert_eq!(summary.readings_stored as u64, m.frames_accepted);
    }
}
