use crate::ingest::batch::{ReadingBuffer, RetryPolicy};
use crate::interface::{
    decode_control, decode_frame, ControlMessage, DeviceReply, DeviceStatus, Reading, Scan,
    ScanStatus,
};
use crate::prelude::{FusionError, FusionResult};
use crate::service::FusionService;
use crate::store::RawBlobKey;
use crate::telemetry::LogManager;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use uuid::Uuid;

const DEFAULT_SCAN_TYPE: &str = "survey";

/// One message received on a device stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Binary(Vec<u8>),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Accepted,
    Dropped,
    Rejected,
}

/// Processes the frames of one device strictly in arrival order. A reading
/// reaches the live filter state only once its batch is committed.
pub struct DeviceWorker {
    device_id: Uuid,
    generation: u64,
    service: Arc<FusionService>,
    buffer: ReadingBuffer,
    outbound: UnboundedSender<DeviceReply>,
    log: LogManager,
}

impl DeviceWorker {
    pub fn new(
        service: Arc<FusionService>,
        device_id: Uuid,
        generation: u64,
        outbound: UnboundedSender<DeviceReply>,
    ) -> Self {
        let ingest = &service.config().ingest;
        let buffer = ReadingBuffer::new(
            Arc::clone(&service.stores().readings),
            ingest.batch_size,
            RetryPolicy::from_config(ingest),
        );
        Self {
            device_id,
            generation,
            service,
            buffer,
            outbound,
            log: LogManager::new("worker"),
        }
    }

    pub fn device_id(&self) -> Uuid {
        self.device_id
    }

    fn reply(&self, reply: DeviceReply) {
        if self.outbound.send(reply).is_err() {
            self.log
                .trace(&format!("device {} went away before a reply", self.device_id));
        }
    }

    fn drop_frame(&self, err: FusionError) -> FrameOutcome {
        self.log
            .warn(&format!("device {}: dropped frame: {}", self.device_id, err));
        self.service.metrics().record_dropped();
        FrameOutcome::Dropped
    }

    fn reject(&self, err: FusionError, scan_id: Uuid) -> FrameOutcome {
        self.service.metrics().record_rejected();
        self.reply(DeviceReply::Rejected {
            reason: err.to_string(),
            scan_id: Some(scan_id),
        });
        FrameOutcome::Rejected
    }

    /// Books the result of a flush. Committed readings are folded into the
    /// live filter state; an exhausted flush discards the batch, leaves the
    /// live state untouched and tells the device how many readings were lost.
    fn settle_flush(&mut self, result: FusionResult<Vec<Reading>>) {
        match result {
            Ok(committed) if committed.is_empty() => {}
            Ok(committed) => {
                self.service.metrics().record_flushed(committed.len());
                for reading in &committed {
                    self.apply_live(reading);
                }
            }
            Err(err) => {
                let lost = self.buffer.discard();
                self.service.metrics().record_flush_failure();
                self.log.warn(&format!(
                    "device {}: discarded {} unpersisted reading(s): {}",
                    self.device_id, lost, err
                ));
                self.reply(DeviceReply::Rejected {
                    reason: format!("{} reading(s) not persisted: {}", lost, err),
                    scan_id: None,
                });
            }
        }
    }

    fn apply_live(&self, reading: &Reading) {
        let key = match self.service.grid().assign(reading) {
            Ok(key) => key,
            Err(err) => {
                self.log
                    .warn(&format!("reading {} has no cell: {}", reading.id, err));
                return;
            }
        };
        let estimate = self.service.fusion().apply_reading(key, reading);
        self.log.trace(&format!(
            "scan {} cell {:x}/{} {}: z={:.3} -> x={:.3} P={:.4}",
            reading.scan_id,
            key.cell,
            key.bucket,
            reading.sensor_type,
            reading.value,
            estimate.mean,
            estimate.variance
        ));
    }

    pub async fn flush(&mut self) {
        let result = self.buffer.flush().await;
        self.settle_flush(result);
    }

    pub async fn handle_binary(&mut self, bytes: &[u8]) -> FusionResult<FrameOutcome> {
        let frame = match decode_frame(bytes) {
            Ok(frame) => frame,
            Err(err) => return Ok(self.drop_frame(err)),
        };
        match self.service.stores().scans.scan(frame.scan_id).await {
            Ok(scan) if scan.is_active() => {}
            Ok(_) => return Ok(self.reject(FusionError::ScanNotActive(frame.scan_id), frame.scan_id)),
            Err(err @ FusionError::NotFound { .. }) => return Ok(self.reject(err, frame.scan_id)),
            Err(err) => return Err(err),
        }

        let received_at = Utc::now();
        let reading = match self.service.preprocessor().reading(&frame, received_at) {
            Ok(reading) => reading,
            Err(err) if err.is_frame_local() => return Ok(self.drop_frame(err)),
            Err(err) => return Err(err),
        };
        if let Err(err) = self.service.grid().assign(&reading) {
            return Ok(self.drop_frame(err));
        }

        if self.service.config().ingest.archive_raw {
            let blob = RawBlobKey {
                scan_id: frame.scan_id,
                sensor_type: frame.sensor_type,
                timestamp: received_at,
            };
            self.service.stores().raw.put_raw(blob, frame.payload).await?;
        }

        self.service.metrics().record_accepted();

        let flushed = self.buffer.push(reading).await;
        self.settle_flush(flushed);
        Ok(FrameOutcome::Accepted)
    }

    pub async fn handle_text(&mut self, text: &str) -> FusionResult<()> {
        let message = match decode_control(text) {
            Ok(message) => message,
            Err(err) => {
                self.drop_frame(err);
                return Ok(());
            }
        };
        match message {
            ControlMessage::Heartbeat => {
                let now = Utc::now();
                self.service
                    .stores()
                    .devices
                    .update_device_status(self.device_id, DeviceStatus::Active, now)
                    .await?;
                self.reply(DeviceReply::HeartbeatAck {
                    time: now.timestamp(),
                });
            }
            ControlMessage::ScanStart {
                scan_id,
                mission_id,
                scan_type,
            } => self.start_scan(scan_id, mission_id, scan_type).await?,
            ControlMessage::ScanEnd { scan_id, status } => {
                self.end_scan(scan_id, status.unwrap_or(ScanStatus::Completed))
                    .await?
            }
        }
        Ok(())
    }

    async fn start_scan(
        &mut self,
        scan_id: Uuid,
        mission_id: Option<Uuid>,
        scan_type: Option<String>,
    ) -> FusionResult<()> {
        let scans = &self.service.stores().scans;
        match scans.scan(scan_id).await {
            Ok(scan) if scan.is_active() && scan.device_id == self.device_id => {}
            Ok(_) => {
                self.reject(FusionError::ScanNotActive(scan_id), scan_id);
                return Ok(());
            }
            Err(FusionError::NotFound { .. }) => {
                let scan = Scan::start(
                    scan_id,
                    mission_id,
                    self.device_id,
                    scan_type.as_deref().unwrap_or(DEFAULT_SCAN_TYPE),
                    Utc::now(),
                );
                scans.insert_scan(scan).await?;
                self.log
                    .record(&format!("device {} started scan {}", self.device_id, scan_id));
            }
            Err(err) => return Err(err),
        }
        self.reply(DeviceReply::ScanAck {
            scan_id,
            status: ScanStatus::InProgress,
        });
        Ok(())
    }

    /// Closes a scan: flushes buffered readings, records the final status,
    /// evaluates the live state of a completed scan and tears it down.
    async fn end_scan(&mut self, scan_id: Uuid, status: ScanStatus) -> FusionResult<()> {
        if status == ScanStatus::InProgress {
            self.reject(
                FusionError::InvalidParameter("scan_end cannot set status in_progress".into()),
                scan_id,
            );
            return Ok(());
        }
        match self.service.stores().scans.scan(scan_id).await {
            Ok(scan) if scan.is_active() => {}
            Ok(_) => {
                self.reject(FusionError::ScanNotActive(scan_id), scan_id);
                return Ok(());
            }
            Err(err @ FusionError::NotFound { .. }) => {
                self.reject(err, scan_id);
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        self.flush().await;
        self.service
            .stores()
            .scans
            .update_scan_status(scan_id, status, Utc::now())
            .await?;
        if status == ScanStatus::Completed {
            match self.service.pipeline().evaluate_live(scan_id).await {
                Ok(run) => self.log.record(&format!(
                    "scan {} completed: {} cell(s), {} new detection(s)",
                    scan_id,
                    run.cells_evaluated,
                    run.created.len()
                )),
                Err(err) => self
                    .log
                    .warn(&format!("scan {} evaluation failed: {}", scan_id, err)),
            }
        }
        let evicted = self.service.fusion().evict_scan(scan_id);
        self.log
            .trace(&format!("scan {}: released {} live cell(s)", scan_id, evicted));
        self.reply(DeviceReply::ScanAck { scan_id, status });
        Ok(())
    }

    /// Consumes the device stream until it closes, then shuts down.
    pub async fn run(mut self, mut inbound: Receiver<Inbound>) {
        if let Err(err) = self
            .service
            .stores()
            .devices
            .update_device_status(self.device_id, DeviceStatus::Active, Utc::now())
            .await
        {
            self.log
                .warn(&format!("device {}: could not mark active: {}", self.device_id, err));
        }
        while let Some(message) = inbound.recv().await {
            let result = match message {
                Inbound::Binary(bytes) => self.handle_binary(&bytes).await.map(|_| ()),
                Inbound::Text(text) => self.handle_text(&text).await,
            };
            if let Err(err) = result {
                self.log.warn(&format!("device {}: {}", self.device_id, err));
            }
        }
        self.shutdown().await;
    }

    /// Flushes what it can, deregisters this connection and marks the device
    /// inactive.
    pub async fn shutdown(mut self) {
        self.flush().await;
        self.service.registry().remove(self.device_id, self.generation);
        if let Err(err) = self
            .service
            .stores()
            .devices
            .update_device_status(self.device_id, DeviceStatus::Inactive, Utc::now())
            .await
        {
            self.log
                .warn(&format!("device {}: could not mark inactive: {}", self.device_id, err));
        }
        self.log
            .record(&format!("device {} disconnected", self.device_id));
    }
}

/// Handles held by the transport for one connected device.
pub struct DeviceSession {
    pub device_id: Uuid,
    pub generation: u64,
    pub inbound: Sender<Inbound>,
    pub outbound: UnboundedReceiver<DeviceReply>,
    pub handle: JoinHandle<()>,
}

/// Registers a device connection and spawns its worker task.
pub async fn connect(service: Arc<FusionService>, device_id: Uuid) -> FusionResult<DeviceSession> {
    service.stores().devices.device(device_id).await?;
    let (inbound_tx, inbound_rx) = mpsc::channel(service.config().ingest.channel_capacity);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    if let Some(previous) = service.registry().lookup(device_id) {
        LogManager::new("worker").record(&format!(
            "device {} reconnected, superseding connection {}",
            device_id, previous
        ));
    }
    let generation = service.registry().add(device_id, outbound_tx.clone());
    let worker = DeviceWorker::new(service, device_id, generation, outbound_tx);
    let handle = tokio::spawn(worker.run(inbound_rx));
    Ok(DeviceSession {
        device_id,
        generation,
        inbound: inbound_tx,
        outbound: outbound_rx,
        handle,
    })
}
