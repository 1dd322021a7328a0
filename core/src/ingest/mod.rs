//! Device-stream ingestion: one worker task per connected device, a shared
//! connection registry, and batched reading persistence.

pub mod batch;
pub mod registry;
pub mod worker;

pub use batch::{ReadingBuffer, RetryPolicy};
pub use registry::ConnectionRegistry;
pub use worker::{connect, DeviceSession, DeviceWorker, FrameOutcome, Inbound};

use crate::prelude::{FusionError, FusionResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Readings buffered per device before a flush.
    pub batch_size: usize,
    /// Inbound messages queued per device before the socket is back-pressured.
    pub channel_capacity: usize,
    pub flush_attempts: u32,
    pub flush_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Archive raw frame payloads to the blob store.
    pub archive_raw: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            channel_capacity: 256,
            flush_attempts: 4,
            flush_backoff_ms: 50,
            max_backoff_ms: 2_000,
            archive_raw: false,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> FusionResult<()> {
        if self.batch_size == 0 {
            return Err(FusionError::InvalidParameter("batch_size must be at least 1".into()));
        }
        if self.channel_capacity == 0 {
            return Err(FusionError::InvalidParameter(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if self.flush_attempts == 0 {
            return Err(FusionError::InvalidParameter(
                "flush_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
