use crate::ingest::IngestConfig;
use crate::interface::Reading;
use crate::prelude::{FusionError, FusionResult};
use crate::store::ReadingStore;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Exponential backoff between flush attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            attempts: config.flush_attempts.max(1),
            initial_backoff: Duration::from_millis(config.flush_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Per-device buffer of conditioned readings awaiting persistence.
pub struct ReadingBuffer {
    pending: Vec<Reading>,
    batch_size: usize,
    policy: RetryPolicy,
    store: Arc<dyn ReadingStore>,
}

impl ReadingBuffer {
    pub fn new(store: Arc<dyn ReadingStore>, batch_size: usize, policy: RetryPolicy) -> Self {
        Self {
            pending: Vec::with_capacity(batch_size),
            batch_size: batch_size.max(1),
            policy,
            store,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Buffers a reading and flushes once the batch is full. Returns the
    /// readings that were committed, empty when nothing was flushed.
    pub async fn push(&mut self, reading: Reading) -> FusionResult<Vec<Reading>> {
        self.pending.push(reading);
        if self.pending.len() >= self.batch_size {
            self.flush().await
        } else {
            Ok(Vec::new())
        }
    }

    /// Writes every pending reading in one batch and hands the committed
    /// batch back. Persistence failures are retried with backoff; once
    /// attempts run out the error is returned and the batch stays buffered.
    pub async fn flush(&mut self) -> FusionResult<Vec<Reading>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let mut attempt = 1;
        loop {
            match self.store.insert_batch(&self.pending).await {
                Ok(()) => {
                    let committed = std::mem::replace(
                        &mut self.pending,
                        Vec::with_capacity(self.batch_size),
                    );
                    info!("flushed {} reading(s) on attempt {}", committed.len(), attempt);
                    return Ok(committed);
                }
                Err(FusionError::PersistenceFailure(reason)) if attempt < self.policy.attempts => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        "flush attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, self.policy.attempts, reason, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        "flush of {} reading(s) gave up after {} attempt(s): {}",
                        self.pending.len(),
                        attempt,
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Drops the uncommitted batch, returning how many readings were lost.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
