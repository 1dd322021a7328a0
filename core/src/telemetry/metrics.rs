use serde::Serialize;
use std::sync::Mutex;

/// Ingestion and detection counters shared by every worker.
pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_accepted: u64,
    pub frames_dropped: u64,
    pub frames_rejected: u64,
    pub readings_flushed: u64,
    pub flush_failures: u64,
    pub detections_emitted: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            apply(&mut metrics);
        }
    }

    pub fn record_accepted(&self) {
        self.update(|m| m.frames_accepted += 1);
    }

    pub fn record_dropped(&self) {
        self.update(|m| m.frames_dropped += 1);
    }

    pub fn record_rejected(&self) {
        self.update(|m| m.frames_rejected += 1);
    }

    pub fn record_flushed(&self, readings: usize) {
        self.update(|m| m.readings_flushed += readings as u64);
    }

    pub fn record_flush_failure(&self) {
        self.update(|m| m.flush_failures += 1);
    }

    pub fn record_detections(&self, count: usize) {
        self.update(|m| m.detections_emitted += count as u64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|m| *m).unwrap_or_default()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = MetricsRecorder::new();
        metrics.record_accepted();
        metrics.record_accepted();
        metrics.record_dropped();
        metrics.record_flushed(64);
        metrics.record_detections(2);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_accepted, 2);
        assert_eq!(snapshot.frames_dropped, 1);
        assert_eq!(snapshot.readings_flushed, 64);
        assert_eq!(snapshot.detections_emitted, 2);
        assert_eq!(snapshot.flush_failures, 0);
    }
}
