use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{ScanStatus, ScanStatusEvent};

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out sink for scan status events.
///
/// Delivery is best-effort and never blocks the orchestrator: events go
/// through a bounded broadcast channel, and a subscriber that falls behind
/// loses its oldest events rather than slowing anyone down. Events for one
/// job are emitted in monotonic state order.
pub struct NotificationSink {
    tx: broadcast::Sender<ScanStatusEvent>,
}

impl NotificationSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanStatusEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn emit(&self, event: ScanStatusEvent) {
        tracing::debug!(
            "Scan {} -> {}{}",
            event.job_id,
            event.state,
            event
                .progress_percent
                .map(|p| format!(" ({:.0}%)", p))
                .unwrap_or_default()
        );
        // send only fails with zero subscribers, which is fine
        let _ = self.tx.send(event);
    }
}

impl Default for NotificationSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Rate-limited progress publisher for the sampling and detection stages:
/// at most one progress tick per second per stage.
pub struct ProgressReporter {
    sink: Arc<NotificationSink>,
    job_id: Uuid,
    state: ScanStatus,
    operation: &'static str,
    min_interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressReporter {
    pub fn new(
        sink: Arc<NotificationSink>,
        job_id: Uuid,
        state: ScanStatus,
        operation: &'static str,
    ) -> Self {
        Self {
            sink,
            job_id,
            state,
            operation,
            min_interval: Duration::from_secs(1),
            last_emit: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn record(&self, done: usize, total: usize) {
        if total == 0 {
            return;
        }

        {
            let mut last = self.last_emit.lock().expect("progress lock poisoned");
            match *last {
                Some(at) if at.elapsed() < self.min_interval => return,
                _ => *last = Some(Instant::now()),
            }
        }

        let percent = (done as f64 / total as f64 * 100.0).min(100.0);
        self.sink.emit(ScanStatusEvent::progress(
            self.job_id,
            self.state,
            percent,
            format!("{} {}/{} columns", self.operation, done, total),
        ));
    }
}
