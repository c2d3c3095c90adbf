// Periodic runner for background maintenance work (NER health probe).
// Thin wrapper over tokio's interval timer with watch-channel shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Handle for stopping a running executor
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Runs an async task on a fixed interval until shut down.
///
/// The first run happens one full interval after `start`; callers that
/// need an immediate first execution (the NER startup probe) perform it
/// themselves before handing the recurring part over. Task failures are
/// logged and never stop the schedule.
pub struct ScheduledExecutor {
    interval: Duration,
    task_name: String,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ScheduledExecutor {
    pub fn new(task_name: impl Into<String>, interval: Duration) -> Self {
        let (tx, _) = watch::channel(false);
        Self { task_name: task_name.into(), interval, shutdown: Arc::new(tx) }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: Arc::clone(&self.shutdown) }
    }

    pub async fn start<F, Fut>(self, mut task: F)
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send,
    {
        let mut shutdown_rx = self.shutdown.subscribe();

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The timer's first tick completes immediately; swallow it so the
        // task waits a full interval before its first run.
        ticker.tick().await;

        tracing::info!(
            "Scheduled task '{}' running every {:?}",
            self.task_name,
            self.interval
        );

        loop {
            // Covers a shutdown that was requested before we subscribed
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = task().await {
                        tracing::warn!("Scheduled task '{}' failed: {}", self.task_name, e);
                    }
                },
            }
        }

        tracing::info!("Scheduled task '{}' stopped", self.task_name);
    }
}
