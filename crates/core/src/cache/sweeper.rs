//! Timer-driven eviction of expired cache entries.

use super::DedupCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub local: usize,
    pub shared: u64,
}

/// Handle to a running sweeper task.
///
/// The sweep runs on its own interval, independent of request traffic,
/// until [`SweeperHandle::stop`] is called or the token is cancelled.
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Start sweeping `cache` every `every`.
    ///
    /// The first sweep happens one full interval after start.
    pub fn start(cache: Arc<DedupCache>, every: Duration, cancel: CancellationToken) -> Self {
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = cache.sweep().await;
                        tracing::debug!(local = report.local, shared = report.shared, "cache sweep");
                    }
                    _ = token.cancelled() => {
                        tracing::debug!("cache sweeper shutting down");
                        break;
                    }
                }
            }
        });

        Self { cancel, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the sweeper and wait for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "cache sweeper task failed");
        }
    }
}
