//! Background poll loop
//!
//! Polls run one at a time: a slow request delays the next tick instead of
//! overlapping it, and ticks missed meanwhile are skipped.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::sync::SyncCoordinator;

/// Shortest period the loop will tick at; `interval` rejects zero
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Running poll loop. Dropping the handle stops it too.
pub struct PollHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop ticking and wait for the loop to exit. A poll already in flight
    /// finishes first.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Poll loop ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Poll `coordinator` every `period` until its factory code is cleared or
/// the handle is stopped. The first poll happens one period after start.
pub fn spawn(coordinator: SyncCoordinator, period: Duration) -> PollHandle {
    let period = period.max(MIN_PERIOD);
    let (stop, mut stopped) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval() fires immediately; skip that one
        ticker.tick().await;

        tracing::debug!(period_ms = period.as_millis() as u64, "Poll loop started");

        loop {
            tokio::select! {
                biased;
                _ = stopped.changed() => break,
                _ = ticker.tick() => {}
            }

            if coordinator.active_bucket().is_none() {
                tracing::debug!("No active factory code, stopping poll loop");
                break;
            }

            let outcome = coordinator.poll().await;
            tracing::trace!(?outcome, "Poll finished");
        }

        tracing::debug!("Poll loop stopped");
    });

    PollHandle { stop, task }
}
