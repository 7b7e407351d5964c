//! Fixed-period driver for the tree synchronizer

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::logger::Logger;
use crate::sync_engine::TreeSynchronizer;

/// Lifecycle of a [`PeriodicScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scanning,
    Sleeping,
    Stopped,
}

/// Runs one pass, waits `interval`, and repeats until cancelled.
///
/// The period is measured from the end of one pass to the start of the
/// next, so passes never overlap.
pub struct PeriodicScheduler {
    synchronizer: TreeSynchronizer,
    source: PathBuf,
    replica: PathBuf,
    interval: Duration,
    logger: Arc<dyn Logger>,
    cancel: CancellationToken,
    max_passes: Option<u64>,
    state: watch::Sender<SchedulerState>,
}

impl PeriodicScheduler {
    /// The synchronizer is rebound to `cancel` so a single token stops both
    /// the sleep and an in-flight pass.
    pub fn new(
        synchronizer: TreeSynchronizer,
        source: impl Into<PathBuf>,
        replica: impl Into<PathBuf>,
        interval: Duration,
        logger: Arc<dyn Logger>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            synchronizer: synchronizer.with_cancellation(cancel.clone()),
            source: source.into(),
            replica: replica.into(),
            interval,
            logger,
            cancel,
            max_passes: None,
            state,
        }
    }

    /// Stop after `passes` passes instead of running forever
    pub fn with_max_passes(mut self, passes: u64) -> Self {
        self.max_passes = Some(passes);
        self
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch state transitions from another task
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Drive passes until cancellation, the pass limit, or a fatal error.
    ///
    /// Returns the number of passes started. A fatal error is logged and
    /// returned; every other pass error is logged and the loop carries on.
    pub async fn run(&self) -> Result<u64> {
        let mut passes = 0u64;

        let outcome = loop {
            if self.cancel.is_cancelled() {
                break Ok(passes);
            }
            if self.max_passes.is_some_and(|max| passes >= max) {
                break Ok(passes);
            }

            self.set_state(SchedulerState::Scanning);
            passes += 1;
            debug!(pass = passes, "Starting pass");

            match self.synchronizer.synchronize(&self.source, &self.replica).await {
                Ok(metrics) => {
                    debug!(session_id = %metrics.session_id, changes = metrics.changes(), "Pass finished");
                }
                Err(SyncError::Cancelled) => break Ok(passes),
                Err(e) if e.is_fatal() => {
                    self.logger.error(&e.to_string());
                    break Err(e);
                }
                Err(e) => {
                    self.logger.error(&format!("Synchronization pass failed: {}", e));
                }
            }

            if self.max_passes.is_some_and(|max| passes >= max) {
                break Ok(passes);
            }

            self.set_state(SchedulerState::Sleeping);
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.cancel.cancelled() => break Ok(passes),
            }
        };

        self.set_state(SchedulerState::Stopped);
        if outcome.is_ok() {
            self.logger.info(&format!("Synchronization stopped after {} pass(es)", passes));
        }
        outcome
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }
}
