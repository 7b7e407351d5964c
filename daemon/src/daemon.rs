use anyhow::{Context, Result};
use replica_sync::{Logger, PeriodicScheduler, TracingLogger, TreeSynchronizer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::RuntimeSettings;

/// Long-running mirror process: scheduler plus signal handling
pub struct MirrorDaemon {
    settings: RuntimeSettings,
    logger: Arc<dyn Logger>,
    cancel: CancellationToken,
}

impl MirrorDaemon {
    pub fn new(settings: RuntimeSettings) -> Self {
        Self::with_logger(settings, Arc::new(TracingLogger))
    }

    pub fn with_logger(settings: RuntimeSettings, logger: Arc<dyn Logger>) -> Self {
        Self {
            settings,
            logger,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the daemon when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until a signal arrives, `--once` completes, or the source disappears.
    ///
    /// Returns the number of passes started.
    #[instrument(skip(self), fields(source = %self.settings.source.display(), replica = %self.settings.replica.display()))]
    pub async fn run(self) -> Result<u64> {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            once = self.settings.once,
            "Starting mirror daemon"
        );

        let synchronizer = TreeSynchronizer::new(self.settings.sync_options.clone(), self.logger.clone());
        let mut scheduler = PeriodicScheduler::new(
            synchronizer,
            &self.settings.source,
            &self.settings.replica,
            self.settings.interval,
            self.logger.clone(),
            self.cancel.clone(),
        );
        if self.settings.once {
            scheduler = scheduler.with_max_passes(1);
        }

        let signals = tokio::spawn(shutdown_on_signal(self.cancel.clone()));
        let result = scheduler.run().await;
        signals.abort();

        let passes = result.context("Mirroring stopped")?;
        info!(passes, "Mirror daemon stopped");
        Ok(passes)
    }
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Ctrl+C received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }

    cancel.cancel();
}
