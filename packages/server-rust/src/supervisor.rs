//! Wires logger, store, and frontend together; owns lifecycle and
//! coordinates hot-swap and shutdown.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use cloudkv_core::KvStore;
use tokio::sync::watch;

use crate::frontend::{Frontend, FrontendError};
use crate::logger::TransactionLogger;
use crate::replay::{self, ReplayError};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Frontend(#[from] FrontendError),
}

/// Holds references to the current logger, current frontend, and
/// coordinates their lifecycle.
///
/// `Start()`, `Stop()`, `SwitchLogger()`/`SwitchFrontend()` mirror
/// spec.md §4.6 exactly. The hot-swap protocol triggered by the config
/// watcher is `Stop` → swap logger → swap frontend → `Start` in a new
/// task: replay in the new `Start` rebuilds state from the (possibly new)
/// logger's history, so changing the logger backend changes the source
/// of truth. No migration across logger backends is performed.
pub struct Supervisor {
    logger: ArcSwap<dyn TransactionLogger>,
    frontend: ArcSwap<dyn Frontend>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    close_deadline: Duration,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        logger: Arc<dyn TransactionLogger>,
        frontend: Arc<dyn Frontend>,
        close_deadline: Duration,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            logger: ArcSwap::new(logger),
            frontend: ArcSwap::new(frontend),
            cancel_tx,
            cancel_rx,
            close_deadline,
        }
    }

    pub fn switch_logger(&self, new: Arc<dyn TransactionLogger>) {
        self.logger.store(new);
    }

    pub fn switch_frontend(&self, new: Arc<dyn Frontend>) {
        self.frontend.store(new);
    }

    /// Replays the current logger's history into a fresh store, starts
    /// the writer, starts the frontend, then multiplexes frontend errors,
    /// logger errors, and cancellation until cancellation fires. Errors
    /// observed on either channel are logged and are not fatal.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let logger = self.logger.load_full();
        let store = Arc::new(replay::replay(logger.as_ref()).await?);

        logger.run();
        let mut logger_errs = logger
            .take_errors()
            .expect("run() just started the writer; its error channel exists");

        let frontend = self.frontend.load_full();
        let mut frontend_errs = frontend.start(Arc::clone(&store)).await?;

        let mut cancel_rx = self.cancel_rx.clone();
        let mut frontend_done = false;
        let mut logger_done = false;

        loop {
            tokio::select! {
                _ = cancel_rx.changed() => {
                    if *cancel_rx.borrow() {
                        tracing::info!("supervisor cancellation fired, stopping");
                        return Ok(());
                    }
                }
                maybe = frontend_errs.recv(), if !frontend_done => {
                    match maybe {
                        Some(e) => tracing::error!(error = %e, "frontend error"),
                        None => frontend_done = true,
                    }
                }
                maybe = logger_errs.recv(), if !logger_done => {
                    match maybe {
                        Some(e) => tracing::error!(error = %e, "logger error"),
                        None => logger_done = true,
                    }
                }
            }
        }
    }

    /// Triggers cancellation, closes the frontend with a deadline, then
    /// closes the logger.
    pub async fn stop(&self) {
        let _ = self.cancel_tx.send(true);

        let frontend = self.frontend.load_full();
        if let Err(e) = frontend.close(self.close_deadline).await {
            tracing::error!(error = %e, "frontend close failed");
        }

        let logger = self.logger.load_full();
        if let Err(e) = logger.close().await {
            tracing::error!(error = %e, "logger close failed");
        }

        let _ = self.cancel_tx.send(false);
    }

    /// Stops the service, swaps in the new logger and frontend, and
    /// restarts in a new task — spec.md §4.6's hot-swap protocol.
    pub fn hot_swap(
        self: &Arc<Self>,
        new_logger: Arc<dyn TransactionLogger>,
        new_frontend: Arc<dyn Frontend>,
    ) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            supervisor.stop().await;
            supervisor.switch_logger(new_logger);
            supervisor.switch_frontend(new_frontend);
            if let Err(e) = supervisor.start().await {
                tracing::error!(error = %e, "restart after hot-swap failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::rest::RestFrontend;
    use crate::logger::file::FileTransactionLogger;

    #[tokio::test]
    async fn start_then_stop_terminates_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let logger: Arc<dyn TransactionLogger> =
            Arc::new(FileTransactionLogger::open(dir.path().join("log")).unwrap());
        let frontend: Arc<dyn Frontend> = Arc::new(RestFrontend::new(Arc::clone(&logger), 0));
        let supervisor = Arc::new(Supervisor::new(logger, frontend, Duration::from_secs(1)));

        let task_supervisor = Arc::clone(&supervisor);
        let handle = tokio::spawn(async move { task_supervisor.start().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        supervisor.stop().await;

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.is_ok());
        assert!(result.unwrap().unwrap().is_ok());
    }
}
