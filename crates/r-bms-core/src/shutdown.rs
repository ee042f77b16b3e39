//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Termination signal handling for the monitor."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

/// Latches the first termination request.
///
/// Later requests are logged and otherwise ignored, so the termination
/// sequence runs at most once.
#[derive(Debug)]
pub struct TerminationCoordinator {
    triggered: AtomicBool,
    signal: watch::Sender<Option<&'static str>>,
}

impl TerminationCoordinator {
    pub fn new() -> Arc<Self> {
        let (signal, _) = watch::channel(None);
        Arc::new(Self {
            triggered: AtomicBool::new(false),
            signal,
        })
    }

    /// Request termination. Returns `true` only for the first request.
    pub fn trigger(&self, reason: &'static str) -> bool {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(reason, "termination already in progress");
            return false;
        }
        info!(reason, "termination requested");
        self.signal.send_replace(Some(reason));
        true
    }

    /// Resolve with the reason of the first request, immediately if one already happened.
    pub async fn wait(&self) -> &'static str {
        let mut rx = self.signal.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            // The sender lives in `self`, so the channel cannot close here.
            if rx.changed().await.is_err() {
                return "coordinator dropped";
            }
        }
    }

    /// Forward process signals (interrupt, and terminate on unix) into the coordinator.
    ///
    /// Keeps listening after the first signal so repeated signals are observed
    /// and ignored instead of killing the process mid-shutdown.
    pub async fn listen_for_signals(self: Arc<Self>) -> Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate =
                signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
            loop {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        result.context("failed to listen for interrupt")?;
                        self.trigger("interrupt");
                    }
                    _ = terminate.recv() => {
                        self.trigger("terminate");
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            loop {
                tokio::signal::ctrl_c()
                    .await
                    .context("failed to listen for interrupt")?;
                self.trigger("interrupt");
            }
        }
    }
}
