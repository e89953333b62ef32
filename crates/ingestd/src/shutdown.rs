//! 🛑 When to stop. Ctrl-C, SIGTERM, or somebody in-process pulling the lever.
//!
//! [`channel`] hands out a [`ShutdownTrigger`] (clone it, pass it around, pull it
//! anywhere) and a [`ShutdownWatcher`] that the run loop waits on.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info};

/// 🎯 Why the pipeline is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// ⌨️ SIGINT / Ctrl-C
    Interrupt,
    /// 📟 SIGTERM
    Terminate,
    /// 🎛️ A [`ShutdownTrigger`] was pulled (or every trigger was dropped).
    Requested,
}

/// 🎛️ Pull to stop. Cheap to clone, pulling twice is the same as pulling once.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug)]
pub struct ShutdownWatcher {
    rx: watch::Receiver<bool>,
    listen_for_signals: bool,
}

/// 🔗 A trigger and the watcher it fires. Signals are listened for by default.
pub fn channel() -> (ShutdownTrigger, ShutdownWatcher) {
    let (tx, rx) = watch::channel(false);
    (
        ShutdownTrigger { tx: Arc::new(tx) },
        ShutdownWatcher {
            rx,
            listen_for_signals: true,
        },
    )
}

impl ShutdownWatcher {
    /// 🙉 Only the trigger counts. For tests and embedders who handle signals themselves.
    pub fn without_signals(mut self) -> Self {
        self.listen_for_signals = false;
        self
    }

    /// ⏳ Wait for the first of: SIGINT, SIGTERM, the trigger.
    pub async fn wait(mut self) -> Result<ShutdownCause> {
        let signals = self.listen_for_signals;
        let cause = tokio::select! {
            interrupted = tokio::signal::ctrl_c(), if signals => {
                interrupted.context("💀 Couldn't listen for Ctrl-C")?;
                ShutdownCause::Interrupt
            }
            terminated = terminate_signal(), if signals => {
                terminated?;
                ShutdownCause::Terminate
            }
            pulled = async { self.rx.wait_for(|stop| *stop).await.is_ok() } => {
                if !pulled {
                    debug!("🛑 every shutdown trigger was dropped, treating that as a request");
                }
                ShutdownCause::Requested
            }
        };
        info!("🛑 shutdown requested: {:?}", cause);
        Ok(cause)
    }
}

#[cfg(unix)]
async fn terminate_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate =
        signal(SignalKind::terminate()).context("💀 Couldn't listen for SIGTERM")?;
    terminate.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate_signal() -> Result<()> {
    // -- no SIGTERM here. Ctrl-C will have to do.
    std::future::pending::<()>().await;
    Ok(())
}
