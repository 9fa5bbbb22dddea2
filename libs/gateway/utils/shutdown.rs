//! Graceful shutdown management

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Manages graceful shutdown for the single-threaded gateway loop
pub struct ShutdownManager {
    flag: Arc<AtomicBool>,
}

impl ShutdownManager {
    /// Create a new shutdown manager with running state
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Watch for Ctrl+C or SIGTERM on a dedicated thread.
    ///
    /// The gateway loop is synchronous, so the signal future gets its own
    /// current-thread runtime instead of a task on the caller's.
    pub fn spawn_signal_handler(&self) -> std::io::Result<()> {
        let flag = Arc::clone(&self.flag);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        std::thread::Builder::new()
            .name("muse-signals".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    if let Err(e) = wait_for_signal().await {
                        error!("Signal handler failed: {}", e);
                        return;
                    }
                    info!("");
                    info!("Received shutdown signal");
                    info!("Shutting down gracefully...");
                    flag.store(false, Ordering::Release);
                });
            })?;
        Ok(())
    }

    /// Check if the process should continue running
    pub fn is_running(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Request shutdown without a signal
    pub fn trigger(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// Get a clone of the shutdown flag
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    use signal::unix::{signal as unix_signal, SignalKind};

    let mut terminate = unix_signal(SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}
