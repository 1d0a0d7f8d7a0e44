//! Start/stop bookkeeping shared by the acquisition workers and the
//! processing loop.
//!
//! Each owned thread holds an [`ExitGuard`]. Dropping the guard (normal
//! return, early exit or panic) clears the running flag and closes the exit
//! channel, which is what a bounded `stop()` waits on.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{info, warn};

use crate::error::{AedError, Result};

/// How often an owned thread re-checks its running flag while idle.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Held by the owned thread; dropping it marks the activity stopped and
/// wakes a pending `stop()`.
pub(crate) struct ExitGuard {
    running: Arc<AtomicBool>,
    _exited: Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Running flag and exit signal of one thread-backed activity.
///
/// Each `begin()` creates a fresh flag, so a thread that outlived a previous
/// `stop()` grace period can never be revived by a later `start()`.
pub(crate) struct WorkerLifecycle {
    name: &'static str,
    running: Arc<AtomicBool>,
    exited: Option<Receiver<()>>,
    grace: Duration,
}

impl WorkerLifecycle {
    pub(crate) fn new(name: &'static str, grace: Duration) -> Self {
        Self {
            name,
            running: Arc::new(AtomicBool::new(false)),
            exited: None,
            grace,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stopped → Running. Returns `None` (after warning) if already running.
    pub(crate) fn begin(&mut self) -> Option<(Arc<AtomicBool>, ExitGuard)> {
        if self.is_running() {
            warn!(worker = self.name, "already running");
            return None;
        }
        let running = Arc::new(AtomicBool::new(true));
        let (exited_tx, exited_rx) = crossbeam_channel::bounded(0);
        self.running = Arc::clone(&running);
        self.exited = Some(exited_rx);
        let guard = ExitGuard {
            running: Arc::clone(&running),
            _exited: exited_tx,
        };
        Some((running, guard))
    }

    /// Wait for the thread's startup report.
    pub(crate) fn await_ready(&mut self, ready: Receiver<Result<()>>) -> Result<()> {
        match ready.recv() {
            Ok(Ok(())) => {
                info!(worker = self.name, "started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(AedError::Other(anyhow::anyhow!(
                    "{} thread died during startup",
                    self.name
                )))
            }
        }
    }

    /// Clear the flag and wait at most the grace period for the thread to
    /// exit. Idempotent.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(exited) = self.exited.take() else {
            return;
        };
        match exited.recv_timeout(self.grace) {
            Err(RecvTimeoutError::Timeout) => warn!(
                worker = self.name,
                grace_ms = self.grace.as_millis() as u64,
                "thread still running after grace period"
            ),
            _ => info!(worker = self.name, "stopped"),
        }
    }

    /// Spawn the named thread.
    pub(crate) fn spawn<F>(&self, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        std::thread::Builder::new()
            .name(format!("aed-{}", self.name))
            .spawn(body)
            .map(|_| ())
            .map_err(AedError::from)
    }
}
