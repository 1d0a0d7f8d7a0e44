//! Result sinks: where the processing loop hands finished records.
//!
//! Delivery is fire-and-forget from the loop's point of view. A sink error is
//! logged and counted by the caller and the record is dropped; retrying is
//! the sink's own business.

use std::io::Write;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{AedError, Result};
use crate::ipc::events::{ResultRecord, SystemStatus};

/// Default per-subscriber backlog for [`BroadcastSink`].
pub const DEFAULT_SINK_CAPACITY: usize = 64;

pub trait ResultSink: Send + Sync {
    /// Accept one record. Must not block the caller for long.
    fn deliver(&self, record: &ResultRecord) -> Result<()>;

    /// Accept a status change. Sinks that do not report status ignore it.
    fn publish_status(&self, _status: &SystemStatus) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Broadcast fan-out
// ---------------------------------------------------------------------------

/// Fans records out to any number of async subscribers.
///
/// Slow subscribers lag (and see `RecvError::Lagged`) instead of blocking the
/// loop. Having no subscribers at all is not a delivery failure.
#[derive(Clone)]
pub struct BroadcastSink {
    records: broadcast::Sender<ResultRecord>,
    status: broadcast::Sender<SystemStatus>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (records, _) = broadcast::channel(capacity.max(1));
        let (status, _) = broadcast::channel(capacity.max(1));
        Self { records, status }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResultRecord> {
        self.records.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SystemStatus> {
        self.status.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.records.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_SINK_CAPACITY)
    }
}

impl ResultSink for BroadcastSink {
    fn deliver(&self, record: &ResultRecord) -> Result<()> {
        if self.records.send(record.clone()).is_err() {
            debug!(seq = record.seq, "no subscribers for result record");
        }
        Ok(())
    }

    fn publish_status(&self, status: &SystemStatus) -> Result<()> {
        let _ = self.status.send(status.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

/// Writes one JSON object per line to any `Write` (stdout, a file, a socket).
pub struct JsonLinesSink<W: Write + Send> {
    out: Mutex<W>,
    include_status: bool,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            include_status: false,
        }
    }

    /// Also write status changes as lines (`{"status": ...}` objects).
    pub fn with_status(mut self) -> Self {
        self.include_status = true;
        self
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write_line<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        let mut out = self.out.lock();
        serde_json::to_writer(&mut *out, value).map_err(|e| AedError::Sink(e.to_string()))?;
        out.write_all(b"\n")
            .and_then(|_| out.flush())
            .map_err(|e| AedError::Sink(e.to_string()))
    }
}

impl<W: Write + Send> ResultSink for JsonLinesSink<W> {
    fn deliver(&self, record: &ResultRecord) -> Result<()> {
        self.write_line(record)
    }

    fn publish_status(&self, status: &SystemStatus) -> Result<()> {
        if self.include_status {
            self.write_line(status)?;
        }
        Ok(())
    }
}
