//! Acquisition workers: the producer side of the pipeline.
//!
//! ```text
//! LiveWorker    cpal callback → sample ring → acquisition thread ┐
//!                                                                 ├─► FrameProducer → FrameChannel
//! ReplayWorker  WAV in memory → paced acquisition thread ─────────┘   (Windower + try_enqueue)
//! ```
//!
//! Both variants run their activity on a dedicated thread and share the same
//! lifecycle: `start()` is a warning no-op while running, `stop()` is
//! idempotent and waits at most the configured grace period for the thread
//! to exit. A thread that ends on its own (end of file, device failure)
//! leaves the worker `Stopped`.

pub mod live;
pub mod replay;

pub use live::LiveWorker;
pub use replay::ReplayWorker;

use std::sync::{atomic::Ordering, Arc};

use crate::{
    buffering::{AudioChunk, EnqueueOutcome, FrameChannel, Windower},
    engine::pipeline::PipelineDiagnostics,
    error::Result,
    ipc::events::StreamState,
};

pub use crate::lifecycle::POLL_INTERVAL;
pub(crate) use crate::lifecycle::WorkerLifecycle;

/// Contract shared by every acquisition variant.
pub trait AcquisitionWorker: Send {
    /// Spawn the acquisition thread. Returns once the source is confirmed
    /// open (or failed to open). A no-op with a warning if already running.
    ///
    /// # Errors
    /// Source failures at startup (device open, file read). The worker is
    /// left `Stopped`.
    fn start(&mut self) -> Result<()>;

    /// Request a stop and wait up to the grace period for the thread to exit.
    /// Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    fn state(&self) -> StreamState {
        StreamState::from_running(self.is_running())
    }
}

/// Windower plus channel handle, owned by exactly one acquisition thread.
pub struct FrameProducer {
    windower: Windower,
    channel: FrameChannel,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl FrameProducer {
    pub fn new(
        window_size: usize,
        hop_size: usize,
        channel: FrameChannel,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Result<Self> {
        Ok(Self {
            windower: Windower::new(window_size, hop_size)?,
            channel,
            diagnostics,
        })
    }

    pub fn hop_size(&self) -> usize {
        self.windower.hop_size()
    }

    /// Window the chunk and offer the resulting frame. Never blocks.
    pub fn push(&mut self, chunk: &AudioChunk) -> EnqueueOutcome {
        let frame = self.windower.append(chunk);
        self.diagnostics
            .frames_produced
            .fetch_add(1, Ordering::Relaxed);
        self.channel.try_enqueue(frame)
    }
}
