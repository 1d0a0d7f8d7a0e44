//! `AedEngine`: the pipeline context owned by the process entry point.
//!
//! ## Lifecycle
//!
//! ```text
//! AedEngine::new()           → config validated, worker selected, status = stopped
//!     └─► warm_up()          → classifier loaded
//!         └─► start()        → loop thread spawned, then acquisition started, status = running
//!             └─► stop()     → acquisition stopped (grace), loop joined (timeout), status = stopped
//! ```
//!
//! `start()` while running and `stop()` while stopped are warning/no-op
//! calls. Every status transition is published to the sink. Dropping a
//! running engine stops it.
//!
//! A source that fails to open only takes its worker down: the loop keeps
//! running, the status stays `running`, and `is_acquiring()` reports false.
//!
//! ## Threading
//!
//! The acquisition worker and the processing loop each own one OS thread.
//! The engine only holds handles; all methods take `&self` so it can be
//! shared as `Arc<AedEngine>` with async tasks.

pub mod config;
pub mod pipeline;

pub use config::PipelineConfig;

use std::path::PathBuf;
use std::sync::{atomic::AtomicU64, Arc};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::{
    acquisition::{AcquisitionWorker, LiveWorker, ReplayWorker},
    audio::device::DeviceSelector,
    buffering::{DequeueOutcome, FrameChannel},
    error::Result,
    features::ExtractorHandle,
    inference::ModelHandle,
    ipc::{ResultSink, StreamState, SystemStatus},
    monitor::{ResourceMonitor, SysinfoMonitor},
};

use pipeline::{DiagnosticsSnapshot, PipelineDiagnostics, ProcessingContext, ProcessingLoop};

/// Where frames come from.
#[derive(Debug, Clone)]
pub enum AcquisitionSource {
    /// Capture from an input device.
    Live { device: DeviceSelector },
    /// Replay a WAV file at real-time pace; stops at end of file.
    Replay { path: PathBuf },
}

type MonitorFactory = Box<dyn Fn() -> Box<dyn ResourceMonitor> + Send + Sync>;

/// The top-level pipeline handle.
pub struct AedEngine {
    config: PipelineConfig,
    extractor: ExtractorHandle,
    model: ModelHandle,
    sink: Arc<dyn ResultSink>,
    channel: FrameChannel,
    worker: Mutex<Box<dyn AcquisitionWorker>>,
    processing: Mutex<Option<ProcessingLoop>>,
    monitor: MonitorFactory,
    /// Serializes `start()` / `stop()` so `state` is never held across a
    /// blocking source open.
    transition: Mutex<()>,
    /// Set only by explicit `start()` / `stop()`.
    state: Mutex<StreamState>,
    /// Sequence numbers continue across restarts.
    seq: Arc<AtomicU64>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl AedEngine {
    /// Build the context. Does not start anything; call `warm_up()` then
    /// `start()`.
    ///
    /// # Errors
    /// `AedError::InvalidConfig` if `config` fails validation.
    pub fn new(
        config: PipelineConfig,
        extractor: ExtractorHandle,
        model: ModelHandle,
        sink: Arc<dyn ResultSink>,
        source: AcquisitionSource,
    ) -> Result<Self> {
        config.validate()?;
        let channel = FrameChannel::new(config.channel_capacity);
        let diagnostics = Arc::new(PipelineDiagnostics::default());

        let worker: Box<dyn AcquisitionWorker> = match source {
            AcquisitionSource::Live { device } => Box::new(LiveWorker::new(
                device,
                &config,
                channel.clone(),
                Arc::clone(&diagnostics),
            )),
            AcquisitionSource::Replay { path } => Box::new(ReplayWorker::new(
                path,
                &config,
                channel.clone(),
                Arc::clone(&diagnostics),
            )),
        };

        info!(
            window = config.window_size(),
            hop = config.hop_size(),
            capacity = config.channel_capacity,
            "pipeline configured"
        );

        Ok(Self {
            config,
            extractor,
            model,
            sink,
            channel,
            worker: Mutex::new(worker),
            processing: Mutex::new(None),
            monitor: Box::new(|| Box::new(SysinfoMonitor::new())),
            transition: Mutex::new(()),
            state: Mutex::new(StreamState::Stopped),
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics,
        })
    }

    /// Replace the CPU monitor built for each run (default: `SysinfoMonitor`).
    pub fn with_monitor<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn ResourceMonitor> + Send + Sync + 'static,
    {
        self.monitor = Box::new(factory);
        self
    }

    /// Load the classifier (weights, dummy inference). Call once before
    /// `start()`.
    pub fn warm_up(&self) -> Result<()> {
        info!("warming up classifier");
        self.model.0.lock().warm_up()?;
        info!(model = %self.model.model_id(), "classifier ready");
        Ok(())
    }

    /// Start the processing loop, then the acquisition worker.
    ///
    /// Blocks until the source is confirmed open or has failed to open.
    ///
    /// # Errors
    /// The loop thread could not be spawned, or the source failed at startup
    /// (device open, WAV read). A source failure stops only that worker: the
    /// engine is `Running` with the loop up but receives no frames.
    pub fn start(&self) -> Result<()> {
        let _transition = self.transition.lock();
        if *self.state.lock() == StreamState::Running {
            warn!("pipeline already running");
            return Ok(());
        }

        let mut processing = ProcessingLoop::new(ProcessingContext {
            config: self.config.clone(),
            channel: self.channel.clone(),
            extractor: self.extractor.clone(),
            model: self.model.clone(),
            sink: Arc::clone(&self.sink),
            monitor: (self.monitor)(),
            running: Arc::default(),
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&self.diagnostics),
        });
        processing.start()?;
        *self.processing.lock() = Some(processing);
        *self.state.lock() = StreamState::Running;
        info!("pipeline started");
        self.publish_status();

        let acquisition = self.worker.lock().start();
        if let Err(e) = &acquisition {
            error!("acquisition failed to start; pipeline stays up without input: {e}");
        }
        acquisition
    }

    /// Stop acquisition (bounded by `stop_grace`), then the loop (bounded by
    /// `loop_join_timeout`). Frames still queued are discarded. Idempotent.
    pub fn stop(&self) {
        let _transition = self.transition.lock();
        if *self.state.lock() == StreamState::Stopped {
            return;
        }
        info!("pipeline stop requested");

        self.worker.lock().stop();
        if let Some(mut processing) = self.processing.lock().take() {
            processing.stop();
        }
        let mut discarded = 0usize;
        while let DequeueOutcome::Frame(_) = self.channel.dequeue(Duration::ZERO) {
            discarded += 1;
        }
        if discarded > 0 {
            info!(discarded, "discarded queued frames");
        }

        *self.state.lock() = StreamState::Stopped;
        self.publish_status();
    }

    /// `{running/stopped, model, threads}`.
    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            status: *self.state.lock(),
            model: self.model.model_id(),
            threads: self.model.num_threads(),
        }
    }

    /// Whether the acquisition worker is still producing. A replay worker
    /// turns false at end of file while the engine stays `Running`.
    pub fn is_acquiring(&self) -> bool {
        self.worker.lock().is_running()
    }

    /// Frames waiting for the processing loop.
    pub fn pending_frames(&self) -> usize {
        self.channel.len()
    }

    /// Operator hook: retune feature normalization on the fly.
    pub fn set_normalization(&self, mean: f32, std: f32) {
        self.extractor.set_normalization(mean, std);
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot().with_channel(&self.channel)
    }

    fn publish_status(&self) {
        if let Err(e) = self.sink.publish_status(&self.status()) {
            warn!("status publish failed: {e}");
        }
    }
}

impl Drop for AedEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
