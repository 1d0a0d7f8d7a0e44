//! WAV file replay at real-time pace.
//!
//! The asset is decoded once when the worker starts, then stepped through in
//! `hop_size` chunks. Chunk `i` is released at `start + i * hop_duration`, so
//! playback speed tracks the wall clock regardless of how long each push
//! takes. End of file stops the worker.

use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use super::{AcquisitionWorker, FrameProducer, WorkerLifecycle, POLL_INTERVAL};
use crate::{
    audio::wav::load_wav,
    buffering::{AudioChunk, FrameChannel},
    engine::{pipeline::PipelineDiagnostics, PipelineConfig},
    error::Result,
};

/// How a replay pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayEnd {
    /// Every chunk was emitted.
    Finished,
    /// The running flag was cleared first.
    Stopped,
}

pub struct ReplayWorker {
    path: PathBuf,
    config: PipelineConfig,
    channel: FrameChannel,
    diagnostics: Arc<PipelineDiagnostics>,
    lifecycle: WorkerLifecycle,
}

impl ReplayWorker {
    pub fn new(
        path: impl Into<PathBuf>,
        config: &PipelineConfig,
        channel: FrameChannel,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Self {
        Self {
            path: path.into(),
            config: config.clone(),
            channel,
            diagnostics,
            lifecycle: WorkerLifecycle::new("replay", config.stop_grace),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AcquisitionWorker for ReplayWorker {
    fn start(&mut self) -> Result<()> {
        let mut producer = FrameProducer::new(
            self.config.window_size(),
            self.config.hop_size(),
            self.channel.clone(),
            Arc::clone(&self.diagnostics),
        )?;
        let Some((running, guard)) = self.lifecycle.begin() else {
            return Ok(());
        };

        let path = self.path.clone();
        let expected_rate = self.config.sample_rate;
        let hop_duration = self.config.hop_duration();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        self.lifecycle.spawn(move || {
            let _guard = guard;
            let asset = match load_wav(&path) {
                Ok(asset) => asset,
                Err(e) => {
                    error!("wav playback error: {e}");
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if asset.sample_rate != expected_rate {
                warn!(
                    file_rate = asset.sample_rate,
                    expected_rate, "wav sample rate differs from pipeline rate; not resampling"
                );
            }
            info!(
                samples = asset.samples.len(),
                channels = asset.channels,
                seconds = format_args!("{:.2}", asset.duration_secs()),
                "wav file loaded"
            );
            let _ = ready_tx.send(Ok(()));

            match replay(&asset.samples, hop_duration, &running, &mut producer) {
                ReplayEnd::Finished => info!("wav playback finished"),
                ReplayEnd::Stopped => info!("wav playback stopped"),
            }
        })?;

        self.lifecycle.await_ready(ready_rx)
    }

    fn stop(&mut self) {
        self.lifecycle.stop();
    }

    fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }
}

/// Push `samples` through `producer` one hop at a time, paced to `hop_duration`.
pub fn replay(
    samples: &[f32],
    hop_duration: Duration,
    running: &AtomicBool,
    producer: &mut FrameProducer,
) -> ReplayEnd {
    let hop = producer.hop_size();
    let started = Instant::now();

    for (i, slice) in samples.chunks(hop).enumerate() {
        if i > 0 && !sleep_until(started + hop_duration * i as u32, running) {
            return ReplayEnd::Stopped;
        }
        if !running.load(Ordering::Acquire) {
            return ReplayEnd::Stopped;
        }
        producer.push(&AudioChunk::padded(slice.to_vec(), hop));
    }
    ReplayEnd::Finished
}

/// Sleep until `deadline` in `POLL_INTERVAL` slices. Returns `false` if
/// `running` was cleared meanwhile.
fn sleep_until(deadline: Instant, running: &AtomicBool) -> bool {
    loop {
        if !running.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(POLL_INTERVAL));
    }
}
