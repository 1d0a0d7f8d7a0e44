//! Live microphone acquisition.
//!
//! The cpal callback only pushes channel-0 samples into the SPSC ring. This
//! worker's thread owns the stream (it is `!Send`), drains the ring, resamples
//! if the device could not open at the pipeline rate, and emits one frame per
//! `hop_size` samples. A device error stops the worker for good; it is not
//! retried.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;

use tracing::{error, info};

use super::{AcquisitionWorker, FrameProducer, WorkerLifecycle, POLL_INTERVAL};
use crate::{
    audio::{
        device::DeviceSelector,
        resample::{RateConverter, RESAMPLE_BLOCK},
        LiveCapture,
    },
    buffering::{create_audio_ring, AudioChunk, AudioConsumer, Consumer, FrameChannel},
    engine::{pipeline::PipelineDiagnostics, PipelineConfig},
    error::Result,
};

pub struct LiveWorker {
    selector: DeviceSelector,
    config: PipelineConfig,
    channel: FrameChannel,
    diagnostics: Arc<PipelineDiagnostics>,
    lifecycle: WorkerLifecycle,
}

impl LiveWorker {
    pub fn new(
        selector: DeviceSelector,
        config: &PipelineConfig,
        channel: FrameChannel,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Self {
        Self {
            selector,
            config: config.clone(),
            channel,
            diagnostics,
            lifecycle: WorkerLifecycle::new("live", config.stop_grace),
        }
    }
}

impl AcquisitionWorker for LiveWorker {
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

        let selector = self.selector.clone();
        let target_rate = self.config.sample_rate;
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        self.lifecycle.spawn(move || {
            let _guard = guard;
            let (ring_tx, mut ring_rx) = create_audio_ring();

            // cpal::Stream is !Send: open it on this thread.
            let capture =
                match LiveCapture::open(&selector, target_rate, ring_tx, Arc::clone(&running)) {
                    Ok(c) => c,
                    Err(e) => {
                        error!("microphone error: {e}");
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
            let mut converter =
                match RateConverter::new(capture.sample_rate, target_rate, RESAMPLE_BLOCK) {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
            info!(
                device_rate = capture.sample_rate,
                channels = capture.channels,
                "microphone opened"
            );
            let _ = ready_tx.send(Ok(()));

            let chunks = drain(&mut ring_rx, &mut converter, &running, &mut producer);
            info!(chunks, "live acquisition ended");

            if capture.has_failed() {
                error!("capture device failed; live acquisition stopped until restarted");
            }
            capture.stop();
            // Stream drops here, releasing the device on this thread.
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

/// Move samples from the capture ring into `producer` one hop at a time
/// until `running` is cleared (stop request or device error). Returns the
/// number of chunks pushed. Samples short of a full hop are left unpushed.
pub fn drain(
    ring: &mut AudioConsumer,
    converter: &mut RateConverter,
    running: &AtomicBool,
    producer: &mut FrameProducer,
) -> u64 {
    let hop = producer.hop_size();
    let mut raw = vec![0f32; hop];
    let mut pending: Vec<f32> = Vec::with_capacity(hop * 2);
    let mut chunks = 0u64;

    while running.load(Ordering::Acquire) {
        let n = ring.pop_slice(&mut raw);
        if n == 0 {
            thread::sleep(POLL_INTERVAL);
            continue;
        }
        converter.process_into(&raw[..n], &mut pending);
        while pending.len() >= hop {
            let chunk = AudioChunk::padded(pending.drain(..hop).collect(), hop);
            producer.push(&chunk);
            chunks += 1;
        }
    }
    chunks
}

#[cfg(test)]
mod drain_tests {
    use super::*;
    use crate::buffering::{DequeueOutcome, Producer};
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn producer(window: usize, hop: usize, channel: &FrameChannel) -> FrameProducer {
        FrameProducer::new(
            window,
            hop,
            channel.clone(),
            Arc::new(PipelineDiagnostics::default()),
        )
        .unwrap()
    }

    #[test]
    fn cleared_flag_ends_drain_and_keeps_only_full_hops() {
        let channel = FrameChannel::new(16);
        let mut p = producer(8, 4, &channel);
        let (mut ring_tx, mut ring_rx) = create_audio_ring();
        let samples: Vec<f32> = (1..=14).map(|v| v as f32).collect();
        assert_eq!(ring_tx.push_slice(&samples), 14);
        let mut converter = RateConverter::new(16_000, 16_000, RESAMPLE_BLOCK).unwrap();
        let running = AtomicBool::new(true);

        let chunks = thread::scope(|s| {
            let worker = s.spawn(|| drain(&mut ring_rx, &mut converter, &running, &mut p));
            assert!(wait_until(Duration::from_secs(2), || channel.enqueued() == 3));
            // What the stream error callback does.
            running.store(false, Ordering::Release);
            worker.join().unwrap()
        });

        assert_eq!(chunks, 3);
        let mut frames = Vec::new();
        while let DequeueOutcome::Frame(f) = channel.dequeue(Duration::from_millis(5)) {
            frames.push(f.samples);
        }
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2], vec![5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn drain_returns_immediately_once_stopped() {
        let channel = FrameChannel::new(4);
        let mut p = producer(8, 4, &channel);
        let (mut ring_tx, mut ring_rx) = create_audio_ring();
        ring_tx.push_slice(&[0.5; 16]);
        let mut converter = RateConverter::new(16_000, 16_000, RESAMPLE_BLOCK).unwrap();
        let running = AtomicBool::new(false);

        assert_eq!(drain(&mut ring_rx, &mut converter, &running, &mut p), 0);
        assert!(channel.is_empty());
    }

    #[test]
    fn resampled_device_audio_arrives_in_hop_sized_frames() {
        let channel = FrameChannel::new(32);
        let mut p = producer(640, 320, &channel);
        let (mut ring_tx, mut ring_rx) = create_audio_ring();
        // Six 960-sample blocks at 48 kHz ≈ six 320-sample hops at 16 kHz.
        assert_eq!(ring_tx.push_slice(&vec![0.25f32; 960 * 6]), 960 * 6);
        let mut converter = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(!converter.is_passthrough());
        let running = AtomicBool::new(true);

        let chunks = thread::scope(|s| {
            let worker = s.spawn(|| drain(&mut ring_rx, &mut converter, &running, &mut p));
            assert!(wait_until(Duration::from_secs(2), || channel.enqueued() >= 4));
            running.store(false, Ordering::Release);
            worker.join().unwrap()
        });

        assert!(chunks >= 4, "chunks={chunks}");
        assert_eq!(channel.enqueued(), chunks);
        while let DequeueOutcome::Frame(f) = channel.dequeue(Duration::from_millis(5)) {
            assert_eq!(f.samples.len(), 640);
        }
    }
}
