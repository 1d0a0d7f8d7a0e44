//! Blocking processing loop: the consumer side of the pipeline.
//!
//! ## Per iteration
//!
//! ```text
//! 1. FrameChannel::dequeue(timeout)      Empty → next iteration
//! 2. FeatureExtractor::extract(frame)
//! 3. InferenceEngine::predict(features)  → scores, latency
//! 4. InferenceEngine::top_k(scores, k)
//! 5. ResourceMonitor::cpu_percent()
//! 6. Build ResultRecord (timestamp, seq, top-k, latency, cpu, threads)
//! 7. ResultSink::deliver(record)
//! 8. Every `progress_interval` records: info! summary
//! ```
//!
//! A failure in steps 2–7 is logged, counted and followed by a short backoff.
//! A panicking collaborator is caught and handled the same way. Neither ends
//! the loop; only a stop request does.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::{
    buffering::{DequeueOutcome, Frame, FrameChannel},
    engine::PipelineConfig,
    error::{AedError, Result},
    features::ExtractorHandle,
    inference::ModelHandle,
    ipc::{ResultRecord, ResultSink},
    lifecycle::WorkerLifecycle,
    monitor::ResourceMonitor,
};

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub frames_produced: AtomicU64,
    pub frames_processed: AtomicU64,
    pub records_emitted: AtomicU64,
    pub processing_errors: AtomicU64,
    pub sink_errors: AtomicU64,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.frames_produced.store(0, Ordering::Relaxed);
        self.frames_processed.store(0, Ordering::Relaxed);
        self.records_emitted.store(0, Ordering::Relaxed);
        self.processing_errors.store(0, Ordering::Relaxed);
        self.sink_errors.store(0, Ordering::Relaxed);
    }

    /// Loop and producer counters. Channel counters are filled in by
    /// [`DiagnosticsSnapshot::with_channel`].
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_produced: self.frames_produced.load(Ordering::Relaxed),
            frames_enqueued: 0,
            frames_dropped: 0,
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            processing_errors: self.processing_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_produced: u64,
    pub frames_enqueued: u64,
    pub frames_dropped: u64,
    pub frames_processed: u64,
    pub records_emitted: u64,
    pub processing_errors: u64,
    pub sink_errors: u64,
}

impl DiagnosticsSnapshot {
    pub fn with_channel(mut self, channel: &FrameChannel) -> Self {
        self.frames_enqueued = channel.enqueued();
        self.frames_dropped = channel.dropped();
        self
    }
}

/// All context the loop needs, passed as one struct so the thread closure
/// stays tidy.
pub struct ProcessingContext {
    pub config: PipelineConfig,
    pub channel: FrameChannel,
    pub extractor: ExtractorHandle,
    pub model: ModelHandle,
    pub sink: Arc<dyn ResultSink>,
    pub monitor: Box<dyn ResourceMonitor>,
    /// Cleared to stop the loop; observed at least once per dequeue timeout.
    pub running: Arc<AtomicBool>,
    /// Next sequence number to assign.
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Run the blocking loop until `ctx.running` becomes false.
pub fn run(mut ctx: ProcessingContext) {
    let threads = ctx.model.num_threads();
    info!(
        top_k = ctx.config.top_k,
        threads,
        timeout_ms = ctx.config.dequeue_timeout.as_millis() as u64,
        "processing loop started"
    );

    while ctx.running.load(Ordering::SeqCst) {
        let frame = match ctx.channel.dequeue(ctx.config.dequeue_timeout) {
            DequeueOutcome::Frame(frame) => frame,
            DequeueOutcome::Empty => continue,
        };

        let record = match guarded(|| process_frame(&mut ctx, &frame, threads)) {
            Ok(record) => record,
            Err(e) => {
                ctx.diagnostics
                    .processing_errors
                    .fetch_add(1, Ordering::Relaxed);
                error!(frame = frame.index, "frame processing failed: {e}");
                thread::sleep(ctx.config.error_backoff);
                continue;
            }
        };

        if let Err(e) = guarded(|| ctx.sink.deliver(&record)) {
            ctx.diagnostics.sink_errors.fetch_add(1, Ordering::Relaxed);
            error!(seq = record.seq, "result delivery failed: {e}");
            thread::sleep(ctx.config.error_backoff);
            continue;
        }
        let emitted = ctx
            .diagnostics
            .records_emitted
            .fetch_add(1, Ordering::Relaxed)
            + 1;

        if progress_due(emitted, ctx.config.progress_interval) {
            info!(
                seq = record.seq,
                emitted,
                latency_ms = format_args!("{:.2}", record.latency_ms),
                cpu_percent = format_args!("{:.1}", record.cpu_percent),
                dropped = ctx.channel.dropped(),
                "processing progress"
            );
        }
    }

    let d = ctx.diagnostics.snapshot().with_channel(&ctx.channel);
    info!(
        produced = d.frames_produced,
        enqueued = d.frames_enqueued,
        dropped = d.frames_dropped,
        processed = d.frames_processed,
        emitted = d.records_emitted,
        processing_errors = d.processing_errors,
        sink_errors = d.sink_errors,
        "processing loop stopped"
    );
}

/// Run one step, turning a panic into an ordinary error.
fn guarded<T>(step: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(step)).unwrap_or_else(|payload| {
        Err(AedError::Other(anyhow::anyhow!(
            "panicked: {}",
            panic_message(payload.as_ref())
        )))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Progress is reported on every `interval`-th delivered record.
fn progress_due(emitted: u64, interval: u64) -> bool {
    interval > 0 && emitted % interval == 0
}

/// Steps 2–6 for one frame.
fn process_frame(
    ctx: &mut ProcessingContext,
    frame: &Frame,
    threads: usize,
) -> Result<ResultRecord> {
    let features = ctx.extractor.extract(&frame.samples)?;
    let (prediction, top_k) = {
        let mut model = ctx.model.0.lock();
        let prediction = model.predict(&features)?;
        let top_k = model.top_k(&prediction.scores, ctx.config.top_k);
        (prediction, top_k)
    };
    ctx.diagnostics
        .frames_processed
        .fetch_add(1, Ordering::Relaxed);

    let cpu_percent = ctx.monitor.cpu_percent();
    let seq = ctx.seq.fetch_add(1, Ordering::SeqCst);
    debug!(
        seq,
        frame = frame.index,
        latency_ms = prediction.latency_ms,
        top = top_k.first().map(|c| c.label.as_str()).unwrap_or(""),
        "frame classified"
    );

    Ok(ResultRecord {
        timestamp: Utc::now(),
        seq,
        top_k,
        latency_ms: prediction.latency_ms,
        cpu_percent,
        threads,
    })
}

// ---------------------------------------------------------------------------
// Loop thread
// ---------------------------------------------------------------------------

/// Processing loop lifecycle. One instance runs at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

/// Owns the loop thread. `Idle → Running → Stopped`; `Stopped` is terminal.
pub struct ProcessingLoop {
    ctx: Option<ProcessingContext>,
    lifecycle: WorkerLifecycle,
    started: bool,
}

impl ProcessingLoop {
    pub fn new(ctx: ProcessingContext) -> Self {
        let join_timeout = ctx.config.loop_join_timeout;
        Self {
            ctx: Some(ctx),
            lifecycle: WorkerLifecycle::new("loop", join_timeout),
            started: false,
        }
    }

    pub fn state(&self) -> LoopState {
        if !self.started {
            LoopState::Idle
        } else if self.lifecycle.is_running() {
            LoopState::Running
        } else {
            LoopState::Stopped
        }
    }

    /// Spawn the loop thread. Only valid from `Idle`; otherwise a warning
    /// no-op.
    pub fn start(&mut self) -> Result<()> {
        let Some(mut ctx) = self.ctx.take() else {
            warn!(state = ?self.state(), "processing loop cannot be started again");
            return Ok(());
        };
        let Some((running, guard)) = self.lifecycle.begin() else {
            return Ok(());
        };
        ctx.running = running;
        self.started = true;
        self.lifecycle.spawn(move || {
            let _guard = guard;
            run(ctx);
        })
    }

    /// Request a stop and wait up to `loop_join_timeout` for the thread to
    /// finish its current iteration.
    pub fn stop(&mut self) {
        self.ctx = None;
        self.started = true;
        self.lifecycle.stop();
    }
}

impl Drop for ProcessingLoop {
    fn drop(&mut self) {
        if self.state() == LoopState::Running {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use crate::error::AedError;
    use crate::features::{FeatureExtractor, FeatureMatrix, Normalization};
    use crate::inference::stub::StubClassifier;
    use crate::ipc::SystemStatus;
    use crate::monitor::FixedMonitor;

    /// Fails every `fail_every`-th call (1-based), by error or by panic.
    struct ScriptedExtractor {
        calls: usize,
        fail_every: usize,
        panics: bool,
        normalization: Normalization,
    }

    impl FeatureExtractor for ScriptedExtractor {
        fn extract(&mut self, frame: &[f32]) -> Result<FeatureMatrix> {
            self.calls += 1;
            if self.fail_every > 0 && self.calls % self.fail_every == 0 {
                if self.panics {
                    // Out-of-bounds read, like a shape bug in a real extractor.
                    let past_end = frame[frame.len() + self.calls];
                    return Ok(FeatureMatrix::from_elem((4, 4), past_end));
                }
                return Err(AedError::FeatureExtraction("intentional test failure".into()));
            }
            Ok(FeatureMatrix::from_elem((4, 4), frame.first().copied().unwrap_or(0.0)))
        }

        fn set_normalization(&mut self, normalization: Normalization) {
            self.normalization = normalization;
        }

        fn normalization(&self) -> Normalization {
            self.normalization
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<ResultRecord>>,
        fail_seq: Option<u64>,
        panic_seq: Option<u64>,
    }

    impl ResultSink for CollectingSink {
        fn deliver(&self, record: &ResultRecord) -> Result<()> {
            if self.panic_seq == Some(record.seq) {
                panic!("sink exploded on seq {}", record.seq);
            }
            if self.fail_seq == Some(record.seq) {
                return Err(AedError::Sink("intentional sink failure".into()));
            }
            self.records.lock().push(record.clone());
            Ok(())
        }

        fn publish_status(&self, _status: &SystemStatus) -> Result<()> {
            Ok(())
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            dequeue_timeout: Duration::from_millis(20),
            error_backoff: Duration::from_millis(5),
            progress_interval: 2,
            loop_join_timeout: Duration::from_secs(2),
            top_k: 3,
            ..PipelineConfig::default()
        }
    }

    fn context(
        channel: &FrameChannel,
        fail_every: usize,
        sink: Arc<CollectingSink>,
    ) -> (ProcessingContext, Arc<PipelineDiagnostics>) {
        scripted_context(channel, fail_every, false, sink)
    }

    fn scripted_context(
        channel: &FrameChannel,
        fail_every: usize,
        panics: bool,
        sink: Arc<CollectingSink>,
    ) -> (ProcessingContext, Arc<PipelineDiagnostics>) {
        let diagnostics = Arc::new(PipelineDiagnostics::default());
        let ctx = ProcessingContext {
            config: config(),
            channel: channel.clone(),
            extractor: ExtractorHandle::new(ScriptedExtractor {
                calls: 0,
                fail_every,
                panics,
                normalization: Normalization::default(),
            }),
            model: ModelHandle::new(StubClassifier::with_labels(
                vec!["a".into(), "b".into(), "c".into(), "d".into()],
                3,
            )),
            sink,
            monitor: Box::new(FixedMonitor(7.5)),
            running: Arc::new(AtomicBool::new(false)),
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::clone(&diagnostics),
        };
        (ctx, diagnostics)
    }

    fn frame(index: u64) -> Frame {
        Frame {
            index,
            samples: vec![0.0; 8],
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn loop_survives_extractor_failing_every_third_call() {
        let channel = FrameChannel::new(16);
        let sink = Arc::new(CollectingSink::default());
        let (ctx, diagnostics) = context(&channel, 3, Arc::clone(&sink));
        let mut pipeline = ProcessingLoop::new(ctx);
        pipeline.start().unwrap();

        for i in 0..9 {
            channel.try_enqueue(frame(i));
        }
        assert!(wait_for(
            || sink.records.lock().len() == 6,
            Duration::from_secs(3)
        ));
        assert_eq!(pipeline.state(), LoopState::Running);

        // Still alive after the failures.
        channel.try_enqueue(frame(9));
        assert!(wait_for(
            || sink.records.lock().len() == 7,
            Duration::from_secs(3)
        ));

        pipeline.stop();
        assert_eq!(pipeline.state(), LoopState::Stopped);

        let seqs: Vec<u64> = sink.records.lock().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, (0..7).collect::<Vec<_>>());
        let snap = diagnostics.snapshot();
        assert_eq!(snap.processing_errors, 3);
        assert_eq!(snap.records_emitted, 7);
    }

    #[test]
    fn loop_survives_extractor_panicking_every_third_call() {
        let channel = FrameChannel::new(16);
        let sink = Arc::new(CollectingSink::default());
        let (ctx, diagnostics) = scripted_context(&channel, 3, true, Arc::clone(&sink));
        let mut pipeline = ProcessingLoop::new(ctx);
        pipeline.start().unwrap();

        for i in 0..9 {
            channel.try_enqueue(frame(i));
        }
        assert!(wait_for(
            || diagnostics.snapshot().processing_errors == 3,
            Duration::from_secs(3)
        ));
        assert!(wait_for(
            || sink.records.lock().len() == 6,
            Duration::from_secs(3)
        ));
        assert_eq!(pipeline.state(), LoopState::Running);

        // The extractor lock was released by the unwind.
        channel.try_enqueue(frame(9));
        assert!(wait_for(
            || sink.records.lock().len() == 7,
            Duration::from_secs(3)
        ));
        pipeline.stop();

        let seqs: Vec<u64> = sink.records.lock().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, (0..7).collect::<Vec<_>>());
        assert_eq!(diagnostics.snapshot().records_emitted, 7);
    }

    #[test]
    fn panicking_sink_is_counted_as_a_sink_error() {
        let channel = FrameChannel::new(4);
        let sink = Arc::new(CollectingSink {
            panic_seq: Some(0),
            ..CollectingSink::default()
        });
        let (ctx, diagnostics) = context(&channel, 0, Arc::clone(&sink));
        let mut pipeline = ProcessingLoop::new(ctx);
        pipeline.start().unwrap();

        channel.try_enqueue(frame(0));
        channel.try_enqueue(frame(1));
        assert!(wait_for(
            || sink.records.lock().len() == 1,
            Duration::from_secs(3)
        ));
        assert_eq!(pipeline.state(), LoopState::Running);
        pipeline.stop();

        assert_eq!(sink.records.lock()[0].seq, 1);
        assert_eq!(diagnostics.snapshot().sink_errors, 1);
    }

    #[test]
    fn progress_follows_delivered_records_not_seq() {
        // seq 1 failed delivery: seq 2 is the second delivered record.
        assert!(!progress_due(1, 2));
        assert!(progress_due(2, 2));
        assert!(progress_due(50, 50));
        assert!(!progress_due(49, 50));
        assert!(!progress_due(10, 0));
    }

    #[test]
    fn panic_payloads_are_readable() {
        let err = guarded::<()>(|| panic!("boom {}", 7)).unwrap_err();
        assert!(err.to_string().contains("boom 7"), "{err}");
        let err = guarded::<()>(|| std::panic::panic_any(42u8)).unwrap_err();
        assert!(err.to_string().contains("non-string"), "{err}");
        assert_eq!(guarded(|| Ok(5)).unwrap(), 5);
    }

    #[test]
    fn records_carry_top_k_threads_and_cpu() {
        let channel = FrameChannel::new(4);
        let sink = Arc::new(CollectingSink::default());
        let (ctx, _) = context(&channel, 0, Arc::clone(&sink));
        let mut pipeline = ProcessingLoop::new(ctx);
        pipeline.start().unwrap();

        channel.try_enqueue(frame(0));
        assert!(wait_for(
            || !sink.records.lock().is_empty(),
            Duration::from_secs(3)
        ));
        pipeline.stop();

        let records = sink.records.lock();
        let r = &records[0];
        assert_eq!(r.top_k.len(), 3);
        assert_eq!(r.top_k[0].label, "a");
        assert!(r.top_k[0].score >= r.top_k[1].score);
        assert_eq!(r.threads, 3);
        assert_eq!(r.cpu_percent, 7.5);
    }

    #[test]
    fn sink_failure_is_not_fatal() {
        let channel = FrameChannel::new(4);
        let sink = Arc::new(CollectingSink {
            fail_seq: Some(1),
            ..CollectingSink::default()
        });
        let (ctx, diagnostics) = context(&channel, 0, Arc::clone(&sink));
        let mut pipeline = ProcessingLoop::new(ctx);
        pipeline.start().unwrap();

        for i in 0..3 {
            channel.try_enqueue(frame(i));
        }
        assert!(wait_for(
            || sink.records.lock().len() == 2,
            Duration::from_secs(3)
        ));
        pipeline.stop();

        let seqs: Vec<u64> = sink.records.lock().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, [0, 2]);
        assert_eq!(diagnostics.snapshot().sink_errors, 1);
    }

    #[test]
    fn idle_loop_stops_within_one_timeout() {
        let channel = FrameChannel::new(4);
        let (ctx, _) = context(&channel, 0, Arc::new(CollectingSink::default()));
        let mut pipeline = ProcessingLoop::new(ctx);
        assert_eq!(pipeline.state(), LoopState::Idle);
        pipeline.start().unwrap();
        assert_eq!(pipeline.state(), LoopState::Running);

        let start = Instant::now();
        pipeline.stop();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(pipeline.state(), LoopState::Stopped);
    }

    #[test]
    fn stopped_loop_cannot_restart() {
        let channel = FrameChannel::new(4);
        let (ctx, _) = context(&channel, 0, Arc::new(CollectingSink::default()));
        let mut pipeline = ProcessingLoop::new(ctx);
        pipeline.start().unwrap();
        pipeline.stop();
        pipeline.start().unwrap();
        assert_eq!(pipeline.state(), LoopState::Stopped);
    }

    #[test]
    fn snapshot_merges_channel_counters() {
        let channel = FrameChannel::new(1);
        channel.try_enqueue(frame(0));
        channel.try_enqueue(frame(1));
        let diagnostics = PipelineDiagnostics::default();
        diagnostics.frames_produced.fetch_add(2, Ordering::Relaxed);
        let snap = diagnostics.snapshot().with_channel(&channel);
        assert_eq!(snap.frames_produced, 2);
        assert_eq!(snap.frames_enqueued, 1);
        assert_eq!(snap.frames_dropped, 1);

        diagnostics.reset();
        assert_eq!(diagnostics.snapshot(), DiagnosticsSnapshot::default());
    }
}
