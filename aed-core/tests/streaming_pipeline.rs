use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use aed_core::acquisition::{AcquisitionWorker, ReplayWorker};
use aed_core::engine::pipeline::PipelineDiagnostics;
use aed_core::error::Result;
use aed_core::features::{FeatureExtractor, FeatureMatrix, Normalization};
use aed_core::monitor::FixedMonitor;
use aed_core::{
    AcquisitionSource, AedEngine, ExtractorHandle, FrameChannel, LogMelConfig, LogMelExtractor,
    ModelHandle, PipelineConfig, ResultRecord, ResultSink, StreamState, StubClassifier,
    SystemStatus,
};
use parking_lot::Mutex;

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<ResultRecord>>,
    statuses: Mutex<Vec<SystemStatus>>,
}

impl ResultSink for RecordingSink {
    fn deliver(&self, record: &ResultRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn publish_status(&self, status: &SystemStatus) -> Result<()> {
        self.statuses.lock().push(status.clone());
        Ok(())
    }
}

/// Sleeps before delegating, to model a consumer slower than the producer.
struct SlowExtractor {
    inner: LogMelExtractor,
    delay: Duration,
}

impl FeatureExtractor for SlowExtractor {
    fn extract(&mut self, frame: &[f32]) -> Result<FeatureMatrix> {
        thread::sleep(self.delay);
        self.inner.extract(frame)
    }

    fn set_normalization(&mut self, normalization: Normalization) {
        self.inner.set_normalization(normalization);
    }

    fn normalization(&self) -> Normalization {
        self.inner.normalization()
    }
}

fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    for &s in samples {
        writer
            .write_sample((s * i16::MAX as f32) as i16)
            .expect("write sample");
    }
    writer.finalize().expect("finalize wav");
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

fn log_mel(config: &PipelineConfig) -> LogMelExtractor {
    LogMelExtractor::new(LogMelConfig {
        sample_rate: config.sample_rate,
        expected_len: Some(config.window_size()),
        ..LogMelConfig::default()
    })
    .expect("log-mel extractor")
}

#[test]
fn silent_source_yields_one_record_per_hop() {
    let config = PipelineConfig::default();
    assert_eq!(config.window_size(), 15_360);
    assert_eq!(config.hop_size(), 7_680);
    assert_eq!(config.channel_capacity, 10);

    let dir = tempfile::tempdir().expect("tempdir");
    let wav = dir.path().join("silence.wav");
    write_wav(&wav, &vec![0.0; 20 * config.hop_size()], config.sample_rate);

    let sink = Arc::new(RecordingSink::default());
    let engine = AedEngine::new(
        config.clone(),
        ExtractorHandle::new(log_mel(&config)),
        ModelHandle::new(StubClassifier::new(2)),
        sink.clone(),
        AcquisitionSource::Replay { path: wav },
    )
    .expect("engine")
    .with_monitor(|| Box::new(FixedMonitor(1.0)));

    engine.warm_up().expect("warm up");
    engine.start().expect("start");
    assert_eq!(engine.status().status, StreamState::Running);

    let done = wait_until(Duration::from_secs(30), || {
        !engine.is_acquiring() && sink.records.lock().len() >= 20
    });
    assert!(done, "pipeline did not drain in time");

    // Replay finished on its own; the pipeline stays up until stopped.
    assert_eq!(engine.status().status, StreamState::Running);
    engine.stop();

    let records = sink.records.lock();
    assert_eq!(records.len(), 20);
    let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, (0..20).collect::<Vec<_>>());
    assert!(records
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
    assert!(records.iter().all(|r| r.top_k.len() == config.top_k));
    assert!(records.iter().all(|r| r.threads == 2));

    let d = engine.diagnostics();
    assert_eq!(d.frames_produced, 20);
    assert_eq!(d.frames_enqueued, 20);
    assert_eq!(d.frames_dropped, 0);
    assert_eq!(d.records_emitted, 20);
    assert_eq!(d.processing_errors, 0);

    let statuses = sink.statuses.lock();
    let states: Vec<StreamState> = statuses.iter().map(|s| s.status).collect();
    assert_eq!(states, [StreamState::Running, StreamState::Stopped]);
    assert_eq!(statuses[0].model, "stub");
}

#[test]
fn replay_is_paced_to_wall_clock_and_stops_itself() {
    let config = PipelineConfig {
        window_secs: 1.0,
        hop_secs: 0.5,
        ..PipelineConfig::default()
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let wav = dir.path().join("ten_chunks.wav");
    write_wav(&wav, &vec![0.1; 10 * config.hop_size()], config.sample_rate);

    let channel = FrameChannel::new(config.channel_capacity);
    let mut worker = ReplayWorker::new(
        &wav,
        &config,
        channel.clone(),
        Arc::new(PipelineDiagnostics::default()),
    );

    let started = Instant::now();
    worker.start().expect("start replay");
    assert!(worker.is_running());
    let finished = wait_until(Duration::from_secs(10), || !worker.is_running());
    let elapsed = started.elapsed();

    assert!(finished, "replay worker did not stop on its own");
    assert!(elapsed >= Duration::from_millis(4_500), "took {elapsed:?}");
    assert_eq!(worker.state(), StreamState::Stopped);
    assert_eq!(channel.enqueued(), 10);
    assert_eq!(channel.dropped(), 0);

    // Already stopped: returns immediately.
    let stop_started = Instant::now();
    worker.stop();
    assert!(stop_started.elapsed() < Duration::from_millis(100));
}

#[test]
fn slow_consumer_drops_frames_without_stalling_the_producer() {
    let config = PipelineConfig {
        window_secs: 0.2,
        hop_secs: 0.1,
        channel_capacity: 2,
        dequeue_timeout: Duration::from_millis(50),
        ..PipelineConfig::default()
    };
    let dir = tempfile::tempdir().expect("tempdir");
    let wav = dir.path().join("burst.wav");
    write_wav(&wav, &vec![0.0; 20 * config.hop_size()], config.sample_rate);

    let sink = Arc::new(RecordingSink::default());
    let engine = AedEngine::new(
        config.clone(),
        ExtractorHandle::new(SlowExtractor {
            inner: log_mel(&config),
            delay: Duration::from_millis(400),
        }),
        ModelHandle::new(StubClassifier::default()),
        sink.clone(),
        AcquisitionSource::Replay { path: wav },
    )
    .expect("engine")
    .with_monitor(|| Box::new(FixedMonitor(0.0)));

    let started = Instant::now();
    engine.start().expect("start");
    assert!(wait_until(Duration::from_secs(10), || !engine.is_acquiring()));
    // Producer kept real-time pace: 19 hops of 100 ms, not 20 × 400 ms.
    assert!(started.elapsed() < Duration::from_secs(5));
    engine.stop();

    let d = engine.diagnostics();
    assert_eq!(d.frames_produced, 20);
    assert!(d.frames_dropped > 0);
    assert_eq!(d.frames_enqueued + d.frames_dropped, 20);

    let seqs: Vec<u64> = sink.records.lock().iter().map(|r| r.seq).collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
}

#[test]
fn normalization_update_applies_to_running_pipeline() {
    let config = PipelineConfig::default();
    let handle = ExtractorHandle::new(log_mel(&config));
    let frame = vec![0.0f32; config.window_size()];

    let before = handle.extract(&frame).expect("extract");
    handle.set_normalization(-10.0, 2.0);
    let after = handle.extract(&frame).expect("extract");

    let expected = (before[[0, 0]] + 10.0) / (2.0 + 1e-6);
    approx::assert_abs_diff_eq!(after[[0, 0]], expected, epsilon = 1e-4);
}
