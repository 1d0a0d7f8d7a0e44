//! `aed` process entry point.
//!
//! Builds the pipeline context from settings + CLI, streams result records
//! as JSON lines (stdout or `--output`), and runs until Ctrl-C or, when
//! replaying a file, until every frame has been handled.

mod cli;
mod settings;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::time::Duration;

use aed_core::{
    inference::load_labels, list_input_devices, AcquisitionSource, AedEngine, BroadcastSink,
    DiagnosticsSnapshot, ExtractorHandle, JsonLinesSink, LogMelConfig, LogMelExtractor,
    ModelHandle, ResultSink, StubClassifier,
};
use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use cli::Cli;
use settings::{default_settings_path, load_settings, AppSettings};

const DRAIN_POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("aed=info,aed_core=info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.list_devices {
        print_devices();
        return Ok(());
    }

    let settings_path = cli.config.clone().unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);
    app_settings.apply_cli(&cli);
    info!(
        settings_path = %settings_path.display(),
        threads = app_settings.threads,
        top_k = app_settings.top_k,
        device = %app_settings.device,
        wav = ?app_settings.wav_path,
        "settings loaded"
    );

    // ── Pipeline context ──────────────────────────────────────────────────
    let config = app_settings.pipeline_config();
    let extractor = LogMelExtractor::new(LogMelConfig {
        sample_rate: config.sample_rate,
        expected_len: Some(config.window_size()),
        ..LogMelConfig::default()
    })
    .context("failed to build log-mel extractor")?;
    let extractor = ExtractorHandle::new(extractor);
    extractor.set_normalization(
        app_settings.normalization_mean,
        app_settings.normalization_std,
    );

    let model = build_model(&app_settings)?;
    let sink = BroadcastSink::default();
    let source = match &app_settings.wav_path {
        Some(path) => AcquisitionSource::Replay { path: path.clone() },
        None => AcquisitionSource::Live {
            device: app_settings.device.parse().unwrap_or_default(),
        },
    };
    let replaying = matches!(source, AcquisitionSource::Replay { .. });

    let engine = Arc::new(
        AedEngine::new(config, extractor, model, Arc::new(sink.clone()), source)
            .context("invalid pipeline configuration")?,
    );
    engine.warm_up().context("classifier warm-up failed")?;

    // ── Output ────────────────────────────────────────────────────────────
    let output: Box<dyn Write + Send> = match &app_settings.output_path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout()),
    };
    let forward = tokio::spawn(forward_records(sink.clone(), JsonLinesSink::new(output)));

    // ── Run ───────────────────────────────────────────────────────────────
    let e = Arc::clone(&engine);
    let started = tokio::task::spawn_blocking(move || e.start())
        .await
        .context("pipeline start task panicked")?;
    // On a source failure the loop is up but has no input; the source-end
    // wait below fires once the queue is drained.
    let source_error = started.err();
    match &source_error {
        Some(e) => error!("audio source failed to start: {e}"),
        None => {
            let status = engine.status();
            info!(model = %status.model, threads = status.threads, "listening");
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = wait_for_source_end(Arc::clone(&engine)) => {
            if source_error.is_some() {
                info!("no input; shutting down");
            } else if replaying {
                info!("replay complete");
            } else {
                warn!("live acquisition ended");
            }
        }
    }

    let e = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || e.stop())
        .await
        .context("pipeline stop task panicked")?;

    let d = engine.diagnostics();
    info!(
        produced = d.frames_produced,
        dropped = d.frames_dropped,
        emitted = d.records_emitted,
        errors = d.processing_errors + d.sink_errors,
        "session summary"
    );

    // Dropping every sender closes the broadcast and ends the forwarder.
    drop(engine);
    drop(sink);
    forward.await.context("record forwarder panicked")?;
    match source_error {
        Some(e) => Err(e).context("audio source failed"),
        None => Ok(()),
    }
}

fn print_devices() {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("no input devices found");
    }
    for d in devices {
        let marker = if d.is_default { " (default)" } else { "" };
        println!("{:>3}  {}{}", d.index, d.name, marker);
    }
}

fn build_model(app_settings: &AppSettings) -> anyhow::Result<ModelHandle> {
    let labels = match &app_settings.labels_path {
        Some(path) => load_labels(path)
            .with_context(|| format!("cannot read labels from {}", path.display()))?,
        None => Vec::new(),
    };
    let threads = app_settings.threads;

    #[cfg(feature = "onnx")]
    if let Some(path) = &app_settings.model_path {
        use aed_core::{OnnxClassifier, OnnxClassifierConfig};
        info!(model = %path.display(), threads, "using ONNX classifier");
        return Ok(ModelHandle::new(OnnxClassifier::new(OnnxClassifierConfig {
            model_path: path.clone(),
            num_threads: threads,
            labels,
        })));
    }

    #[cfg(not(feature = "onnx"))]
    if let Some(path) = &app_settings.model_path {
        warn!(
            model = %path.display(),
            "built without the `onnx` feature; using the stub classifier"
        );
    }

    Ok(if labels.is_empty() {
        ModelHandle::new(StubClassifier::new(threads))
    } else {
        ModelHandle::new(StubClassifier::with_labels(labels, threads))
    })
}

async fn forward_records<W: Write + Send>(sink: BroadcastSink, out: JsonLinesSink<W>) {
    let mut rx = sink.subscribe();
    drop(sink);
    loop {
        match rx.recv().await {
            Ok(record) => {
                if let Err(e) = out.deliver(&record) {
                    warn!(seq = record.seq, "failed to write record: {e}");
                }
            }
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "output fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Every enqueued frame has either produced a record or failed.
fn drained(d: &DiagnosticsSnapshot) -> bool {
    d.frames_processed + d.processing_errors >= d.frames_enqueued
}

async fn wait_for_source_end(engine: Arc<AedEngine>) {
    let mut tick = tokio::time::interval(DRAIN_POLL);
    loop {
        tick.tick().await;
        if !engine.is_acquiring() && drained(&engine.diagnostics()) {
            return;
        }
    }
}
