//! # aed-core
//!
//! Real-time acoustic event detection pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → cpal callback → SPSC ring ┐
//!                                        ├─► Windower → FrameChannel (bounded, lossy)
//! WAV file → paced replay thread ────────┘                   │
//!                                               Processing loop (own thread)
//!                                                            │
//!                                   FeatureExtractor → InferenceEngine::predict/top_k
//!                                                            │
//!                                                  ResultSink::deliver(ResultRecord)
//! ```
//!
//! The capture callback never blocks and never allocates per sample. A full
//! frame channel drops the new frame instead of stalling the producer.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod acquisition;
pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod features;
pub mod inference;
pub mod ipc;
pub mod monitor;

mod lifecycle;

// Convenience re-exports for downstream crates
pub use acquisition::{AcquisitionWorker, LiveWorker, ReplayWorker};
pub use audio::device::{list_input_devices, DeviceInfo, DeviceSelector};
pub use buffering::{DequeueOutcome, EnqueueOutcome, Frame, FrameChannel, Windower};
pub use engine::{
    pipeline::DiagnosticsSnapshot, AcquisitionSource, AedEngine, PipelineConfig,
};
pub use error::AedError;
pub use features::{ExtractorHandle, FeatureExtractor, LogMelConfig, LogMelExtractor};
pub use inference::{stub::StubClassifier, InferenceEngine, ModelHandle};
pub use ipc::{
    BroadcastSink, ClassScore, JsonLinesSink, ResultRecord, ResultSink, StreamState,
    SystemStatus,
};
pub use monitor::{ResourceMonitor, SysinfoMonitor};

#[cfg(feature = "onnx")]
pub use inference::{OnnxClassifier, OnnxClassifierConfig};
