use thiserror::Error;

/// All errors produced by aed-core.
///
/// A full frame channel or an empty dequeue are *not* errors; see
/// [`crate::buffering::EnqueueOutcome`] and [`crate::buffering::DequeueOutcome`].
#[derive(Debug, Error)]
pub enum AedError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no input device found")]
    NoInputDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("wav decode error: {0}")]
    Wav(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("feature extraction error: {0}")]
    FeatureExtraction(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("ONNX session error: {0}")]
    OnnxSession(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("result sink error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AedError>;
