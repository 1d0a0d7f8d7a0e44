//! YAMNet-style classifier via the `ort` crate.
//!
//! ## Model I/O
//!
//! | Tensor  | Shape                 | Notes                                  |
//! |---------|-----------------------|----------------------------------------|
//! | input   | `[1, 96, n_mels]`     | log-mel patch, time-major              |
//! | output  | `[1, n_classes]`      | per-class scores                       |
//!
//! Feature matrices arrive band-major (`[n_mels, frames]`). The time axis is
//! cropped or zero-padded to 96 frames and transposed before the run.

use std::path::{Path, PathBuf};
use std::time::Instant;

use ndarray::{s, Array3};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;
use tracing::{info, warn};

use crate::{
    error::{AedError, Result},
    features::FeatureMatrix,
    inference::{default_labels, InferenceEngine, Prediction},
};

/// Time frames per model patch.
pub const PATCH_FRAMES: usize = 96;
/// Mel bands the model expects.
pub const PATCH_BANDS: usize = 64;

#[derive(Debug, Clone)]
pub struct OnnxClassifierConfig {
    pub model_path: PathBuf,
    /// Intra-op threads; fixed for the session's lifetime.
    pub num_threads: usize,
    /// Labels for each output index. Empty → `class_{i}`.
    pub labels: Vec<String>,
}

pub struct OnnxClassifier {
    config: OnnxClassifierConfig,
    session: Option<Session>,
    input_name: String,
    output_name: String,
    labels: Vec<String>,
}

impl OnnxClassifier {
    pub fn new(mut config: OnnxClassifierConfig) -> Self {
        config.num_threads = config.num_threads.max(1);
        let labels = std::mem::take(&mut config.labels);
        Self {
            config,
            session: None,
            input_name: String::new(),
            output_name: String::new(),
            labels,
        }
    }

    fn to_patch(features: &FeatureMatrix) -> Array3<f32> {
        let (bands, frames) = features.dim();
        if bands != PATCH_BANDS {
            warn!(bands, expected = PATCH_BANDS, "unexpected mel band count");
        }
        let used_bands = bands.min(PATCH_BANDS);
        let used_frames = frames.min(PATCH_FRAMES);

        let mut patch = Array3::<f32>::zeros((1, PATCH_FRAMES, PATCH_BANDS));
        patch
            .slice_mut(s![0, ..used_frames, ..used_bands])
            .assign(&features.slice(s![..used_bands, ..used_frames]).t());
        patch
    }
}

fn create_session(model_path: &Path, num_threads: usize) -> Result<Session> {
    if !model_path.exists() {
        return Err(AedError::ModelNotFound {
            path: model_path.to_path_buf(),
        });
    }
    SessionBuilder::new()
        .map_err(|e| AedError::OnnxSession(e.to_string()))?
        .with_intra_threads(num_threads)
        .map_err(|e| AedError::OnnxSession(e.to_string()))?
        .with_inter_threads(1)
        .map_err(|e| AedError::OnnxSession(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::All)
        .map_err(|e| AedError::OnnxSession(e.to_string()))?
        .commit_from_file(model_path)
        .map_err(|e| AedError::OnnxSession(e.to_string()))
}

impl InferenceEngine for OnnxClassifier {
    fn warm_up(&mut self) -> Result<()> {
        let path = &self.config.model_path;
        let size_mb = std::fs::metadata(path)
            .map(|m| m.len() as f64 / 1_048_576.0)
            .unwrap_or(0.0);
        info!(
            model = %path.display(),
            size_mb = format_args!("{size_mb:.2}"),
            threads = self.config.num_threads,
            "loading classifier"
        );

        let session = create_session(path, self.config.num_threads)?;
        self.input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .ok_or_else(|| AedError::OnnxSession("model has no inputs".into()))?;
        self.output_name = session
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or_else(|| AedError::OnnxSession("model has no outputs".into()))?;
        self.session = Some(session);

        // Dummy pass: populates caches and reveals the class count.
        let dummy = self.predict(&FeatureMatrix::zeros((PATCH_BANDS, PATCH_FRAMES)))?;
        if self.labels.is_empty() {
            self.labels = default_labels(dummy.scores.len());
        } else if self.labels.len() != dummy.scores.len() {
            warn!(
                labels = self.labels.len(),
                classes = dummy.scores.len(),
                "label count does not match model output"
            );
        }
        info!(
            input = %self.input_name,
            output = %self.output_name,
            classes = dummy.scores.len(),
            warmup_ms = format_args!("{:.2}", dummy.latency_ms),
            "classifier ready"
        );
        Ok(())
    }

    fn predict(&mut self, features: &FeatureMatrix) -> Result<Prediction> {
        let patch = Self::to_patch(features);
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| AedError::OnnxSession("model not loaded; call warm_up() first".into()))?;
        let input = Value::from_array(patch)
            .map_err(|e: ort::Error| AedError::OnnxSession(e.to_string()))?;

        let started = Instant::now();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|e| AedError::Inference(e.to_string()))?;
        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

        let scores_out = outputs
            .get(self.output_name.as_str())
            .unwrap_or(&outputs[0]);
        let (shape, data) = scores_out
            .try_extract_tensor::<f32>()
            .map_err(|e| AedError::Inference(e.to_string()))?;
        let n_classes = shape.last().copied().unwrap_or(data.len() as i64).max(0) as usize;
        let scores = data[..n_classes.min(data.len())].to_vec();

        Ok(Prediction { scores, latency_ms })
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn num_threads(&self) -> usize {
        self.config.num_threads
    }

    fn model_id(&self) -> String {
        self.config.model_path.display().to_string()
    }
}
