//! Classifier abstraction.
//!
//! `InferenceEngine` decouples the processing loop from any backend (stub,
//! ONNX Runtime, ...). `predict` takes `&mut self` because runtime sessions
//! are stateful; all calls are serialised through `ModelHandle`'s
//! `parking_lot::Mutex`. The thread count is fixed at construction.

pub mod stub;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxClassifier, OnnxClassifierConfig};

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::features::FeatureMatrix;
use crate::ipc::events::ClassScore;

/// Class scores from one inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub scores: Vec<f32>,
    /// Wall-clock time spent inside the backend, in milliseconds.
    pub latency_ms: f64,
}

/// Contract for classification backends.
pub trait InferenceEngine: Send + 'static {
    /// Load weights / run a dummy pass. Called once before the pipeline starts.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Score one feature matrix.
    fn predict(&mut self, features: &FeatureMatrix) -> Result<Prediction>;

    /// Label for each score index. May be shorter than the score vector.
    fn labels(&self) -> &[String];

    /// Parallelism the backend was built with.
    fn num_threads(&self) -> usize;

    /// Identifier reported in system status (usually the model path).
    fn model_id(&self) -> String;

    /// The `k` best labels, descending by score.
    fn top_k(&self, scores: &[f32], k: usize) -> Vec<ClassScore> {
        top_k(scores, self.labels(), k)
    }
}

/// Select the `k` highest scores, descending. Equal scores keep index order;
/// NaN sorts last. Indices without a label are named `class_{i}`.
pub fn top_k(scores: &[f32], labels: &[String], k: usize) -> Vec<ClassScore> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    // `sort_by` is stable, so ties stay in first-seen order.
    order.sort_by(|&a, &b| descending(scores[a], scores[b]));
    order
        .into_iter()
        .take(k)
        .map(|idx| ClassScore {
            label: labels
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("class_{idx}")),
            score: scores[idx],
        })
        .collect()
}

fn descending(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Default labels when none are supplied: `class_0 .. class_{n-1}`.
pub fn default_labels(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("class_{i}")).collect()
}

/// Load class labels from a file.
///
/// Accepts one label per line, or CSV class maps with `index,mid,display_name`
/// rows (an `index,...` header row is skipped and surrounding quotes are
/// stripped from the display name).
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(parse_labels(&text))
}

fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !l.starts_with("index,"))
        .map(|line| {
            let mut parts = line.splitn(3, ',');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(idx), Some(_mid), Some(name)) if idx.trim().parse::<usize>().is_ok() => {
                    name.trim().trim_matches('"').to_string()
                }
                _ => line.to_string(),
            }
        })
        .collect()
}

/// Thread-safe reference-counted handle to any `InferenceEngine`.
#[derive(Clone)]
pub struct ModelHandle(pub Arc<Mutex<dyn InferenceEngine>>);

impl ModelHandle {
    pub fn new<M: InferenceEngine>(model: M) -> Self {
        Self(Arc::new(Mutex::new(model)))
    }

    pub fn num_threads(&self) -> usize {
        self.0.lock().num_threads()
    }

    pub fn model_id(&self) -> String {
        self.0.lock().model_id()
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").finish_non_exhaustive()
    }
}
