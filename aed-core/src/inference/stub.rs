//! `StubClassifier`: deterministic backend without a real model.
//!
//! Used when the crate is built without `onnx` and by tests. Scores are a
//! softmax over per-class distances to the feature matrix mean, so identical
//! features always yield identical scores.

use std::time::Instant;

use crate::error::{AedError, Result};
use crate::features::FeatureMatrix;
use crate::inference::{default_labels, InferenceEngine, Prediction};

/// Number of AudioSet classes YAMNet reports.
pub const YAMNET_CLASSES: usize = 521;

pub struct StubClassifier {
    labels: Vec<String>,
    num_threads: usize,
}

impl StubClassifier {
    pub fn new(num_threads: usize) -> Self {
        Self::with_labels(default_labels(YAMNET_CLASSES), num_threads)
    }

    pub fn with_labels(labels: Vec<String>, num_threads: usize) -> Self {
        Self {
            labels,
            num_threads: num_threads.max(1),
        }
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InferenceEngine for StubClassifier {
    fn predict(&mut self, features: &FeatureMatrix) -> Result<Prediction> {
        let started = Instant::now();
        if features.is_empty() {
            return Err(AedError::Inference("empty feature matrix".into()));
        }
        let mean = features.mean().unwrap_or(0.0);
        let n = self.labels.len().max(1);

        let logits: Vec<f32> = (0..n)
            .map(|i| -((mean - i as f32 * 0.5).abs()))
            .collect();
        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exp: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let sum: f32 = exp.iter().sum();
        let scores = exp.into_iter().map(|e| e / sum).collect();

        Ok(Prediction {
            scores,
            latency_ms: started.elapsed().as_secs_f64() * 1_000.0,
        })
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn num_threads(&self) -> usize {
        self.num_threads
    }

    fn model_id(&self) -> String {
        "stub".into()
    }
}
