//! Feature extraction abstraction.
//!
//! The processing loop only sees `FeatureExtractor`; the log-mel frontend in
//! [`mel`] is the default implementation. Extractors are shared through
//! `ExtractorHandle` so an operator can retune normalization while the loop
//! is running.

pub mod mel;

pub use mel::{LogMelConfig, LogMelExtractor};

use std::sync::Arc;

use ndarray::Array2;
use parking_lot::Mutex;

use crate::error::Result;

/// `[rows, columns]` feature matrix; for log-mel, rows are mel bands and
/// columns are STFT frames.
pub type FeatureMatrix = Array2<f32>;

/// Normalization applied after feature computation: `(x - mean) / (std + 1e-6)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: f32,
    pub std: f32,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            mean: 0.0,
            std: 1.0,
        }
    }
}

/// Contract for audio → feature frontends.
pub trait FeatureExtractor: Send + 'static {
    /// Compute features for one frame. Deterministic for identical input and
    /// normalization.
    ///
    /// # Errors
    /// Implementations signal frames they cannot analyse (wrong length,
    /// non-finite samples) with `AedError::FeatureExtraction`.
    fn extract(&mut self, frame: &[f32]) -> Result<FeatureMatrix>;

    /// Replace the normalization used by all subsequent `extract` calls.
    fn set_normalization(&mut self, normalization: Normalization);

    fn normalization(&self) -> Normalization;
}

/// Thread-safe reference-counted handle to any `FeatureExtractor`.
#[derive(Clone)]
pub struct ExtractorHandle(pub Arc<Mutex<dyn FeatureExtractor>>);

impl ExtractorHandle {
    pub fn new<E: FeatureExtractor>(extractor: E) -> Self {
        Self(Arc::new(Mutex::new(extractor)))
    }

    pub fn extract(&self, frame: &[f32]) -> Result<FeatureMatrix> {
        self.0.lock().extract(frame)
    }

    /// Operator hook: takes effect on the next frame.
    pub fn set_normalization(&self, mean: f32, std: f32) {
        self.0.lock().set_normalization(Normalization { mean, std });
        tracing::info!(mean, std, "feature normalization updated");
    }
}

impl std::fmt::Debug for ExtractorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorHandle").finish_non_exhaustive()
    }
}
