//! Log-mel spectrogram frontend.
//!
//! ## Parameters (YAMNet-style defaults)
//!
//! | Parameter       | Value             |
//! |-----------------|-------------------|
//! | FFT size        | 2048              |
//! | Hann window     | 2048 (periodic)   |
//! | Hop length      | 160 (10 ms)       |
//! | Mel bands       | 64 (Slaney)       |
//! | Mel range       | 125–7 500 Hz      |
//! | dB reference    | frame maximum     |
//! | Dynamic range   | 80 dB             |
//!
//! The STFT is centred: `n_fft / 2` zeros are added on both sides, giving
//! `1 + len / hop_length` columns (97 for a 0.96 s window at 16 kHz).

use std::sync::Arc;

use ndarray::Array2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::{FeatureExtractor, FeatureMatrix, Normalization};
use crate::error::{AedError, Result};

const AMIN: f32 = 1e-10;
const NORM_EPS: f32 = 1e-6;

#[derive(Debug, Clone)]
pub struct LogMelConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub fmin: f32,
    pub fmax: f32,
    /// Floor applied below the frame maximum, in dB.
    pub top_db: f32,
    /// Frame length the extractor accepts; `None` accepts any non-empty frame.
    pub expected_len: Option<usize>,
}

impl Default for LogMelConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            n_fft: 2048,
            hop_length: 160,
            n_mels: 64,
            fmin: 125.0,
            fmax: 7_500.0,
            top_db: 80.0,
            expected_len: None,
        }
    }
}

pub struct LogMelExtractor {
    config: LogMelConfig,
    normalization: Normalization,
    window: Vec<f32>,
    /// `[n_mels][n_fft / 2 + 1]`
    mel_basis: Vec<Vec<f32>>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl LogMelExtractor {
    pub fn new(config: LogMelConfig) -> Result<Self> {
        if config.n_fft == 0 || config.hop_length == 0 || config.n_mels == 0 {
            return Err(AedError::InvalidConfig(
                "n_fft, hop_length and n_mels must be non-zero".into(),
            ));
        }
        if !(config.fmin >= 0.0 && config.fmin < config.fmax) {
            return Err(AedError::InvalidConfig(format!(
                "mel range {}..{} Hz is empty",
                config.fmin, config.fmax
            )));
        }
        let window = build_hann_window(config.n_fft);
        let mel_basis = build_mel_filters(
            config.n_fft,
            config.sample_rate,
            config.n_mels,
            config.fmin,
            config.fmax,
        );
        let fft = FftPlanner::<f32>::new().plan_fft_forward(config.n_fft);
        tracing::info!(
            n_mels = config.n_mels,
            n_fft = config.n_fft,
            hop_length = config.hop_length,
            "log-mel extractor initialised"
        );
        Ok(Self {
            scratch: vec![Complex::new(0.0, 0.0); config.n_fft],
            config,
            normalization: Normalization::default(),
            window,
            mel_basis,
            fft,
        })
    }

    /// Number of STFT columns produced for a frame of `len` samples.
    pub fn frames_for(&self, len: usize) -> usize {
        1 + len / self.config.hop_length
    }

    fn check_frame(&self, frame: &[f32]) -> Result<()> {
        if frame.is_empty() {
            return Err(AedError::FeatureExtraction("empty frame".into()));
        }
        if let Some(expected) = self.config.expected_len {
            if frame.len() != expected {
                return Err(AedError::FeatureExtraction(format!(
                    "frame has {} samples, expected {expected}",
                    frame.len()
                )));
            }
        }
        if frame.iter().any(|s| !s.is_finite()) {
            return Err(AedError::FeatureExtraction(
                "frame contains non-finite samples".into(),
            ));
        }
        Ok(())
    }
}

impl FeatureExtractor for LogMelExtractor {
    fn extract(&mut self, frame: &[f32]) -> Result<FeatureMatrix> {
        self.check_frame(frame)?;

        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let n_freqs = n_fft / 2 + 1;
        let pad = n_fft / 2;
        let n_frames = self.frames_for(frame.len());

        let mut padded = vec![0.0f32; frame.len() + n_fft];
        padded[pad..pad + frame.len()].copy_from_slice(frame);

        let mut mel = Array2::<f32>::zeros((self.config.n_mels, n_frames));
        let mut power = vec![0.0f32; n_freqs];

        for t in 0..n_frames {
            let start = t * hop;
            for (i, slot) in self.scratch.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft.process(&mut self.scratch);
            for (k, p) in power.iter_mut().enumerate() {
                *p = self.scratch[k].norm_sqr();
            }
            for (m, filter) in self.mel_basis.iter().enumerate() {
                mel[[m, t]] = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
            }
        }

        // power_to_db, referenced to the frame maximum
        let ref_power = mel.iter().copied().fold(AMIN, f32::max);
        let ref_db = 10.0 * ref_power.log10();
        mel.mapv_inplace(|v| 10.0 * v.max(AMIN).log10() - ref_db);
        let peak = mel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = peak - self.config.top_db;
        let Normalization { mean, std } = self.normalization;
        mel.mapv_inplace(|v| (v.max(floor) - mean) / (std + NORM_EPS));

        Ok(mel)
    }

    fn set_normalization(&mut self, normalization: Normalization) {
        self.normalization = normalization;
    }

    fn normalization(&self) -> Normalization {
        self.normalization
    }
}

fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Slaney-scale triangular filters with Slaney area normalisation.
fn build_mel_filters(
    n_fft: usize,
    sample_rate: u32,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let n_freqs = n_fft / 2 + 1;
    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);

    let hz_pts: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin_hz = sample_rate as f32 / n_fft as f32;

    (0..n_mels)
        .map(|m| {
            let (lower, center, upper) = (hz_pts[m], hz_pts[m + 1], hz_pts[m + 2]);
            let enorm = 2.0 / (upper - lower).max(AMIN);
            (0..n_freqs)
                .map(|k| {
                    let f = k as f32 * bin_hz;
                    let rising = (f - lower) / (center - lower).max(AMIN);
                    let falling = (upper - f) / (upper - center).max(AMIN);
                    rising.min(falling).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1_000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

fn log_step() -> f32 {
    6.4_f32.ln() / 27.0
}

fn hz_to_mel(hz: f32) -> f32 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        mel * F_SP
    }
}
