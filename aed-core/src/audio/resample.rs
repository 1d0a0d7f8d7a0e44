//! Sample-rate conversion for live devices that cannot open at the configured rate.
//!
//! Uses a rubato `FastFixedIn` resampler. Input is accumulated until a full
//! rubato block is available; leftovers carry over to the next call. When the
//! device rate already matches, no rubato session exists and samples pass
//! straight through.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{AedError, Result};

/// Input frames handed to rubato per call.
pub const RESAMPLE_BLOCK: usize = 1024;

/// Mono f32 rate converter.
pub struct RateConverter {
    resampler: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
    block: usize,
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Errors
    /// `AedError::AudioDevice` if rubato rejects the ratio.
    pub fn new(device_rate: u32, target_rate: u32, block: usize) -> Result<Self> {
        if device_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                block,
                scratch: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            target_rate as f64 / device_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            block,
            1,
        )
        .map_err(|e| AedError::AudioDevice(format!("resampler init: {e}")))?;
        let scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];

        info!(device_rate, target_rate, block, "live capture resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::with_capacity(block * 2),
            block,
            scratch,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Convert `samples`, appending whatever output is ready to `out`.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let Some(resampler) = self.resampler.as_mut() else {
            out.extend_from_slice(samples);
            return;
        };

        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.block {
            let input = &self.pending[..self.block];
            match resampler.process_into_buffer(&[input], &mut self.scratch, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            self.pending.drain(..self.block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_rates_pass_through() {
        let mut rc = RateConverter::new(16_000, 16_000, RESAMPLE_BLOCK).unwrap();
        assert!(rc.is_passthrough());
        let input: Vec<f32> = (0..300).map(|i| i as f32 * 0.001).collect();
        let mut out = Vec::new();
        rc.process_into(&input, &mut out);
        assert_eq!(out, input);
    }

    #[test]
    fn downsamples_48k_to_16k() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let mut out = Vec::new();
        rc.process_into(&vec![0.0f32; 960], &mut out);
        assert!((out.len() as isize - 320).unsigned_abs() <= 10, "len={}", out.len());
    }

    #[test]
    fn holds_partial_blocks_until_full() {
        let mut rc = RateConverter::new(44_100, 16_000, 960).unwrap();
        let mut out = Vec::new();
        rc.process_into(&vec![0.0f32; 500], &mut out);
        assert!(out.is_empty());
        rc.process_into(&vec![0.0f32; 500], &mut out);
        assert!(!out.is_empty());
    }
}
