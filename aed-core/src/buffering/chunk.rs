//! Hop-sized audio chunks and the frames materialised from them.

/// A hop-sized block of mono f32 samples produced once per acquisition tick.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    samples: Vec<f32>,
}

impl AudioChunk {
    /// Wrap `samples`, zero-padding a short tail up to `hop_size`.
    ///
    /// Longer input is truncated to `hop_size`; callers slice by hop so this
    /// only happens when they hand in a whole buffer.
    pub fn padded(mut samples: Vec<f32>, hop_size: usize) -> Self {
        if samples.len() < hop_size {
            tracing::debug!(
                short_by = hop_size - samples.len(),
                "zero-padding short chunk"
            );
        }
        samples.resize(hop_size, 0.0);
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// An owned snapshot of the rolling window, queued for processing.
///
/// Never aliases the windower's buffer; once enqueued it is read-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Producer-side sequence number (counts every produced frame, dropped or not).
    pub index: u64,
    /// Exactly `window_size` mono samples.
    pub samples: Vec<f32>,
}

impl Frame {
    /// Duration covered by this frame at `sample_rate`.
    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.samples.len() as f64 / sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_chunk_is_zero_padded_to_hop() {
        let chunk = AudioChunk::padded(vec![0.5; 3], 8);
        assert_eq!(chunk.len(), 8);
        assert_eq!(&chunk.samples()[..3], &[0.5, 0.5, 0.5]);
        assert!(chunk.samples()[3..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn exact_chunk_is_untouched() {
        let samples: Vec<f32> = (0..4).map(|i| i as f32).collect();
        let chunk = AudioChunk::padded(samples.clone(), 4);
        assert_eq!(chunk.samples(), samples.as_slice());
    }

    #[test]
    fn frame_duration_uses_sample_rate() {
        let frame = Frame {
            index: 0,
            samples: vec![0.0; 15_360],
        };
        assert!((frame.duration_secs(16_000) - 0.96).abs() < 1e-9);
    }
}
