//! Rolling window that turns hop-sized chunks into overlapping frames.
//!
//! ```text
//! buffer: [ oldest hop | ... | newest hop ]   (window_size samples)
//! append: shift left by hop_size, write chunk into the trailing hop_size slots
//! ```

use super::chunk::{AudioChunk, Frame};
use crate::error::{AedError, Result};

/// Fixed-length rolling buffer owned by exactly one acquisition worker.
#[derive(Debug)]
pub struct Windower {
    buffer: Vec<f32>,
    hop_size: usize,
    produced: u64,
}

impl Windower {
    /// Create a zero-filled window of `window_size` samples.
    ///
    /// # Errors
    /// `AedError::InvalidConfig` if `hop_size` is zero or exceeds `window_size`.
    pub fn new(window_size: usize, hop_size: usize) -> Result<Self> {
        if hop_size == 0 || hop_size > window_size {
            return Err(AedError::InvalidConfig(format!(
                "hop_size ({hop_size}) must be in 1..={window_size}"
            )));
        }
        Ok(Self {
            buffer: vec![0.0; window_size],
            hop_size,
            produced: 0,
        })
    }

    pub fn window_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Number of frames produced so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Shift in one chunk and return a snapshot of the new window contents.
    ///
    /// # Panics
    /// If `chunk.len() != hop_size`. Chunks are padded by the acquisition
    /// layer, so a mismatch is a caller bug.
    pub fn append(&mut self, chunk: &AudioChunk) -> Frame {
        assert_eq!(
            chunk.len(),
            self.hop_size,
            "chunk length must equal hop_size"
        );
        let window = self.buffer.len();
        self.buffer.copy_within(self.hop_size.., 0);
        self.buffer[window - self.hop_size..].copy_from_slice(chunk.samples());

        let frame = Frame {
            index: self.produced,
            samples: self.buffer.clone(),
        };
        self.produced += 1;
        frame
    }
}
