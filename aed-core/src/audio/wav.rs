//! WAV loading for file replay.
//!
//! The whole asset is decoded into memory once. Multi-channel files keep
//! channel 0 only; no resampling is done here.

use std::io::Read;
use std::path::Path;

use hound::{SampleFormat, WavReader};

use crate::error::{AedError, Result};

/// A decoded mono audio asset.
#[derive(Debug, Clone)]
pub struct WavAsset {
    /// Channel-0 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate declared in the file header.
    pub sample_rate: u32,
    /// Channel count declared in the file header.
    pub channels: u16,
}

impl WavAsset {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a WAV file from disk.
pub fn load_wav(path: &Path) -> Result<WavAsset> {
    let reader = WavReader::open(path)
        .map_err(|e| AedError::Wav(format!("{}: {e}", path.display())))?;
    decode(reader)
}

/// Decode WAV data from any reader.
pub fn load_wav_from_reader<R: Read>(reader: R) -> Result<WavAsset> {
    let reader = WavReader::new(reader).map_err(|e| AedError::Wav(e.to_string()))?;
    decode(reader)
}

fn decode<R: Read>(mut reader: WavReader<R>) -> Result<WavAsset> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| AedError::Wav(e.to_string()))?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| AedError::Wav(e.to_string()))?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved.into_iter().step_by(channels).collect()
    };

    Ok(WavAsset {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}
