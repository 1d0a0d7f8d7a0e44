use std::time::Duration;

use crate::error::{AedError, Result};

/// Configuration for the streaming pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Rate the pipeline operates at (Hz). Default: 16000.
    pub sample_rate: u32,
    /// Analysis window length in seconds. Default: 0.96.
    pub window_secs: f64,
    /// Hop between consecutive windows in seconds. Default: 0.48.
    pub hop_secs: f64,
    /// Frames the channel holds before dropping new ones. Default: 10.
    pub channel_capacity: usize,
    /// Labels reported per result record. Default: 5.
    pub top_k: usize,
    /// How long the loop waits for a frame before re-checking state. Default: 1 s.
    pub dequeue_timeout: Duration,
    /// Pause after a failed iteration. Default: 100 ms.
    pub error_backoff: Duration,
    /// Emit a progress summary every N records. Default: 50.
    pub progress_interval: u64,
    /// How long `stop()` waits for the acquisition thread. Default: 2 s.
    pub stop_grace: Duration,
    /// How long `stop()` waits for the processing loop thread. Default: 3 s.
    pub loop_join_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            window_secs: 0.96,
            hop_secs: 0.48,
            channel_capacity: 10,
            top_k: 5,
            dequeue_timeout: Duration::from_secs(1),
            error_backoff: Duration::from_millis(100),
            progress_interval: 50,
            stop_grace: Duration::from_secs(2),
            loop_join_timeout: Duration::from_secs(3),
        }
    }
}

impl PipelineConfig {
    /// Window length in samples (15360 with defaults).
    pub fn window_size(&self) -> usize {
        (self.window_secs * self.sample_rate as f64).round() as usize
    }

    /// Hop length in samples (7680 with defaults).
    pub fn hop_size(&self) -> usize {
        (self.hop_secs * self.sample_rate as f64).round() as usize
    }

    /// Wall-clock time covered by one hop.
    pub fn hop_duration(&self) -> Duration {
        let nanos = self.hop_size() as u64 * 1_000_000_000 / u64::from(self.sample_rate.max(1));
        Duration::from_nanos(nanos)
    }

    pub fn validate(&self) -> Result<()> {
        let (window, hop) = (self.window_size(), self.hop_size());
        if self.sample_rate == 0 {
            return Err(AedError::InvalidConfig("sample_rate must be non-zero".into()));
        }
        if window == 0 || hop == 0 {
            return Err(AedError::InvalidConfig(format!(
                "window ({window}) and hop ({hop}) must be non-empty"
            )));
        }
        if hop > window {
            return Err(AedError::InvalidConfig(format!(
                "hop_size ({hop}) exceeds window_size ({window})"
            )));
        }
        if self.channel_capacity == 0 {
            return Err(AedError::InvalidConfig(
                "channel_capacity must be non-zero".into(),
            ));
        }
        if self.top_k == 0 {
            return Err(AedError::InvalidConfig("top_k must be non-zero".into()));
        }
        Ok(())
    }
}
