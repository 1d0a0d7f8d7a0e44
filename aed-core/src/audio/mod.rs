//! Audio capture via cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on the host's audio thread. It **must not**
//! block or do heap work. The callback here only takes channel 0 of each
//! interleaved frame, converts it to f32, and pushes it into the SPSC sample
//! ring, whose `push_iter` is lock-free and allocation-free. Windowing and
//! frame enqueueing happen on the acquisition thread that drains the ring.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms. `LiveCapture` must be created
//! and dropped on the same thread; the live acquisition worker opens it
//! inside its own thread.

pub mod device;
pub mod resample;
pub mod wav;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig,
};

use crate::{
    audio::device::DeviceSelector,
    buffering::AudioProducer,
    error::{AedError, Result},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Handle to an active input stream.
///
/// **Not `Send`**: create and drop on the same OS thread.
pub struct LiveCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Cleared by `stop()` or by the stream's error callback.
    running: Arc<AtomicBool>,
    /// Set by the error callback when the device reports a failure.
    failed: Arc<AtomicBool>,
    /// Rate the device actually opened at (Hz).
    pub sample_rate: u32,
    /// Channel count of the opened stream (only channel 0 is kept).
    pub channels: u16,
}

impl LiveCapture {
    /// Open the selected device, preferring `desired_rate`.
    ///
    /// If no supported configuration covers `desired_rate`, the device's
    /// default configuration is used and `sample_rate` reports what was
    /// actually opened; the caller is expected to resample.
    ///
    /// Any error reported by the device after opening clears `running` and
    /// marks the capture as failed.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        selector: &DeviceSelector,
        desired_rate: u32,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let device = device::resolve_input_device(selector)?;
        info!(
            device = device.name().unwrap_or_default().as_str(),
            selector = %selector,
            "opening input device"
        );

        let supported = pick_config(&device, desired_rate)?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, format = ?supported.sample_format(), "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let failed = Arc::new(AtomicBool::new(false));
        let wiring = CallbackWiring {
            producer,
            running: Arc::clone(&running),
            failed: Arc::clone(&failed),
            channels: channels as usize,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, wiring),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, wiring),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, wiring),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, wiring),
            SampleFormat::U8 => build_stream::<u8>(&device, &config, wiring),
            fmt => {
                return Err(AedError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| AedError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            failed,
            sample_rate,
            channels,
        })
    }

    /// Whether the device has reported an error since opening.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(feature = "audio-cpal")]
struct CallbackWiring {
    producer: AudioProducer,
    running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    channels: usize,
}

#[cfg(feature = "audio-cpal")]
fn pick_config(device: &cpal::Device, desired_rate: u32) -> Result<SupportedStreamConfig> {
    let usable = |fmt: SampleFormat| {
        matches!(
            fmt,
            SampleFormat::F32
                | SampleFormat::I16
                | SampleFormat::U16
                | SampleFormat::I32
                | SampleFormat::U8
        )
    };

    match device.supported_input_configs() {
        Ok(ranges) => {
            let exact = ranges
                .filter(|r| usable(r.sample_format()))
                .filter(|r| {
                    r.min_sample_rate().0 <= desired_rate && desired_rate <= r.max_sample_rate().0
                })
                .min_by_key(|r| r.channels());
            if let Some(range) = exact {
                return Ok(range.with_sample_rate(SampleRate(desired_rate)));
            }
            warn!(desired_rate, "device cannot open at configured rate, using its default");
        }
        Err(e) => warn!("failed to query supported input configs: {e}"),
    }

    device
        .default_input_config()
        .map_err(|e| AedError::AudioDevice(e.to_string()))
}

#[cfg(feature = "audio-cpal")]
fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    wiring: CallbackWiring,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let CallbackWiring {
        mut producer,
        running,
        failed,
        channels,
    } = wiring;
    let running_err = Arc::clone(&running);
    let ch = channels.max(1);

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                use crate::buffering::Producer;
                let frames = data.len() / ch;
                let written =
                    producer.push_iter(data.iter().step_by(ch).map(|&s| f32::from_sample_(s)));
                if written < frames {
                    warn!("sample ring full: dropped {} samples", frames - written);
                }
            },
            move |err| {
                error!("audio stream error: {err}");
                failed.store(true, Ordering::Release);
                running_err.store(false, Ordering::Release);
            },
            None,
        )
        .map_err(|e| AedError::AudioStream(e.to_string()))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl LiveCapture {
    pub fn open(
        _selector: &DeviceSelector,
        _desired_rate: u32,
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
    ) -> Result<Self> {
        Err(AedError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
