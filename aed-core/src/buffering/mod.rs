//! Buffering between the audio source and the processing loop.
//!
//! ```text
//! capture callback ──push_slice──► SPSC sample ring ──► Windower ──► FrameChannel ──► loop
//!                    (lock-free)                        (per hop)    (bounded, lossy)
//! ```
//!
//! The sample ring uses `ringbuf::HeapRb<f32>`, whose `push_slice` is wait-free
//! and safe to call from a real-time audio callback. The frame channel is a
//! bounded `crossbeam_channel`: producers never block, and a full channel
//! drops the incoming frame.

pub mod chunk;
pub mod window;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use ringbuf::{traits::Split, HeapRb};
use tracing::warn;

pub use chunk::{AudioChunk, Frame};
pub use ringbuf::traits::{Consumer, Observer, Producer};
pub use window::Windower;

/// Producer half of the sample ring, held by the capture callback.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half of the sample ring, held by the acquisition thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Sample ring capacity: 2^20 f32 samples ≈ 21.8 s at 48 kHz.
pub const RING_CAPACITY: usize = 1 << 20;

/// Default number of frames the channel holds before dropping.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// The channel was at capacity; the offered frame was discarded.
    Dropped,
}

/// Result of a bounded-wait dequeue.
#[derive(Debug, Clone, PartialEq)]
pub enum DequeueOutcome {
    Frame(Frame),
    /// Nothing arrived before the timeout.
    Empty,
}

#[derive(Debug, Default)]
struct ChannelCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

/// Bounded FIFO handoff between one producer and the processing loop.
///
/// Cloning yields another handle to the same queue.
#[derive(Debug, Clone)]
pub struct FrameChannel {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    capacity: usize,
    counters: Arc<ChannelCounters>,
}

impl FrameChannel {
    /// # Panics
    /// If `capacity` is zero (a rendezvous channel would make every enqueue drop).
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame channel capacity must be non-zero");
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            counters: Arc::new(ChannelCounters::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Offer a frame without blocking. A full channel drops `frame`.
    pub fn try_enqueue(&self, frame: Frame) -> EnqueueOutcome {
        match self.tx.try_send(frame) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Enqueued
            }
            Err(TrySendError::Full(frame)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    frame = frame.index,
                    capacity = self.capacity,
                    "frame channel full, dropping frame"
                );
                EnqueueOutcome::Dropped
            }
            // Unreachable while `self` holds the receiver.
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                EnqueueOutcome::Dropped
            }
        }
    }

    /// Wait up to `timeout` for the next frame in FIFO order.
    pub fn dequeue(&self, timeout: Duration) -> DequeueOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => DequeueOutcome::Frame(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                DequeueOutcome::Empty
            }
        }
    }

    /// Frames accepted since creation.
    pub fn enqueued(&self) -> u64 {
        self.counters.enqueued.load(Ordering::Relaxed)
    }

    /// Frames dropped on overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

impl Default for FrameChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
