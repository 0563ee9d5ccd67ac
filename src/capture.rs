//! Capture-side plumbing shared by the recorder and the pipeline.
//!
//! The capture device delivers buffers on its own thread. The only structure
//! both sides touch is [`CaptureQueue`]: the producer pushes without blocking,
//! the consumer suspends until a buffer or a notification arrives.

use std::sync::Arc;

use crossbeam::queue::SegQueue;
use tokio::sync::{Notify, watch};

use crate::error::{NcsError, Result};

/// Bytes per sample for 16-bit PCM
pub const SAMPLE_WIDTH: usize = 2;

/// Layout of the captured PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes per sample
    pub sample_width: usize,
}

impl CaptureFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            sample_width: SAMPLE_WIDTH,
        }
    }

    /// Bytes occupied by one sample of every channel
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_width
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(NcsError::Audio("sample rate must be positive".to_string()));
        }
        if self.channels == 0 {
            return Err(NcsError::Audio("channel count must be positive".to_string()));
        }
        if self.sample_width == 0 {
            return Err(NcsError::Audio("sample width must be positive".to_string()));
        }
        Ok(())
    }
}

/// Raw interleaved PCM as delivered by the capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub channels: u16,
    pub sample_width: usize,
}

impl AudioFrame {
    /// Little-endian bytes of interleaved 16-bit samples
    pub fn from_i16(samples: &[i16], channels: u16) -> Self {
        let mut data = Vec::with_capacity(samples.len() * SAMPLE_WIDTH);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self {
            data,
            channels,
            sample_width: SAMPLE_WIDTH,
        }
    }

    /// Convert float samples in [-1.0, 1.0] to 16-bit PCM
    pub fn from_f32(samples: &[f32], channels: u16) -> Self {
        let converted: Vec<i16> = samples
            .iter()
            .map(|sample| (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect();
        Self::from_i16(&converted, channels)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn matches(&self, format: &CaptureFormat) -> bool {
        self.channels == format.channels && self.sample_width == format.sample_width
    }
}

/// Thread-safe hand-off between the capture callback and the pipeline
#[derive(Clone, Default)]
pub struct CaptureQueue {
    frames: Arc<SegQueue<AudioFrame>>,
    ready: Arc<Notify>,
}

impl CaptureQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue without blocking; callable from a real-time audio thread
    pub fn push(&self, frame: AudioFrame) {
        self.frames.push(frame);
        self.ready.notify_one();
    }

    pub fn try_pop(&self) -> Option<AudioFrame> {
        self.frames.pop()
    }

    /// Suspend until a frame is available
    pub async fn pop(&self) -> AudioFrame {
        loop {
            if let Some(frame) = self.frames.pop() {
                return frame;
            }
            self.ready.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Capture device as seen by the pipeline
pub trait AudioSource {
    fn format(&self) -> CaptureFormat;

    /// Queue the device pushes captured frames into
    fn queue(&self) -> CaptureQueue;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// One-shot cooperative stop signal
///
/// Once raised it stays raised. Clones observe the same signal.
#[derive(Clone)]
pub struct CancelSignal {
    state: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the signal is raised
    pub async fn cancelled(&self) {
        let mut receiver = self.state.subscribe();
        // The sender lives as long as `self`, so waiting cannot fail.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
