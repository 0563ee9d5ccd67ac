//! Capture → downmix → frame assembly → encode → audio transfer.
//!
//! The pipeline keeps two byte buffers. `raw` holds audio in the capture
//! layout; `mono` holds single-channel samples waiting to fill an encode
//! frame. Each loop iteration downmixes at most `packet_max_size` bytes so a
//! large backlog never starves the cancellation check.
//!
//! Downmixing keeps the first channel of every channel group and drops the
//! rest. This is a selection, not an average. Known quirk, kept as is.

use log::{debug, info};

use crate::capture::{AudioFrame, AudioSource, CancelSignal, CaptureFormat};
use crate::error::{NcsError, Result};
use crate::opus_codec::FrameEncoder;
use crate::session::AudioTransfer;
use crate::transport::MessageTransport;

/// Multiplier from the minimum to the maximum downmix chunk
const MAX_CHUNK_FACTOR: usize = 4;

/// Whether the loop is still pulling captured audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Capturing,
    Draining,
}

/// Totals reported when a run finishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    /// Captured bytes left below a threshold when the run ended
    pub discarded_bytes: usize,
}

/// Reduce `count` bytes of interleaved PCM to the first channel
///
/// `count` is rounded down to whole channel groups. A zero channel count or
/// sample width yields no output.
pub fn downmix(raw: &[u8], count: usize, channels: u16, sample_width: usize) -> Vec<u8> {
    let group = channels as usize * sample_width;
    if group == 0 {
        return Vec::new();
    }
    let count = count.min(raw.len());
    let count = count - count % group;
    if channels == 1 {
        return raw[..count].to_vec();
    }

    let mut mono = Vec::with_capacity(count / channels as usize);
    for offset in (0..count).step_by(group) {
        mono.extend_from_slice(&raw[offset..offset + sample_width]);
    }
    mono
}

pub struct AudioPipeline {
    format: CaptureFormat,
    frame_size: usize,
    raw: Vec<u8>,
    mono: Vec<u8>,
    state: PipelineState,
    stats: PipelineStats,
}

impl AudioPipeline {
    /// `frame_size` is the encoder's sample count per channel per frame
    pub fn new(format: CaptureFormat, frame_size: usize) -> Result<Self> {
        format.validate()?;
        if frame_size == 0 {
            return Err(NcsError::Audio("frame size must be positive".to_string()));
        }
        Ok(Self {
            format,
            frame_size,
            raw: Vec::new(),
            mono: Vec::new(),
            state: PipelineState::Capturing,
            stats: PipelineStats::default(),
        })
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Raw bytes needed before a downmix pass is attempted
    pub fn packet_min_size(&self) -> usize {
        self.frame_size * self.format.bytes_per_frame()
    }

    /// Upper bound on raw bytes consumed by one downmix pass
    pub fn packet_max_size(&self) -> usize {
        MAX_CHUNK_FACTOR * self.packet_min_size()
    }

    /// Mono bytes consumed by one encode call
    pub fn frame_bytes(&self) -> usize {
        self.frame_size * self.format.sample_width
    }

    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }

    pub fn mono_len(&self) -> usize {
        self.mono.len()
    }

    /// Append one captured buffer to `raw`
    pub fn push_frame(&mut self, frame: AudioFrame) -> Result<()> {
        if !frame.matches(&self.format) {
            return Err(NcsError::Audio(format!(
                "captured frame has {} channels x {} bytes, expected {} x {}",
                frame.channels, frame.sample_width, self.format.channels, self.format.sample_width
            )));
        }
        self.raw.extend_from_slice(&frame.data);
        Ok(())
    }

    /// Downmix one bounded chunk of `raw` into `mono`
    ///
    /// Returns the number of raw bytes consumed, zero when `raw` is below
    /// the minimum threshold.
    pub fn downmix_pass(&mut self) -> usize {
        if self.raw.len() < self.packet_min_size() {
            return 0;
        }
        let group = self.format.bytes_per_frame();
        let count = self.raw.len().min(self.packet_max_size());
        let count = count - count % group;

        let mono = downmix(&self.raw, count, self.format.channels, self.format.sample_width);
        self.mono.extend_from_slice(&mono);
        self.raw.drain(..count);
        count
    }

    /// Take the oldest complete encode frame from `mono`
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let frame_bytes = self.frame_bytes();
        if self.mono.len() < frame_bytes {
            return None;
        }
        Some(self.mono.drain(..frame_bytes).collect())
    }

    /// Encode and send every complete frame in `mono`, oldest first
    pub async fn send_ready_frames<T, E>(
        &mut self,
        encoder: &mut E,
        transfer: &AudioTransfer<'_, T>,
    ) -> Result<usize>
    where
        T: MessageTransport + ?Sized,
        E: FrameEncoder + ?Sized,
    {
        let mut sent = 0;
        while let Some(frame) = self.next_frame() {
            let packet = encoder.encode(&frame)?;
            transfer.send_bytes(packet.as_bytes()).await?;
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += packet.len() as u64;
            sent += 1;
        }
        Ok(sent)
    }

    /// Process everything already buffered until both buffers fall below
    /// their thresholds
    pub async fn drain<T, E>(&mut self, encoder: &mut E, transfer: &AudioTransfer<'_, T>) -> Result<()>
    where
        T: MessageTransport + ?Sized,
        E: FrameEncoder + ?Sized,
    {
        loop {
            let consumed = self.downmix_pass();
            self.send_ready_frames(encoder, transfer).await?;
            if consumed == 0 {
                return Ok(());
            }
        }
    }

    /// Stream captured audio over `transfer` until `cancel` fires
    ///
    /// On cancellation the source is stopped, frames already queued are
    /// drained and encoded, leftovers shorter than a frame are dropped, and
    /// `audio_end` is sent. The transfer must already be begun.
    pub async fn run<S, E, T>(
        &mut self,
        source: &mut S,
        encoder: &mut E,
        transfer: &mut AudioTransfer<'_, T>,
        cancel: &CancelSignal,
    ) -> Result<PipelineStats>
    where
        S: AudioSource + ?Sized,
        E: FrameEncoder + ?Sized,
        T: MessageTransport + ?Sized,
    {
        let queue = source.queue();
        info!(
            "Streaming audio: {}Hz, {} channel(s), {} samples per frame",
            self.format.sample_rate, self.format.channels, self.frame_size
        );
        source.start()?;

        let cancelled = cancel.cancelled();
        tokio::pin!(cancelled);

        while self.state == PipelineState::Capturing {
            self.downmix_pass();
            self.send_ready_frames(encoder, transfer).await?;

            if self.raw.len() >= self.packet_min_size() {
                // Backlog left: check the signal without suspending, then
                // give other tasks a turn before the next pass.
                if cancel.is_cancelled() {
                    self.state = PipelineState::Draining;
                } else {
                    tokio::task::yield_now().await;
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = &mut cancelled => {
                    debug!("Cancellation received, draining captured audio");
                    self.state = PipelineState::Draining;
                }
                frame = queue.pop() => self.push_frame(frame)?,
            }
        }

        source.stop()?;
        while let Some(frame) = queue.try_pop() {
            self.push_frame(frame)?;
        }
        self.drain(encoder, transfer).await?;

        self.stats.discarded_bytes = self.raw.len() + self.mono.len();
        self.raw.clear();
        self.mono.clear();

        transfer.end().await?;
        info!(
            "Audio transfer {} finished: {} packets, {} bytes, {} bytes discarded",
            transfer.id(),
            self.stats.packets_sent,
            self.stats.bytes_sent,
            self.stats.discarded_bytes
        );
        Ok(self.stats)
    }
}
