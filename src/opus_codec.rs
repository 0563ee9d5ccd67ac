use audiopus::{coder::Encoder, Application, Bitrate, Channels, SampleRate};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::capture::SAMPLE_WIDTH;
use crate::error::{NcsError, Result};

/// Frame duration used for every supported sample rate
pub const FRAME_DURATION_MS: u32 = 20;

/// Largest packet Opus can produce for one frame
const MAX_PACKET_SIZE: usize = 4000;

/// Samples per channel in one 20 ms encode frame at `sample_rate`
pub fn frame_size_for_rate(sample_rate: u32) -> usize {
    (sample_rate / 1000 * FRAME_DURATION_MS) as usize
}

/// Opaque encoded bytes of one fixed-size frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket(Vec<u8>);

impl EncodedPacket {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Mono frame encoder used by the audio pipeline
pub trait FrameEncoder {
    /// Encode exactly one frame of little-endian 16-bit mono PCM
    fn encode(&mut self, pcm: &[u8]) -> Result<EncodedPacket>;

    /// Value announced as the session `codec`
    fn codec_descriptor(&self) -> String;

    /// Samples per frame this encoder expects
    fn frame_size(&self) -> usize;
}

/// Encoder tuning, written as `voip`, `audio` or `lowdelay` in config files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpusApplication {
    #[default]
    VoIP,
    Audio,
    LowDelay,
}

/// Opus encoder configuration for speech upload
#[derive(Debug, Clone)]
pub struct OpusConfig {
    pub sample_rate: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    pub application: OpusApplication,
    /// Complexity (0-10, higher = better quality but more CPU)
    pub complexity: u32,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            bitrate: 24000,
            application: OpusApplication::default(),
            complexity: 5,
        }
    }
}

impl OpusConfig {
    pub fn validate(&self) -> Result<()> {
        opus_sample_rate(self.sample_rate)?;
        if self.bitrate < 6000 || self.bitrate > 510000 {
            return Err(NcsError::Codec("bitrate must be between 6000 and 510000".to_string()));
        }
        if self.complexity > 10 {
            return Err(NcsError::Codec("complexity must be <= 10".to_string()));
        }
        Ok(())
    }
}

fn opus_sample_rate(sample_rate: u32) -> Result<SampleRate> {
    match sample_rate {
        8000 => Ok(SampleRate::Hz8000),
        12000 => Ok(SampleRate::Hz12000),
        16000 => Ok(SampleRate::Hz16000),
        24000 => Ok(SampleRate::Hz24000),
        48000 => Ok(SampleRate::Hz48000),
        _ => Err(NcsError::Codec(format!("unsupported sample rate: {}", sample_rate))),
    }
}

/// Mono Opus encoder
pub struct OpusFrameEncoder {
    config: OpusConfig,
    encoder: Encoder,
    encoded_buffer: Vec<u8>,
    samples: Vec<i16>,
    frame_size: usize,
    frames_encoded: u64,
    total_bytes_encoded: u64,
}

impl OpusFrameEncoder {
    pub fn new(config: OpusConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Creating Opus encoder: {}Hz mono, {} kbps, {:?}",
            config.sample_rate,
            config.bitrate / 1000,
            config.application
        );

        let application = match config.application {
            OpusApplication::VoIP => Application::Voip,
            OpusApplication::Audio => Application::Audio,
            OpusApplication::LowDelay => Application::LowDelay,
        };

        let mut encoder = Encoder::new(opus_sample_rate(config.sample_rate)?, Channels::Mono, application)
            .map_err(|e| NcsError::Codec(format!("failed to create Opus encoder: {}", e)))?;

        encoder
            .set_bitrate(Bitrate::BitsPerSecond(config.bitrate as i32))
            .map_err(|e| NcsError::Codec(format!("failed to set Opus bitrate: {}", e)))?;
        encoder
            .set_complexity(config.complexity as u8)
            .map_err(|e| NcsError::Codec(format!("failed to set Opus complexity: {}", e)))?;
        encoder
            .set_vbr(true)
            .map_err(|e| NcsError::Codec(format!("failed to enable Opus VBR: {}", e)))?;

        let frame_size = frame_size_for_rate(config.sample_rate);
        Ok(Self {
            config,
            encoder,
            encoded_buffer: vec![0u8; MAX_PACKET_SIZE],
            samples: Vec::with_capacity(frame_size),
            frame_size,
            frames_encoded: 0,
            total_bytes_encoded: 0,
        })
    }

    pub fn config(&self) -> &OpusConfig {
        &self.config
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn total_bytes_encoded(&self) -> u64 {
        self.total_bytes_encoded
    }
}

impl FrameEncoder for OpusFrameEncoder {
    fn encode(&mut self, pcm: &[u8]) -> Result<EncodedPacket> {
        if pcm.len() != self.frame_size * SAMPLE_WIDTH {
            return Err(NcsError::Codec(format!(
                "expected {} bytes of PCM, got {}",
                self.frame_size * SAMPLE_WIDTH,
                pcm.len()
            )));
        }

        self.samples.clear();
        self.samples.extend(
            pcm.chunks_exact(SAMPLE_WIDTH)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );

        match self.encoder.encode(&self.samples, &mut self.encoded_buffer) {
            Ok(encoded_len) => {
                self.frames_encoded += 1;
                self.total_bytes_encoded += encoded_len as u64;
                Ok(EncodedPacket::new(self.encoded_buffer[..encoded_len].to_vec()))
            }
            Err(e) => {
                error!("Opus encoding failed: {}", e);
                Err(NcsError::Codec(format!("Opus encoding failed: {}", e)))
            }
        }
    }

    fn codec_descriptor(&self) -> String {
        format!("audio/opus;rate={}", self.config.sample_rate)
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}
