use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig};
use log::{error, info, warn};

use crate::capture::{AudioFrame, AudioSource, CaptureFormat, CaptureQueue};
use crate::error::{NcsError, Result};

/// Sample rates tried in order when none is configured
///
/// 16 kHz gives both good transfer speed and recognition results.
pub const PREFERRED_RATES: [u32; 5] = [16000, 24000, 48000, 12000, 8000];

/// Channel counts tried in order; mono halves the bandwidth of stereo
pub const PREFERRED_CHANNELS: [u16; 2] = [1, 2];

/// Capture device selection
#[derive(Debug, Clone, Default)]
pub struct RecorderSettings {
    /// Input device name, default device when `None`
    pub device_name: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

/// Microphone capture through cpal
///
/// The stream callback converts samples to 16-bit PCM and pushes them onto
/// the capture queue; nothing else runs on the audio thread.
pub struct MicrophoneRecorder {
    device: Device,
    format: CaptureFormat,
    sample_format: SampleFormat,
    queue: CaptureQueue,
    stream: Option<Stream>,
}

impl MicrophoneRecorder {
    pub fn open(settings: &RecorderSettings) -> Result<Self> {
        let host = cpal::default_host();
        let device = Self::pick_device(&host, settings.device_name.as_deref())?;
        info!(
            "Input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let (format, sample_format) = match (settings.sample_rate, settings.channels) {
            (Some(rate), Some(channels)) => {
                let sample_format = Self::supported_sample_format(&device, rate, channels)?
                    .ok_or_else(|| {
                        NcsError::Audio(format!(
                            "device does not support {}Hz with {} channel(s)",
                            rate, channels
                        ))
                    })?;
                (CaptureFormat::new(rate, channels), sample_format)
            }
            _ => Self::pick_default_parameters(&device)?,
        };
        info!(
            "Recording parameters: {}Hz, {} channel(s), {:?} samples",
            format.sample_rate, format.channels, sample_format
        );

        Ok(Self {
            device,
            format,
            sample_format,
            queue: CaptureQueue::new(),
            stream: None,
        })
    }

    fn pick_device(host: &cpal::Host, name: Option<&str>) -> Result<Device> {
        match name {
            None => host
                .default_input_device()
                .ok_or_else(|| NcsError::Audio("no recording devices found".to_string())),
            Some(wanted) => host
                .input_devices()
                .map_err(|e| NcsError::Audio(format!("failed to list input devices: {}", e)))?
                .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
                .ok_or_else(|| NcsError::Audio(format!("input device not found: {}", wanted))),
        }
    }

    /// Pick the first (rate, channels) pair the device supports for input
    ///
    /// Preferred values are tried first, then the device's own defaults.
    fn pick_default_parameters(device: &Device) -> Result<(CaptureFormat, SampleFormat)> {
        let mut rates = PREFERRED_RATES.to_vec();
        let mut channels = PREFERRED_CHANNELS.to_vec();

        match device.default_input_config() {
            Ok(default) => {
                rates.push(default.sample_rate().0);
            }
            Err(e) => warn!("Failed to read default input config: {}", e),
        }
        if let Ok(configs) = device.supported_input_configs() {
            if let Some(max) = configs.map(|range| range.channels()).max() {
                channels.push(max);
            }
        }

        for &rate in &rates {
            for &count in &channels {
                if let Some(sample_format) = Self::supported_sample_format(device, rate, count)? {
                    return Ok((CaptureFormat::new(rate, count), sample_format));
                }
            }
        }

        Err(NcsError::Audio(
            "couldn't find recording parameters for the input device".to_string(),
        ))
    }

    /// Sample format to open the stream with, 16-bit preferred over float
    fn supported_sample_format(device: &Device, rate: u32, channels: u16) -> Result<Option<SampleFormat>> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| NcsError::Audio(format!("failed to query input configs: {}", e)))?;

        let mut found = None;
        for range in configs {
            if range.channels() != channels
                || range.min_sample_rate().0 > rate
                || range.max_sample_rate().0 < rate
            {
                continue;
            }
            match range.sample_format() {
                SampleFormat::I16 => return Ok(Some(SampleFormat::I16)),
                SampleFormat::F32 => found = Some(SampleFormat::F32),
                _ => {}
            }
        }
        Ok(found)
    }

    fn build_stream(&self) -> Result<Stream> {
        let config = StreamConfig {
            channels: self.format.channels,
            sample_rate: SampleRate(self.format.sample_rate),
            buffer_size: BufferSize::Default,
        };
        let channels = self.format.channels;
        let queue = self.queue.clone();
        let on_error = |err: cpal::StreamError| error!("Audio input stream error: {}", err);

        let stream = match self.sample_format {
            SampleFormat::I16 => self.device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    queue.push(AudioFrame::from_i16(data, channels));
                },
                on_error,
                None,
            ),
            SampleFormat::F32 => self.device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    queue.push(AudioFrame::from_f32(data, channels));
                },
                on_error,
                None,
            ),
            other => {
                return Err(NcsError::Audio(format!("unsupported sample format {:?}", other)));
            }
        };

        stream.map_err(|e| NcsError::Audio(format!("failed to build input stream: {}", e)))
    }
}

impl AudioSource for MicrophoneRecorder {
    fn format(&self) -> CaptureFormat {
        self.format
    }

    fn queue(&self) -> CaptureQueue {
        self.queue.clone()
    }

    fn start(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(self.build_stream()?);
        }
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| NcsError::Audio(format!("failed to start input stream: {}", e)))?;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| NcsError::Audio(format!("failed to stop input stream: {}", e)))?;
        }
        Ok(())
    }
}

impl Drop for MicrophoneRecorder {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{}", e);
        }
    }
}
