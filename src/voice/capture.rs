//! Audio capture from microphone

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::endpoint::{Endpoint, Endpointer};
use super::traits::{AudioFrame, AudioSource};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Frames buffered between the audio callback and the wake listener
const FRAME_BUFFER: usize = 64;

/// How often a phrase recording drains the capture buffer
const DRAIN_INTERVAL: Duration = Duration::from_millis(50);

/// Find the default input device and a mono 16kHz config for it
fn open_input() -> Result<(Device, StreamConfig)> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = SAMPLE_RATE,
        channels = config.channels,
        "audio input opened"
    );

    Ok((device, config))
}

/// Captures audio from the default input device into a buffer
pub struct AudioCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let (device, config) = open_input()?;
        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    buffer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .extend_from_slice(data);
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!("audio capture stopped");
        }
    }

    /// Take the samples captured since the last call
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Record one phrase, blocking until `endpointer` reaches a verdict
    ///
    /// Returns `None` if no speech began before the endpointer's timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be started
    pub fn record_phrase(&mut self, endpointer: &mut Endpointer) -> Result<Option<Vec<f32>>> {
        self.clear_buffer();
        self.start()?;

        let deadline = Instant::now() + endpointer.max_duration() + DRAIN_INTERVAL * 4;
        let result = loop {
            std::thread::sleep(DRAIN_INTERVAL);

            match endpointer.push(&self.take_buffer()) {
                Endpoint::Complete => break Some(endpointer.take_speech()),
                Endpoint::TimedOut => break None,
                Endpoint::Waiting | Endpoint::Speaking => {}
            }

            // Device stalled and stopped delivering samples
            if Instant::now() >= deadline {
                tracing::warn!("input device stalled during phrase capture");
                break endpointer.has_speech().then(|| endpointer.take_speech());
            }
        };

        self.stop();
        Ok(result)
    }
}

/// Live microphone delivering fixed-length 16-bit frames
pub struct MicrophoneSource {
    frame_length: usize,
    stream: Option<Stream>,
}

impl MicrophoneSource {
    /// Create a source cutting frames of `frame_length` samples
    #[must_use]
    pub const fn new(frame_length: usize) -> Self {
        Self {
            frame_length,
            stream: None,
        }
    }
}

impl AudioSource for MicrophoneSource {
    fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.frame_length == 0 {
            return Err(Error::Audio("frame length must be positive".to_string()));
        }

        let (device, config) = open_input()?;
        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let frame_length = self.frame_length;
        let mut pending: Vec<i16> = Vec::with_capacity(frame_length * 2);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    pending.extend(data.iter().map(|&s| f32_to_i16(s)));
                    while pending.len() >= frame_length {
                        let frame = AudioFrame::new(pending.drain(..frame_length).collect());
                        match tx.try_send(frame) {
                            Ok(()) | Err(TrySendError::Closed(_)) => {}
                            Err(TrySendError::Full(_)) => {
                                tracing::trace!("wake listener behind, dropping frame");
                            }
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "microphone stream error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::info!(frame_length, "microphone started");
        Ok(rx)
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!("microphone stopped");
        }
    }
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(f32_to_i16(sample))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
