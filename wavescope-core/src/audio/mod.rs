//! Audio capture via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory (beyond the one-time downmix scratch growth)
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by writing directly into an SPSC ring
//! buffer producer whose `push_slice` is lock-free and allocation-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Streams are therefore opened and dropped on the pipeline thread:
//! [`CaptureBackend::open`] is called there, and the returned
//! [`CaptureHandle`] never crosses a thread boundary.

pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::Producer;
use crate::{
    buffering::AudioProducer,
    error::{Result, SessionError},
};
#[cfg(feature = "audio-cpal")]
use std::sync::atomic::Ordering;
use std::sync::{atomic::AtomicBool, Arc};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Factory for opening a capture stream.
///
/// Implemented by [`MicBackend`] (cpal) and by scripted sources in tests.
/// `open` is invoked on the pipeline thread; implementations push mono f32
/// samples in [-1.0, 1.0] into `producer` for as long as `running` is true.
pub trait CaptureBackend: Send + 'static {
    fn open(
        &mut self,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn CaptureHandle>>;
}

/// Handle to an open capture stream. Not `Send`: it lives and dies on the
/// thread that opened it.
pub trait CaptureHandle {
    /// Native sample rate of the opened stream (Hz).
    fn sample_rate(&self) -> u32;

    /// Signal the callback to no-op on its next invocation.
    fn stop(&self);
}

/// Opens the system microphone (or a named input device) via cpal.
#[derive(Debug, Default, Clone)]
pub struct MicBackend {
    preferred_device: Option<String>,
}

impl MicBackend {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }
}

/// An active cpal input stream feeding the ring buffer.
#[cfg(feature = "audio-cpal")]
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    _stream: Stream,
    running: Arc<AtomicBool>,
    sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl CaptureHandle for AudioCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Average interleaved frames down to mono into `mono_buf`.
///
/// `mono_buf` is resized (capacity reused across callbacks) rather than
/// reallocated, keeping the steady-state callback allocation-free.
#[cfg(feature = "audio-cpal")]
fn downmix_frames(data: &[f32], channels: usize, mono_buf: &mut Vec<f32>) {
    let frames = data.len() / channels;
    mono_buf.resize(frames, 0.0);
    for (frame_idx, frame) in data.chunks_exact(channels).enumerate() {
        mono_buf[frame_idx] = frame.iter().sum::<f32>() / channels as f32;
    }
}

#[cfg(feature = "audio-cpal")]
impl CaptureBackend for MicBackend {
    fn open(
        &mut self,
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn CaptureHandle>> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();

        let device = if let Some(ref wanted) = self.preferred_device {
            let found = host
                .input_devices()
                .ok()
                .and_then(|mut devices| {
                    devices.find(|d| d.name().map(|n| &n == wanted).unwrap_or(false))
                });
            if found.is_none() {
                warn!("preferred input device '{wanted}' not found, falling back to default");
            }
            found
                .or_else(|| host.default_input_device())
                .ok_or(SessionError::NoDefaultInputDevice)?
        } else {
            host.default_input_device()
                .ok_or(SessionError::NoDefaultInputDevice)?
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| SessionError::Device(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;

        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels: channels as u16,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let flag = Arc::clone(&running);
                let mut mono_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !flag.load(Ordering::Relaxed) {
                            return;
                        }
                        let written = if channels == 1 {
                            producer.push_slice(data)
                        } else {
                            downmix_frames(data, channels, &mut mono_buf);
                            producer.push_slice(&mono_buf)
                        };
                        let frames = data.len() / channels;
                        if written < frames {
                            warn!("ring buffer full: dropped {} frames", frames - written);
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::I16 => {
                let flag = Arc::clone(&running);
                let mut convert_buf: Vec<f32> = Vec::new();
                let mut mono_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !flag.load(Ordering::Relaxed) {
                            return;
                        }
                        convert_buf.resize(data.len(), 0.0);
                        for (dst, src) in convert_buf.iter_mut().zip(data) {
                            *dst = *src as f32 / 32_768.0;
                        }
                        let written = if channels == 1 {
                            producer.push_slice(&convert_buf)
                        } else {
                            downmix_frames(&convert_buf, channels, &mut mono_buf);
                            producer.push_slice(&mono_buf)
                        };
                        let frames = data.len() / channels;
                        if written < frames {
                            warn!("ring buffer full: dropped {} frames", frames - written);
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            SampleFormat::U8 => {
                let flag = Arc::clone(&running);
                let mut convert_buf: Vec<f32> = Vec::new();
                let mut mono_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u8], _info| {
                        if !flag.load(Ordering::Relaxed) {
                            return;
                        }
                        convert_buf.resize(data.len(), 0.0);
                        for (dst, src) in convert_buf.iter_mut().zip(data) {
                            *dst = (*src as f32 - 128.0) / 128.0;
                        }
                        let written = if channels == 1 {
                            producer.push_slice(&convert_buf)
                        } else {
                            downmix_frames(&convert_buf, channels, &mut mono_buf);
                            producer.push_slice(&mono_buf)
                        };
                        let frames = data.len() / channels;
                        if written < frames {
                            warn!("ring buffer full: dropped {} frames", frames - written);
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
            }

            fmt => {
                return Err(SessionError::Stream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| SessionError::Stream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SessionError::Stream(e.to_string()))?;

        Ok(Box::new(AudioCapture {
            _stream: stream,
            running,
            sample_rate,
        }))
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl CaptureBackend for MicBackend {
    fn open(
        &mut self,
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
    ) -> Result<Box<dyn CaptureHandle>> {
        Err(SessionError::Stream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
