//! Sample-rate conversion from the device's native rate to the fixed
//! 44.1 kHz analysis rate.
//!
//! The converter fills an internal fixed-size frame from whatever slice
//! lengths the ring drain produces; each time the frame is full it runs one
//! rubato pass and appends the converted samples straight into the caller's
//! accumulation buffer. When capture and analysis rates already match, the
//! input is copied through and no rubato state exists at all.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, SessionError};

/// Converts f32 mono audio from the capture rate to the analysis rate.
pub struct RateConverter {
    /// `None` when capture rate == analysis rate.
    inner: Option<Inner>,
}

struct Inner {
    resampler: FastFixedIn<f32>,
    /// Fills to `frame_len`, then one rubato pass consumes it.
    frame: Vec<f32>,
    frame_len: usize,
    /// Rubato output staging: `[1][output_frames_max]`.
    staging: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a converter from `capture_rate` to `target_rate`, processing
    /// in frames of `frame_len` input samples.
    ///
    /// # Errors
    /// Returns `SessionError::Device` if rubato fails to initialise.
    pub fn new(capture_rate: u32, target_rate: u32, frame_len: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self { inner: None });
        }

        let ratio = target_rate as f64 / capture_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio, no dynamic adjustment
            PolynomialDegree::Cubic,
            frame_len,
            1, // mono
        )
        .map_err(|e| SessionError::Device(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        tracing::info!(capture_rate, target_rate, frame_len, "resampling enabled");

        Ok(Self {
            inner: Some(Inner {
                resampler,
                frame: Vec::with_capacity(frame_len),
                frame_len,
                staging: vec![vec![0f32; max_out]],
            }),
        })
    }

    /// Feed `samples` and append any converted output to `out`.
    ///
    /// Input shorter than a full frame is held until later pushes complete
    /// it, so a single call may append nothing.
    pub fn push(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let Some(inner) = &mut self.inner else {
            out.extend_from_slice(samples);
            return;
        };

        let mut rest = samples;
        while !rest.is_empty() {
            let take = (inner.frame_len - inner.frame.len()).min(rest.len());
            inner.frame.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if inner.frame.len() < inner.frame_len {
                break;
            }
            match inner
                .resampler
                .process_into_buffer(&[&inner.frame], &mut inner.staging, None)
            {
                Ok((_consumed, produced)) => out.extend_from_slice(&inner.staging[0][..produced]),
                Err(e) => error!("sample rate conversion failed: {e}"),
            }
            inner.frame.clear();
        }
    }

    /// Input samples held back waiting for a full frame.
    pub fn buffered(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.frame.len())
    }

    /// Returns `true` when no rate conversion occurs.
    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }
}
