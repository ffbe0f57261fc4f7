//! Per-chunk spectral analysis: real-input FFT magnitudes plus a smoothed
//! variant for display.
//!
//! ## Algorithm
//!
//! 1. Copy the chunk into a complex scratch buffer (imaginary parts zero).
//! 2. Forward FFT (rustfft, plan cached per analyzer).
//! 3. Magnitudes of the first N/2 + 1 bins, the unique half of a
//!    real-input transform. Unnormalized.
//! 4. Centered moving average of fixed width over the raw magnitudes.
//!
//! The analyzer is created once per session; the FFT plan, scratch buffers,
//! and frequency bins are reused for every chunk so the per-chunk cost stays
//! within the real-time budget.

pub mod metrics;

use std::sync::Arc;

use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::buffering::chunk::AudioChunk;
use crate::error::{Result, SessionError};

/// Frequency-domain representation of one audio chunk.
///
/// All three vectors have length `chunk_size / 2 + 1` and are index-aligned:
/// `magnitudes[i]` and `smoothed[i]` belong to `frequencies[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spectrum {
    /// Bin center frequencies in Hz, strictly increasing.
    pub frequencies: Vec<f32>,
    /// Raw FFT magnitudes, non-negative.
    pub magnitudes: Vec<f32>,
    /// Moving-average smoothed magnitudes, non-negative.
    pub smoothed: Vec<f32>,
}

impl Spectrum {
    /// Number of frequency bins.
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Width of one frequency bin in Hz.
    pub fn bin_width(&self) -> f32 {
        if self.frequencies.len() < 2 {
            return 0.0;
        }
        self.frequencies[1] - self.frequencies[0]
    }
}

/// Computes a [`Spectrum`] from fixed-size audio chunks.
pub struct SpectralAnalyzer {
    chunk_size: usize,
    smoothing_window: usize,
    /// Bin frequencies `i * sample_rate / chunk_size`, cached per session.
    frequencies: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    /// Complex input/output buffer, reused across chunks.
    fft_buf: Vec<Complex32>,
    /// rustfft scratch space, reused across chunks.
    scratch: Vec<Complex32>,
}

impl SpectralAnalyzer {
    /// Create an analyzer for chunks of exactly `chunk_size` samples at
    /// `sample_rate` Hz, smoothing with a centered window of
    /// `smoothing_window` bins.
    pub fn new(chunk_size: usize, sample_rate: u32, smoothing_window: usize) -> Self {
        let frequencies = (0..=chunk_size / 2)
            .map(|i| i as f32 * sample_rate as f32 / chunk_size as f32)
            .collect();

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(chunk_size);
        let scratch = vec![Complex32::default(); fft.get_inplace_scratch_len()];

        Self {
            chunk_size,
            smoothing_window,
            frequencies,
            fft,
            fft_buf: vec![Complex32::default(); chunk_size],
            scratch,
        }
    }

    /// Number of bins produced per chunk (`chunk_size / 2 + 1`).
    pub fn bin_count(&self) -> usize {
        self.frequencies.len()
    }

    /// Analyze one chunk.
    ///
    /// # Errors
    /// `SessionError::InvalidChunk` if the chunk length does not match the
    /// configured size (including empty chunks).
    pub fn analyze(&mut self, chunk: &AudioChunk) -> Result<Spectrum> {
        if chunk.samples.len() != self.chunk_size {
            return Err(SessionError::InvalidChunk {
                expected: self.chunk_size,
                actual: chunk.samples.len(),
            });
        }

        for (slot, &sample) in self.fft_buf.iter_mut().zip(&chunk.samples) {
            *slot = Complex32::new(sample, 0.0);
        }
        self.fft.process_with_scratch(&mut self.fft_buf, &mut self.scratch);

        let magnitudes: Vec<f32> = self.fft_buf[..=self.chunk_size / 2]
            .iter()
            .map(|c| c.norm())
            .collect();
        let smoothed = moving_average_same(&magnitudes, self.smoothing_window);

        Ok(Spectrum {
            frequencies: self.frequencies.clone(),
            magnitudes,
            smoothed,
        })
    }
}

/// Centered moving average with same-length output.
///
/// Edge policy: the window shrinks at the boundaries. Bin `i` averages only
/// the in-range neighbors within `[i - window/2, i + (window-1)/2]`, and the
/// divisor is the number of samples actually covered. A window of 1 is the
/// identity.
pub fn moving_average_same(values: &[f32], window: usize) -> Vec<f32> {
    if window <= 1 || values.is_empty() {
        return values.to_vec();
    }

    let left = window / 2;
    let right = (window - 1) / 2;

    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(left);
            let hi = (i + right).min(values.len() - 1);
            let span = &values[lo..=hi];
            span.iter().sum::<f32>() / span.len() as f32
        })
        .collect()
}
