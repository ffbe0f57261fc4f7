//! Scalar signal metrics derived from a chunk and its spectrum.

use serde::{Deserialize, Serialize};

use crate::analysis::Spectrum;
use crate::buffering::chunk::AudioChunk;

/// Per-chunk scalar metrics delivered alongside the spectrum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetrics {
    /// Sum of squared sample values (raw signal energy, unnormalized).
    pub energy: f32,
    /// Frequency (Hz) of the bin with the largest **raw** magnitude.
    /// Ties resolve to the lowest-frequency bin.
    pub dominant_frequency: f32,
}

/// Derive metrics from one chunk and its spectrum. Pure and deterministic.
pub fn extract(chunk: &AudioChunk, spectrum: &Spectrum) -> ChunkMetrics {
    let energy = chunk.samples.iter().map(|s| s * s).sum();

    // Strict comparison keeps the first (lowest-frequency) bin on ties.
    let mut peak_idx = 0usize;
    let mut peak_mag = f32::NEG_INFINITY;
    for (idx, &mag) in spectrum.magnitudes.iter().enumerate() {
        if mag > peak_mag {
            peak_mag = mag;
            peak_idx = idx;
        }
    }

    let dominant_frequency = spectrum
        .frequencies
        .get(peak_idx)
        .copied()
        .unwrap_or_default();

    ChunkMetrics {
        energy,
        dominant_frequency,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SpectralAnalyzer;
    use approx::assert_relative_eq;
    use std::f32::consts::TAU;

    fn spectrum_of(frequencies: Vec<f32>, magnitudes: Vec<f32>) -> Spectrum {
        let smoothed = magnitudes.clone();
        Spectrum {
            frequencies,
            magnitudes,
            smoothed,
        }
    }

    #[test]
    fn zero_chunk_has_zero_energy_and_dc_dominant() {
        let mut analyzer = SpectralAnalyzer::new(1024, 44_100, 5);
        let chunk = AudioChunk::new(vec![0.0; 1024], 44_100);
        let spectrum = analyzer.analyze(&chunk).unwrap();
        let metrics = extract(&chunk, &spectrum);
        assert_eq!(metrics.energy, 0.0);
        // All-zero magnitudes: first bin wins the tie.
        assert_eq!(metrics.dominant_frequency, 0.0);
    }

    #[test]
    fn energy_is_sum_of_squares() {
        let chunk = AudioChunk::new(vec![1.0, -1.0, 0.5], 44_100);
        let spectrum = spectrum_of(vec![0.0, 10.0], vec![0.0, 1.0]);
        let metrics = extract(&chunk, &spectrum);
        assert_relative_eq!(metrics.energy, 2.25);
    }

    #[test]
    fn dominant_uses_raw_magnitudes_with_first_tie_winner() {
        let chunk = AudioChunk::new(vec![0.0; 4], 44_100);
        let spectrum = spectrum_of(vec![0.0, 10.0, 20.0, 30.0], vec![3.0, 5.0, 5.0, 1.0]);
        let metrics = extract(&chunk, &spectrum);
        assert_eq!(metrics.dominant_frequency, 10.0);
    }

    #[test]
    fn sine_440_dominant_within_one_bin() {
        let sample_rate = 44_100u32;
        let chunk_size = 1024usize;
        let samples: Vec<f32> = (0..chunk_size)
            .map(|i| 0.8 * (TAU * 440.0 * i as f32 / sample_rate as f32).sin())
            .collect();
        let chunk = AudioChunk::new(samples, sample_rate);

        let mut analyzer = SpectralAnalyzer::new(chunk_size, sample_rate, 5);
        let spectrum = analyzer.analyze(&chunk).unwrap();
        let metrics = extract(&chunk, &spectrum);

        let bin_width = sample_rate as f32 / chunk_size as f32; // ≈ 43 Hz
        assert!(
            (metrics.dominant_frequency - 440.0).abs() <= bin_width,
            "dominant {} Hz not within one bin of 440",
            metrics.dominant_frequency
        );
        assert!(metrics.energy > 0.0);
    }
}
