//! Typed audio chunk and the per-session accumulation buffer.

/// A contiguous block of mono PCM samples at a known sample rate.
///
/// Allocated once per pipeline iteration (on the non-RT pipeline thread).
/// Immutable after creation.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Append-only store of every chunk captured during one session.
///
/// Created fresh on each `start()`, so a new session never sees samples from
/// a previous one. Consumed once by the session writer at stop.
#[derive(Debug, Default)]
pub struct SessionBuffer {
    chunks: Vec<AudioChunk>,
}

impl SessionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: AudioChunk) {
        self.chunks.push(chunk);
    }

    pub fn chunks(&self) -> &[AudioChunk] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total number of samples across all chunks.
    pub fn total_samples(&self) -> usize {
        self.chunks.iter().map(|c| c.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Iterate over all samples in capture order.
    pub fn samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.chunks.iter().flat_map(|c| c.samples.iter().copied())
    }
}
