//! WAV serialization of a finished session.
//!
//! One-shot: invoked once at session stop with the full `SessionBuffer`.
//! Output is single-channel 16-bit little-endian PCM in a standard RIFF/WAVE
//! container, readable by any playback tool.

use std::path::{Path, PathBuf};

use chrono::Local;
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::info;

use crate::buffering::chunk::SessionBuffer;
use crate::error::Result;

/// Serializes accumulated session audio to a timestamped WAV file.
#[derive(Debug, Clone)]
pub struct SessionWriter {
    sample_rate: u32,
    output_dir: PathBuf,
}

impl SessionWriter {
    pub fn new(sample_rate: u32, output_dir: impl AsRef<Path>) -> Self {
        Self {
            sample_rate,
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Write all buffered chunks, in capture order, to
    /// `recording_<YYYYMMDD>_<HHMMSS>.wav` under the output directory.
    ///
    /// Filenames have one-second granularity: two sessions stopped within
    /// the same wall-clock second get the same name, and the later write
    /// replaces the earlier file.
    ///
    /// # Errors
    /// `SessionError::Write` / `SessionError::Io` on filesystem failure.
    pub fn write(&self, buffer: &SessionBuffer) -> Result<PathBuf> {
        let filename = Local::now()
            .format("recording_%Y%m%d_%H%M%S.wav")
            .to_string();
        let path = self.output_dir.join(filename);

        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut writer = WavWriter::create(&path, spec)?;
        for sample in buffer.samples() {
            writer.write_sample(sample_to_i16(sample))?;
        }
        writer.finalize()?;

        info!(
            path = %path.display(),
            samples = buffer.total_samples(),
            "session written"
        );
        Ok(path)
    }
}

/// Convert a float sample to 16-bit PCM: `round(sample * 32767)`, clamped so
/// samples slightly outside [-1, 1] cannot wrap around.
pub fn sample_to_i16(sample: f32) -> i16 {
    (sample * 32_767.0)
        .round()
        .clamp(i16::MIN as f32, i16::MAX as f32) as i16
}
