use thiserror::Error;

/// All errors produced by wavescope-core.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("audio device error: {0}")]
    Device(String),

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("session is already recording")]
    AlreadyRecording,

    #[error("session is not recording")]
    NotRecording,

    #[error("invalid chunk length: expected {expected} samples, got {actual}")]
    InvalidChunk { expected: usize, actual: usize },

    #[error("waveform write error: {0}")]
    Write(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
