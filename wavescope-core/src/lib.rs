//! # wavescope-core
//!
//! Real-time microphone spectrum analysis and session recording engine.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureBackend → SPSC RingBuffer → pipeline thread
//!                                                      │
//!                                         frame into 1024-sample chunks
//!                                                      │
//!                                   SpectralAnalyzer + metric extraction
//!                                                      │
//!                              broadcast::Sender<ChunkResultEvent> → UI
//!                                                      │
//!                                 SessionBuffer ─(stop)─► SessionWriter → .wav
//! ```
//!
//! The audio callback is zero-alloc: it checks an atomic flag and pushes into
//! a lock-free ring buffer. All heap work, analysis, and file I/O happen on
//! the pipeline thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod analysis;
pub mod audio;
pub mod buffering;
pub mod error;
pub mod events;
pub mod session;
pub mod writer;

// Convenience re-exports for downstream crates
pub use analysis::{metrics::ChunkMetrics, SpectralAnalyzer, Spectrum};
pub use error::SessionError;
pub use events::{ChunkResultEvent, SessionState, SessionStateEvent};
pub use session::{CaptureSession, SessionConfig};
pub use writer::SessionWriter;
