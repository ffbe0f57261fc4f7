//! Event types delivered to the presentation adapter.
//!
//! The core never depends on a UI toolkit. Instead, consumers subscribe to
//! broadcast channels on [`crate::CaptureSession`]:
//!
//! | Event | Emitted |
//! |-------|---------|
//! | [`ChunkResultEvent`] | once per analyzed chunk (~23 ms at defaults) |
//! | [`SessionStateEvent`] | on start/stop and on surfaced per-chunk errors |
//!
//! Events are serde-serializable (camelCase) so a UI process or web frontend
//! can consume them as JSON unchanged.

use serde::{Deserialize, Serialize};

use crate::analysis::{metrics::ChunkMetrics, Spectrum};

/// Per-chunk analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResultEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Raw and smoothed frequency-domain magnitudes for this chunk.
    pub spectrum: Spectrum,
    /// Scalar metrics (energy, dominant frequency) for this chunk.
    pub metrics: ChunkMetrics,
}

/// Emitted when the session state changes, or with `detail` set when a
/// recoverable error is surfaced without stopping the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateEvent {
    pub state: SessionState,
    /// Optional human-readable detail (e.g. a dropped-chunk error message).
    pub detail: Option<String>,
}

/// Lifecycle state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No capture in progress; `start()` may be called.
    Idle,
    /// Actively capturing and analyzing; `stop()` may be called.
    Recording,
}
