//! Session lifecycle: the [`CaptureSession`] state machine.
//!
//! ```text
//!            start()                  stop()
//!   Idle ───────────────▶ Recording ───────────▶ Idle
//!    ▲                        │                    │
//!    └── device open failed ──┘     WAV written ───┘
//! ```
//!
//! `start()` spawns one dedicated OS thread that opens the capture device
//! (the stream handle is `!Send`, so it must live on the thread that runs
//! the pipeline), runs the blocking loop, and serializes the session to WAV
//! after the loop exits. `stop()` flips the shared running flag and blocks
//! until that thread reports the written path.

pub mod pipeline;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::audio::CaptureBackend;
use crate::buffering::create_audio_ring;
use crate::error::{Result, SessionError};
use crate::events::{ChunkResultEvent, SessionState, SessionStateEvent};
use crate::writer::SessionWriter;

/// Broadcast channel depth. Slow subscribers lag and drop old events rather
/// than stalling the pipeline.
const BROADCAST_CAP: usize = 256;

/// Tunables for a capture session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Samples per analysis chunk.
    pub chunk_size: usize,
    /// Analysis and output sample rate in Hz. Capture at a different native
    /// rate is converted to this rate.
    pub sample_rate: u32,
    /// Width of the centered smoothing window, in bins.
    pub smoothing_window: usize,
    /// Directory that receives the timestamped WAV file.
    pub output_dir: PathBuf,
    /// Substring match against input device names; `None` uses the default.
    pub preferred_device: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            sample_rate: 44_100,
            smoothing_window: 5,
            output_dir: PathBuf::from("."),
            preferred_device: None,
        }
    }
}

struct Inner {
    state: SessionState,
    /// Receives the WAV path (or error) from the pipeline thread at stop.
    finish: Option<crossbeam_channel::Receiver<Result<PathBuf>>>,
}

/// Top-level controller: owns the state machine, the capture backend, and
/// the broadcast channels subscribers listen on. All methods take `&self`;
/// the session can be shared behind an `Arc` across threads.
pub struct CaptureSession {
    config: SessionConfig,
    backend: Arc<Mutex<Box<dyn CaptureBackend>>>,
    running: Arc<AtomicBool>,
    inner: Mutex<Inner>,
    result_tx: broadcast::Sender<ChunkResultEvent>,
    state_tx: broadcast::Sender<SessionStateEvent>,
    seq: Arc<AtomicU64>,
    stats: Arc<pipeline::SessionStats>,
}

impl CaptureSession {
    /// Create a session over an arbitrary capture backend. Used directly in
    /// tests; production callers go through [`Self::with_default_input`].
    pub fn new(config: SessionConfig, backend: impl CaptureBackend) -> Self {
        let (result_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (state_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            backend: Arc::new(Mutex::new(Box::new(backend))),
            running: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                finish: None,
            }),
            result_tx,
            state_tx,
            seq: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(pipeline::SessionStats::default()),
        }
    }

    /// Create a session over the system microphone.
    #[cfg(feature = "audio-cpal")]
    pub fn with_default_input(config: SessionConfig) -> Self {
        let backend = crate::audio::MicBackend::new(config.preferred_device.clone());
        Self::new(config, backend)
    }

    /// Begin capturing.
    ///
    /// Blocks until the device is open and producing, then returns with the
    /// session in `Recording`. On failure the session stays `Idle`.
    ///
    /// # Errors
    /// `SessionError::AlreadyRecording` if a session is in progress;
    /// device errors from the backend otherwise.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Recording {
            warn!("start() called while already recording");
            return Err(SessionError::AlreadyRecording);
        }

        self.stats.reset();
        self.running.store(true, Ordering::SeqCst);

        let (producer, consumer) = create_audio_ring();
        let (open_tx, open_rx) = crossbeam_channel::bounded::<Result<u32>>(1);
        let (finish_tx, finish_rx) = crossbeam_channel::bounded::<Result<PathBuf>>(1);

        let config = self.config.clone();
        let backend = Arc::clone(&self.backend);
        let running = Arc::clone(&self.running);
        let result_tx = self.result_tx.clone();
        let state_tx = self.state_tx.clone();
        let seq = Arc::clone(&self.seq);
        let stats = Arc::clone(&self.stats);

        thread::Builder::new()
            .name("wavescope-pipeline".into())
            .spawn(move || {
                // The capture handle is opened and dropped on this thread;
                // it is not Send.
                let capture = match backend.lock().open(producer, Arc::clone(&running)) {
                    Ok(capture) => {
                        let _ = open_tx.send(Ok(capture.sample_rate()));
                        capture
                    }
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                let capture_sample_rate = capture.sample_rate();
                let buffer = pipeline::run(pipeline::PipelineContext {
                    config: config.clone(),
                    consumer,
                    running,
                    result_tx,
                    state_tx,
                    seq,
                    capture_sample_rate,
                    stats,
                });

                // Release the device before serializing.
                capture.stop();
                drop(capture);

                let writer = SessionWriter::new(config.sample_rate, &config.output_dir);
                let _ = finish_tx.send(writer.write(&buffer));
            })
            .map_err(|e| {
                SessionError::Other(anyhow::anyhow!("failed to spawn pipeline thread: {e}"))
            })?;

        match open_rx.recv() {
            Ok(Ok(capture_rate)) => {
                info!(capture_rate, "capture session started");
                inner.state = SessionState::Recording;
                inner.finish = Some(finish_rx);
                drop(inner);
                self.emit_state(SessionState::Recording, None);
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(SessionError::Other(anyhow::anyhow!(
                    "pipeline thread exited before opening the capture device"
                )))
            }
        }
    }

    /// Stop capturing and write the session to disk.
    ///
    /// Blocks until the pipeline drains and the WAV file is finalized, then
    /// returns the written path. The session is `Idle` afterwards whether or
    /// not the write succeeded.
    ///
    /// # Errors
    /// `SessionError::NotRecording` if no session is in progress; write
    /// errors from serialization otherwise.
    pub fn stop(&self) -> Result<PathBuf> {
        let mut inner = self.inner.lock();
        if inner.state != SessionState::Recording {
            warn!("stop() called while idle");
            return Err(SessionError::NotRecording);
        }

        info!("stopping capture session");
        self.running.store(false, Ordering::SeqCst);

        let outcome = match inner.finish.take() {
            Some(finish_rx) => match finish_rx.recv() {
                Ok(result) => result,
                Err(_) => Err(SessionError::Other(anyhow::anyhow!(
                    "pipeline thread terminated without reporting a result"
                ))),
            },
            None => Err(SessionError::Other(anyhow::anyhow!(
                "recording session has no pipeline handle"
            ))),
        };

        inner.state = SessionState::Idle;
        drop(inner);

        match outcome {
            Ok(path) => {
                info!(path = %path.display(), "capture session stopped");
                self.emit_state(SessionState::Idle, None);
                Ok(path)
            }
            Err(e) => {
                warn!(error = %e, "capture session stopped with write failure");
                self.emit_state(SessionState::Idle, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Subscribe to per-chunk analysis results.
    pub fn subscribe_results(&self) -> broadcast::Receiver<ChunkResultEvent> {
        self.result_tx.subscribe()
    }

    /// Subscribe to lifecycle and surfaced-error events.
    pub fn subscribe_state(&self) -> broadcast::Receiver<SessionStateEvent> {
        self.state_tx.subscribe()
    }

    /// Counters for the current (or most recent) session.
    pub fn stats(&self) -> pipeline::StatsSnapshot {
        self.stats.snapshot()
    }

    fn emit_state(&self, state: SessionState, detail: Option<String>) {
        let _ = self.state_tx.send(SessionStateEvent { state, detail });
    }
}
