//! Blocking pipeline loop.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer → raw samples at the capture rate
//! 2. Rate-convert to the fixed analysis rate (44.1 kHz)
//! 3. Frame into exact chunk_size blocks
//! 4. Per chunk: append to SessionBuffer, analyze spectrum, extract metrics
//! 5. Broadcast ChunkResultEvent for the presentation adapter
//! ```
//!
//! The loop runs on a dedicated OS thread that also owns the capture stream
//! (`cpal::Stream` is `!Send`). When the running flag clears, the loop exits
//! and the accumulated `SessionBuffer` is returned to the caller for
//! serialization. Samples still in flight at that point are discarded: a
//! chunk delivered after stop() begins is not part of the session.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    analysis::{metrics, SpectralAnalyzer},
    audio::resample::RateConverter,
    buffering::{
        chunk::{AudioChunk, SessionBuffer},
        AudioConsumer, Consumer,
    },
    events::{ChunkResultEvent, SessionState, SessionStateEvent},
    session::SessionConfig,
};

/// Shared per-session counters for observability.
#[derive(Default)]
pub struct SessionStats {
    /// Raw samples drained from the ring (at the capture rate).
    pub samples_captured: AtomicUsize,
    /// Samples after rate conversion (at the analysis rate).
    pub samples_converted: AtomicUsize,
    /// Chunks analyzed and appended to the session buffer.
    pub chunks_analyzed: AtomicUsize,
    /// Chunks dropped because analysis rejected them.
    pub chunks_dropped: AtomicUsize,
    /// Result events successfully handed to at least one subscriber.
    pub results_emitted: AtomicUsize,
}

impl SessionStats {
    pub fn reset(&self) {
        self.samples_captured.store(0, Ordering::Relaxed);
        self.samples_converted.store(0, Ordering::Relaxed);
        self.chunks_analyzed.store(0, Ordering::Relaxed);
        self.chunks_dropped.store(0, Ordering::Relaxed);
        self.results_emitted.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            samples_converted: self.samples_converted.load(Ordering::Relaxed),
            chunks_analyzed: self.chunks_analyzed.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            results_emitted: self.results_emitted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub samples_captured: usize,
    pub samples_converted: usize,
    pub chunks_analyzed: usize,
    pub chunks_dropped: usize,
    pub results_emitted: usize,
}

/// All context the pipeline needs, passed as one struct so the spawning
/// closure stays tidy.
pub struct PipelineContext {
    pub config: SessionConfig,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub result_tx: broadcast::Sender<ChunkResultEvent>,
    pub state_tx: broadcast::Sender<SessionStateEvent>,
    pub seq: Arc<AtomicU64>,
    pub capture_sample_rate: u32,
    pub stats: Arc<SessionStats>,
}

/// Samples drained from the ring per iteration.
const DRAIN_BLOCK: usize = 1024;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY_MS: u64 = 5;

/// Run the blocking pipeline until `ctx.running` becomes false, then return
/// the accumulated session buffer for serialization.
pub fn run(mut ctx: PipelineContext) -> SessionBuffer {
    info!(
        capture_rate = ctx.capture_sample_rate,
        analysis_rate = ctx.config.sample_rate,
        chunk_size = ctx.config.chunk_size,
        "pipeline started"
    );

    let mut buffer = SessionBuffer::new();

    let mut converter = match RateConverter::new(
        ctx.capture_sample_rate,
        ctx.config.sample_rate,
        DRAIN_BLOCK,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to create rate converter: {e}");
            return buffer;
        }
    };

    let mut analyzer = SpectralAnalyzer::new(
        ctx.config.chunk_size,
        ctx.config.sample_rate,
        ctx.config.smoothing_window,
    );

    // Scratch for ring drains, reused each iteration.
    let mut raw = vec![0f32; DRAIN_BLOCK];
    // Converted samples awaiting a full chunk.
    let mut pending: Vec<f32> = Vec::with_capacity(ctx.config.chunk_size * 2);

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }
        ctx.stats
            .samples_captured
            .fetch_add(n, Ordering::Relaxed);

        let before = pending.len();
        converter.push(&raw[..n], &mut pending);
        ctx.stats
            .samples_converted
            .fetch_add(pending.len() - before, Ordering::Relaxed);

        while pending.len() >= ctx.config.chunk_size {
            let samples: Vec<f32> = pending.drain(..ctx.config.chunk_size).collect();
            let chunk = AudioChunk::new(samples, ctx.config.sample_rate);
            process_chunk(&mut ctx, &mut analyzer, &mut buffer, chunk);
        }
    }

    if !pending.is_empty() {
        debug!(
            samples = pending.len(),
            "discarding trailing partial chunk at stop"
        );
    }

    let snap = ctx.stats.snapshot();
    info!(
        samples_captured = snap.samples_captured,
        samples_converted = snap.samples_converted,
        chunks_analyzed = snap.chunks_analyzed,
        chunks_dropped = snap.chunks_dropped,
        results_emitted = snap.results_emitted,
        "pipeline stopped"
    );

    buffer
}

/// Analyze one framed chunk, retain it, and broadcast the result.
///
/// An analysis failure drops the chunk and surfaces the error to the
/// presentation adapter without terminating the session.
fn process_chunk(
    ctx: &mut PipelineContext,
    analyzer: &mut SpectralAnalyzer,
    buffer: &mut SessionBuffer,
    chunk: AudioChunk,
) {
    let spectrum = match analyzer.analyze(&chunk) {
        Ok(s) => s,
        Err(e) => {
            ctx.stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "dropping chunk that failed analysis");
            let _ = ctx.state_tx.send(SessionStateEvent {
                state: SessionState::Recording,
                detail: Some(e.to_string()),
            });
            return;
        }
    };

    let chunk_metrics = metrics::extract(&chunk, &spectrum);
    buffer.push(chunk);
    ctx.stats.chunks_analyzed.fetch_add(1, Ordering::Relaxed);

    let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
    let emitted = ctx
        .result_tx
        .send(ChunkResultEvent {
            seq,
            spectrum,
            metrics: chunk_metrics,
        })
        .is_ok();
    if emitted {
        ctx.stats.results_emitted.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::Instant;

    use tokio::sync::broadcast::error::TryRecvError;

    use crate::buffering::{create_audio_ring, Producer};

    fn test_context(
        consumer: AudioConsumer,
        running: Arc<AtomicBool>,
    ) -> (
        PipelineContext,
        broadcast::Receiver<ChunkResultEvent>,
    ) {
        let (result_tx, result_rx) = broadcast::channel(64);
        let (state_tx, _) = broadcast::channel(8);
        let ctx = PipelineContext {
            config: SessionConfig::default(),
            consumer,
            running,
            result_tx,
            state_tx,
            seq: Arc::new(AtomicU64::new(0)),
            capture_sample_rate: 44_100,
            stats: Arc::new(SessionStats::default()),
        };
        (ctx, result_rx)
    }

    fn recv_result_with_timeout(
        rx: &mut broadcast::Receiver<ChunkResultEvent>,
        timeout: Duration,
    ) -> ChunkResultEvent {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(ev) => return ev,
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout {
                        panic!("timed out waiting for chunk result");
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("result channel closed unexpectedly"),
            }
        }
    }

    #[test]
    fn emits_one_result_per_full_chunk() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.25f32; 2048]);

        let running = Arc::new(AtomicBool::new(true));
        let (ctx, mut result_rx) = test_context(consumer, Arc::clone(&running));
        let stats = Arc::clone(&ctx.stats);

        let handle = thread::spawn(move || run(ctx));

        let first = recv_result_with_timeout(&mut result_rx, Duration::from_secs(1));
        let second = recv_result_with_timeout(&mut result_rx, Duration::from_secs(1));

        running.store(false, Ordering::SeqCst);
        let buffer = handle.join().expect("pipeline thread panicked");

        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(first.spectrum.len(), 1024 / 2 + 1);
        assert!(first.metrics.energy > 0.0);

        assert_eq!(buffer.chunk_count(), 2);
        assert_eq!(buffer.total_samples(), 2048);

        let snap = stats.snapshot();
        assert_eq!(snap.chunks_analyzed, 2);
        assert_eq!(snap.chunks_dropped, 0);
        assert_eq!(snap.results_emitted, 2);
    }

    #[test]
    fn trailing_partial_chunk_is_discarded() {
        let (mut producer, consumer) = create_audio_ring();
        producer.push_slice(&vec![0.1f32; 1536]);

        let running = Arc::new(AtomicBool::new(true));
        let (ctx, mut result_rx) = test_context(consumer, Arc::clone(&running));

        let handle = thread::spawn(move || run(ctx));

        let only = recv_result_with_timeout(&mut result_rx, Duration::from_secs(1));
        // Give the loop time to drain the remaining 512 samples before stop.
        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::SeqCst);
        let buffer = handle.join().expect("pipeline thread panicked");

        assert_eq!(only.seq, 0);
        assert_eq!(buffer.chunk_count(), 1);
        assert_eq!(buffer.total_samples(), 1024);
    }

    #[test]
    fn wrong_size_chunk_is_dropped_and_surfaced() {
        let (_producer, consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        let (mut ctx, _result_rx) = test_context(consumer, running);
        let mut state_rx = ctx.state_tx.subscribe();

        let mut analyzer = SpectralAnalyzer::new(1024, 44_100, 5);
        let mut buffer = SessionBuffer::new();
        let short = AudioChunk::new(vec![0.0; 512], 44_100);

        process_chunk(&mut ctx, &mut analyzer, &mut buffer, short);

        assert!(buffer.is_empty(), "rejected chunk must not be retained");
        let snap = ctx.stats.snapshot();
        assert_eq!(snap.chunks_dropped, 1);
        assert_eq!(snap.chunks_analyzed, 0);
        assert_eq!(snap.results_emitted, 0);

        let event = state_rx.try_recv().expect("surfaced error event");
        assert_eq!(event.state, SessionState::Recording);
        let detail = event.detail.expect("error detail");
        assert!(detail.contains("1024") && detail.contains("512"));
    }

    #[test]
    fn idle_loop_exits_promptly_with_empty_buffer() {
        let (_producer, consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        let (ctx, _result_rx) = test_context(consumer, Arc::clone(&running));

        let handle = thread::spawn(move || run(ctx));
        thread::sleep(Duration::from_millis(30));
        running.store(false, Ordering::SeqCst);
        let buffer = handle.join().expect("pipeline thread panicked");

        assert!(buffer.is_empty());
    }
}
