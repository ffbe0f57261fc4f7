//! End-to-end session tests over a scripted capture backend: start a
//! session, let the pipeline drain pre-scripted samples, stop, and check
//! the emitted events and the WAV file on disk.

use std::collections::VecDeque;
use std::f32::consts::TAU;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::broadcast::{self, error::TryRecvError};

use wavescope_core::audio::{CaptureBackend, CaptureHandle};
use wavescope_core::buffering::{AudioProducer, Producer};
use wavescope_core::error::Result;
use wavescope_core::{CaptureSession, ChunkResultEvent, SessionConfig, SessionState};

/// Pushes one pre-scripted batch of samples per `open()` call.
struct ScriptedBackend {
    batches: VecDeque<Vec<f32>>,
}

impl ScriptedBackend {
    fn new(batches: Vec<Vec<f32>>) -> Self {
        Self {
            batches: batches.into(),
        }
    }
}

impl CaptureBackend for ScriptedBackend {
    fn open(
        &mut self,
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
    ) -> Result<Box<dyn CaptureHandle>> {
        if let Some(batch) = self.batches.pop_front() {
            producer.push_slice(&batch);
        }
        Ok(Box::new(ScriptedHandle { running }))
    }
}

struct ScriptedHandle {
    running: Arc<AtomicBool>,
}

impl CaptureHandle for ScriptedHandle {
    fn sample_rate(&self) -> u32 {
        44_100
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn config_for(dir: &Path) -> SessionConfig {
    SessionConfig {
        output_dir: dir.to_path_buf(),
        ..SessionConfig::default()
    }
}

fn read_wav(path: &Path) -> (hound::WavSpec, Vec<i16>) {
    let mut reader = hound::WavReader::open(path).expect("open written wav");
    let spec = reader.spec();
    let samples = reader
        .samples::<i16>()
        .map(|s| s.expect("valid sample"))
        .collect();
    (spec, samples)
}

fn recv_result(
    rx: &mut broadcast::Receiver<ChunkResultEvent>,
    timeout: Duration,
) -> ChunkResultEvent {
    let start = Instant::now();
    loop {
        match rx.try_recv() {
            Ok(event) => return event,
            Err(TryRecvError::Empty) => {
                if start.elapsed() >= timeout {
                    panic!("timed out waiting for chunk result");
                }
                thread::sleep(Duration::from_millis(5));
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => panic!("result channel closed"),
        }
    }
}

#[test]
fn silent_session_round_trips_to_wav() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![vec![0.0f32; 3 * 1024]]);
    let session = CaptureSession::new(config_for(dir.path()), backend);
    let mut results = session.subscribe_results();

    session.start().expect("start");
    assert_eq!(session.state(), SessionState::Recording);

    // Three full chunks of silence should flow through analysis.
    for expected_seq in 0..3u64 {
        let event = recv_result(&mut results, Duration::from_secs(2));
        assert_eq!(event.seq, expected_seq);
        assert_eq!(event.metrics.energy, 0.0);
        assert_eq!(event.metrics.dominant_frequency, 0.0);
    }

    let path = session.stop().expect("stop");
    assert_eq!(session.state(), SessionState::Idle);

    let (spec, samples) = read_wav(&path);
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.sample_rate, 44_100);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_format, hound::SampleFormat::Int);
    assert_eq!(samples.len(), 3 * 1024);
    assert!(samples.iter().all(|&s| s == 0));

    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("recording_") && name.ends_with(".wav"));
}

#[test]
fn sine_session_reports_dominant_frequency() {
    let dir = tempfile::tempdir().unwrap();
    let sine: Vec<f32> = (0..2048)
        .map(|i| 0.8 * (TAU * 440.0 * i as f32 / 44_100.0).sin())
        .collect();
    let session = CaptureSession::new(config_for(dir.path()), ScriptedBackend::new(vec![sine]));
    let mut results = session.subscribe_results();

    session.start().expect("start");

    let bin_width = 44_100.0 / 1024.0;
    for _ in 0..2 {
        let event = recv_result(&mut results, Duration::from_secs(2));
        assert_eq!(event.spectrum.len(), 1024 / 2 + 1);
        assert!(event.metrics.energy > 0.0);
        assert!(
            (event.metrics.dominant_frequency - 440.0).abs() <= bin_width,
            "dominant {} Hz not within one bin of 440",
            event.metrics.dominant_frequency
        );
    }

    let path = session.stop().expect("stop");
    let (_, samples) = read_wav(&path);
    assert_eq!(samples.len(), 2048);

    let stats = session.stats();
    assert_eq!(stats.chunks_analyzed, 2);
    assert_eq!(stats.chunks_dropped, 0);
}

#[test]
fn second_session_starts_with_a_fresh_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![vec![0.25f32; 1024], vec![0.5f32; 1024]]);
    let session = CaptureSession::new(config_for(dir.path()), backend);
    let mut results = session.subscribe_results();

    session.start().expect("first start");
    let _ = recv_result(&mut results, Duration::from_secs(2));
    let first_path = session.stop().expect("first stop");
    // Read before the second session can reuse the same timestamped name.
    let (_, first_samples) = read_wav(&first_path);
    assert_eq!(first_samples.len(), 1024);
    assert!(first_samples.iter().all(|&s| s == 8192)); // round(0.25 * 32767)

    session.start().expect("second start");
    let _ = recv_result(&mut results, Duration::from_secs(2));
    let second_path = session.stop().expect("second stop");
    let (_, second_samples) = read_wav(&second_path);
    assert_eq!(second_samples.len(), 1024, "no carry-over from session one");
    assert!(second_samples.iter().all(|&s| s == 16_384)); // round(0.5 * 32767)
}

#[test]
fn state_events_trace_the_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let session = CaptureSession::new(
        config_for(dir.path()),
        ScriptedBackend::new(vec![vec![0.0f32; 1024]]),
    );
    let mut states = session.subscribe_state();
    let mut results = session.subscribe_results();

    session.start().expect("start");
    let _ = recv_result(&mut results, Duration::from_secs(2));
    session.stop().expect("stop");

    let recording = states.try_recv().expect("recording event");
    assert_eq!(recording.state, SessionState::Recording);
    let idle = states.try_recv().expect("idle event");
    assert_eq!(idle.state, SessionState::Idle);
    assert!(idle.detail.is_none());
}
