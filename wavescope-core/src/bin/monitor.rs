//! Live terminal monitor.
//!
//! Captures from the default input device, prints per-chunk energy and
//! dominant frequency while recording, and writes the session WAV when
//! Enter is pressed.
//!
//! ```text
//! RUST_LOG=info cargo run --release --bin monitor [output_dir]
//! ```

#[cfg(feature = "audio-cpal")]
fn main() -> anyhow::Result<()> {
    use std::io::BufRead;
    use std::path::PathBuf;

    use tokio::sync::broadcast::error::RecvError;
    use tracing_subscriber::EnvFilter;

    use wavescope_core::{CaptureSession, SessionConfig};

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let config = SessionConfig {
        output_dir,
        ..SessionConfig::default()
    };
    let session = CaptureSession::with_default_input(config);
    let mut results = session.subscribe_results();

    session.start()?;
    println!("recording... press Enter to stop");

    let printer = std::thread::spawn(move || loop {
        match results.blocking_recv() {
            Ok(event) => {
                // ~43 chunks/s at defaults; print every tenth to keep the
                // terminal readable.
                if event.seq % 10 == 0 {
                    println!(
                        "chunk {:>6}  energy {:>10.4}  dominant {:>8.1} Hz",
                        event.seq, event.metrics.energy, event.metrics.dominant_frequency
                    );
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                eprintln!("display lagging, skipped {skipped} chunks");
            }
            Err(RecvError::Closed) => break,
        }
    });

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;

    let path = session.stop()?;
    let stats = session.stats();
    println!(
        "saved {} ({} chunks, {} samples)",
        path.display(),
        stats.chunks_analyzed,
        stats.samples_converted
    );

    // Dropping the session closes the result channel and lets the printer exit.
    drop(session);
    let _ = printer.join();
    Ok(())
}

#[cfg(not(feature = "audio-cpal"))]
fn main() {
    eprintln!("monitor requires the audio-cpal feature");
    std::process::exit(1);
}
