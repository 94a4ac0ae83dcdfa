// Session lifecycle tests: the control loop draining the archive into a
// file output, interrupt-driven flush, and idle shutdown.

use anyhow::Result;
use base64::Engine;
use castmix::audio::{AudioFormat, CaptureSource, ChannelBackend, InputAudioFrame};
use castmix::session::{forward_capture_notifications, Command, Session};
use castmix::Config;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn screencast_command(timestamp: f64, shade: u8) -> Command {
    let mut png_bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut png_bytes, 16, 16);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&vec![shade; 16 * 16 * 3]).unwrap();
    }
    let payload = base64::engine::general_purpose::STANDARD.encode(&png_bytes);
    Command::Video {
        frame: castmix::decode_screencast(&payload, 0).unwrap(),
        timestamp,
    }
}

fn write_wav(path: &Path, value: i16, blocks_10ms: usize) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for _ in 0..blocks_10ms * 480 {
        writer.write_sample(value)?;
    }
    writer.finalize()?;
    Ok(())
}

fn fast_idle_config() -> Config {
    let mut config = Config::default();
    config.session.idle_quiet_cycles = 20; // ~200ms instead of 10s
    config.audio.min_buffer_ms = 0;
    config
}

#[tokio::test]
async fn interrupt_drains_and_finalizes_the_archive() -> Result<()> {
    let dir = TempDir::new()?;
    let target = dir.path().join("archive.mp4");
    let wav = dir.path().join("sub-1.wav");
    write_wav(&wav, 9000, 30)?; // 300ms

    let (tx, rx) = mpsc::channel(16);
    let interrupt = Arc::new(AtomicBool::new(false));
    let session = Session::new(
        fast_idle_config(),
        target.to_string_lossy().into_owned(),
        rx,
        Arc::clone(&interrupt),
    );
    let running = tokio::spawn(session.run());

    for i in 0..6 {
        tx.send(screencast_command(5.0 + i as f64 * 0.04, i * 30)).await?;
    }
    tx.send(Command::Audio {
        path: wav.to_string_lossy().into_owned(),
        timestamp: 5.0,
        subscriber_id: "sub-1".to_string(),
    })
    .await?;

    // Give the loop a few ticks to ingest, then interrupt.
    tokio::time::sleep(Duration::from_millis(100)).await;
    interrupt.store(true, Ordering::SeqCst);
    drop(tx);

    let stats = tokio::time::timeout(Duration::from_secs(5), running).await???;

    assert!(stats.video_frames_out > 0, "video must drain");
    assert!(stats.audio_frames_out > 0, "audio must drain");
    // 300ms @ 48kHz = 14400 samples = 14 full frames of 1024.
    assert_eq!(stats.audio_frames_out, 14);

    // The output finalized: muxed target, or the raw track pair.
    let y4m = dir.path().join("archive.y4m");
    let track_wav = dir.path().join("archive.wav");
    assert!(target.exists() || (y4m.exists() && track_wav.exists()));
    Ok(())
}

#[tokio::test]
async fn idle_session_exits_after_quiet_threshold() -> Result<()> {
    let dir = TempDir::new()?;
    let target = dir.path().join("idle.mp4");

    let (tx, rx) = mpsc::channel(4);
    let interrupt = Arc::new(AtomicBool::new(false));
    let session = Session::new(
        fast_idle_config(),
        target.to_string_lossy().into_owned(),
        rx,
        interrupt,
    );
    let running = tokio::spawn(session.run());

    // One frame primes the mixer; then the producers go silent (but stay
    // connected) and the quiet-cycle counter must end the session alone.
    tx.send(screencast_command(1.0, 50)).await?;

    let stats = tokio::time::timeout(Duration::from_secs(5), running).await???;
    assert_eq!(stats.video_frames_in, 1);
    drop(tx);
    Ok(())
}

#[tokio::test]
async fn empty_session_produces_no_archive() -> Result<()> {
    let dir = TempDir::new()?;
    let target = dir.path().join("never.mp4");

    let (tx, rx) = mpsc::channel::<Command>(4);
    let interrupt = Arc::new(AtomicBool::new(true));
    let session = Session::new(
        fast_idle_config(),
        target.to_string_lossy().into_owned(),
        rx,
        interrupt,
    );
    drop(tx);

    let stats = tokio::time::timeout(Duration::from_secs(5), session.run()).await??;
    assert_eq!(stats.video_frames_in, 0);
    assert!(!target.exists());
    Ok(())
}

#[tokio::test]
async fn capture_frames_join_the_mix() -> Result<()> {
    let dir = TempDir::new()?;
    let target = dir.path().join("capture.mp4");

    let (tx, rx) = mpsc::channel(16);
    let (capture_tx, capture_rx) = mpsc::channel(64);
    let (notify_tx, notify_rx) = mpsc::channel(4);
    let interrupt = Arc::new(AtomicBool::new(false));

    let capture = CaptureSource::new(Box::new(ChannelBackend::new(capture_rx)), notify_tx);
    let _forwarder = forward_capture_notifications(notify_rx, tx.clone());

    let session = Session::new(
        fast_idle_config(),
        target.to_string_lossy().into_owned(),
        rx,
        Arc::clone(&interrupt),
    )
    .with_capture(capture);
    let running = tokio::spawn(session.run());

    // Prime the timeline, then feed 100ms of capture audio.
    tx.send(screencast_command(2.0, 80)).await?;
    let format = AudioFormat::new(48_000, 1);
    for i in 0..10 {
        capture_tx
            .send(InputAudioFrame::constant(i * 10, format, 480, 6000))
            .await?;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    interrupt.store(true, Ordering::SeqCst);
    drop(tx);
    drop(capture_tx);

    let stats = tokio::time::timeout(Duration::from_secs(5), running).await???;
    assert!(stats.audio_frames_in >= 10, "capture frames must be mixed");
    // 100ms @ 48kHz = 4800 samples = 4 full output frames.
    assert!(stats.audio_frames_out >= 4);
    Ok(())
}
