// Integration tests for the archive mixer: subscriber files in, one
// strictly ordered interleaved stream out.

use anyhow::Result;
use base64::Engine;
use castmix::{ArchiveMixer, Config, MediaFrame, VideoFrame};
use std::path::Path;
use tempfile::TempDir;

fn screencast_frame(pts_ms: i64, width: u32, height: u32, shade: u8) -> VideoFrame {
    let mut png_bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut png_bytes, width, height);
        encoder.set_color(png::ColorType::Rgb);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        let pixels = vec![shade; (width * height * 3) as usize];
        writer.write_image_data(&pixels).unwrap();
    }
    let payload = base64::engine::general_purpose::STANDARD.encode(&png_bytes);
    castmix::decode_screencast(&payload, pts_ms).unwrap()
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

fn immediate_config() -> Config {
    let mut config = Config::default();
    config.audio.min_buffer_ms = 0;
    config
}

#[test]
fn single_short_audio_frame_is_not_enough_for_output() -> Result<()> {
    // 20ms of audio = 960 samples: short of one 1024-sample output frame,
    // so the audio queue stays empty and the readiness gate stays closed.
    let dir = TempDir::new()?;
    let wav = dir.path().join("sub-1.wav");
    write_wav(&wav, 16384, 2)?;

    let mut mixer = ArchiveMixer::new(&immediate_config(), 10.0);
    mixer.consume_video(screencast_frame(0, 16, 16, 128), 10.0);
    mixer.consume_audio(&wav.to_string_lossy(), 10.0, "sub-1");

    assert!(!mixer.has_next());
    assert!(mixer.next(false).is_none());

    // Another 20ms pushes the FIFO past one frame and opens the gate.
    write_wav(&wav, 16384, 4)?;
    mixer.consume_audio(&wav.to_string_lossy(), 10.0, "sub-1");
    assert!(mixer.has_next());
    Ok(())
}

#[test]
fn subscriber_is_registered_once() -> Result<()> {
    let dir = TempDir::new()?;
    let wav = dir.path().join("sub-1.wav");
    write_wav(&wav, 100, 2)?;

    let mut mixer = ArchiveMixer::new(&immediate_config(), 0.0);
    mixer.consume_video(screencast_frame(0, 16, 16, 0), 0.0);
    mixer.consume_audio(&wav.to_string_lossy(), 0.0, "sub-1");
    mixer.consume_audio(&wav.to_string_lossy(), 0.5, "sub-1");
    assert_eq!(mixer.source_count(), 1);
    Ok(())
}

#[test]
fn merged_stream_is_monotonic_and_prefers_audio_on_ties() -> Result<()> {
    let dir = TempDir::new()?;
    let wav = dir.path().join("sub-1.wav");
    write_wav(&wav, 8000, 30)?; // 300ms

    let mut mixer = ArchiveMixer::new(&immediate_config(), 100.0);
    for i in 0..9 {
        mixer.consume_video(
            screencast_frame(0, 16, 16, (i * 20) as u8),
            100.0 + i as f64 * 0.033,
        );
    }
    mixer.consume_audio(&wav.to_string_lossy(), 100.0, "sub-1");

    let mut frames = Vec::new();
    while let Some(frame) = mixer.next(false) {
        frames.push(frame);
    }
    assert!(frames.len() > 5, "expected an interleaved run, got {}", frames.len());

    // Strictly monotonic in real time, audio first on equal stamps.
    for pair in frames.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(
            a.pts_ms() <= b.pts_ms(),
            "merge regressed: {} then {}",
            a.pts_ms(),
            b.pts_ms()
        );
        if a.pts_ms() == b.pts_ms() && a.is_audio() != b.is_audio() {
            assert!(a.is_audio(), "tie must be broken in favor of audio");
        }
    }
    Ok(())
}

#[test]
fn capture_delay_shifts_subscriber_offsets() -> Result<()> {
    let dir = TempDir::new()?;
    let wav = dir.path().join("sub-1.wav");
    write_wav(&wav, 5000, 30)?;

    let mut config = immediate_config();
    config.audio.capture_delay_ms = 100;
    let mut mixer = ArchiveMixer::new(&config, 0.0);
    mixer.consume_video(screencast_frame(0, 16, 16, 0), 0.0);
    // Source reported at t=0.2s; with 100ms delay compensation its samples
    // start at global 100ms, so [0, 100) mixes as silence.
    mixer.consume_audio(&wav.to_string_lossy(), 0.2, "sub-1");

    let mut audio_frames = Vec::new();
    while let Some(frame) = mixer.next(true) {
        if let MediaFrame::Audio(frame) = frame {
            audio_frames.push(frame);
        }
    }
    assert!(!audio_frames.is_empty());
    // First output frame covers [0, ~21)ms: all silence.
    assert!(audio_frames[0].planes[0].iter().all(|&s| s == 0.0));
    // Later frames carry the subscriber's signal.
    assert!(audio_frames
        .iter()
        .any(|f| f.planes[0].iter().any(|&s| s > 0.1)));
    Ok(())
}

#[test]
fn flush_then_drain_empties_every_queue() -> Result<()> {
    let dir = TempDir::new()?;
    let wav = dir.path().join("sub-1.wav");
    write_wav(&wav, 1000, 50)?; // 500ms

    let mut config = Config::default();
    config.audio.min_buffer_ms = 2000;
    let mut mixer = ArchiveMixer::new(&config, 0.0);
    mixer.consume_video(screencast_frame(0, 16, 16, 10), 0.0);
    mixer.consume_video(screencast_frame(0, 16, 16, 20), 0.1);
    mixer.consume_audio(&wav.to_string_lossy(), 0.0, "sub-1");

    // Below the buffer window nothing is released yet.
    let before = mixer.stats();
    assert_eq!(before.audio_frames_out, 0);

    mixer.flush();
    let mut drained = 0;
    while mixer.next(true).is_some() {
        drained += 1;
    }
    assert!(drained > 0);
    assert!(!mixer.has_queued());

    let stats = mixer.stats();
    // 500ms @ 48kHz = 24000 samples = 23 full frames of 1024.
    assert_eq!(stats.audio_frames_out, 23);
    // Ticks 0, 33, 66, 99 cover input span [0, 100].
    assert_eq!(stats.video_frames_out, 4);
    assert_eq!(stats.audio_frames_out + stats.video_frames_out, drained);
    Ok(())
}
