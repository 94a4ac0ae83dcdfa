// Integration tests for the growing-file audio source.
//
// Subscriber files are written by another process and only ever grow. These
// tests simulate that with WAV files rewritten in place: the source must
// decode to the end, survive EOF, and after the file grows pick up exactly
// the samples it has not yet emitted.

use anyhow::Result;
use castmix::{GrowingFileSource, MixError};
use std::path::Path;
use tempfile::TempDir;

/// Write `sections` of constant-valued 10ms blocks as one mono 48kHz WAV.
fn write_wav(path: &Path, sections: &[(i16, usize)]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &(value, blocks) in sections {
        for _ in 0..blocks * 480 {
            writer.write_sample(value)?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Pull every available frame, flattening to raw samples.
fn drain_samples(source: &mut GrowingFileSource) -> Result<Vec<i16>, MixError> {
    let mut samples = Vec::new();
    while let Some(frame) = source.next_frame()? {
        samples.extend_from_slice(&frame.planes[0]);
    }
    Ok(samples)
}

#[test]
fn decodes_a_file_to_the_end() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("sub-1.wav");
    write_wav(&path, &[(1000, 10)])?; // 100ms

    let mut source = GrowingFileSource::open(&path, 0)?;
    let samples = drain_samples(&mut source)?;
    assert_eq!(samples.len(), 4800);
    assert!(samples.iter().all(|&s| s == 1000));

    // Exhausted: further calls keep returning nothing.
    assert!(source.next_frame()?.is_none());
    Ok(())
}

#[test]
fn frames_carry_rebased_global_timestamps() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("sub-1.wav");
    write_wav(&path, &[(500, 20)])?;

    let mut source = GrowingFileSource::open(&path, 1500)?;
    let first = source.next_frame()?.expect("first frame");
    assert_eq!(first.pts_ms, 1500);
    assert_eq!(first.format.sample_rate, 48_000);
    assert_eq!(first.format.channels, 1);
    Ok(())
}

#[test]
fn reopen_after_growth_emits_only_new_samples() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("sub-1.wav");

    // First pass: 50ms of value 1.
    write_wav(&path, &[(1, 5)])?;
    let mut source = GrowingFileSource::open(&path, 0)?;
    let first_pass = drain_samples(&mut source)?;
    assert_eq!(first_pass.len(), 2400);

    // The writer appends 50ms of value 2 (same prefix, longer file).
    write_wav(&path, &[(1, 5), (2, 5)])?;
    let second_pass = drain_samples(&mut source)?;
    assert!(!second_pass.is_empty(), "grown file must yield new frames");
    assert!(
        second_pass.iter().all(|&s| s == 2),
        "already-emitted samples must be skipped after reopen"
    );
    assert_eq!(first_pass.len() + second_pass.len(), 4800);
    Ok(())
}

#[test]
fn unchanged_file_yields_nothing_after_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("sub-1.wav");
    write_wav(&path, &[(7, 3)])?;

    let mut source = GrowingFileSource::open(&path, 0)?;
    drain_samples(&mut source)?;

    // Two more polls, no growth: each one reopens once, finds nothing new.
    assert!(source.next_frame()?.is_none());
    assert!(source.next_frame()?.is_none());
    Ok(())
}

#[test]
fn open_failure_names_the_path() {
    let err = GrowingFileSource::open("/does/not/exist.wav", 0).unwrap_err();
    let text = err.to_string();
    assert!(matches!(err, MixError::SourceOpenFailed(_)));
    assert!(text.contains("exist.wav"));
}
