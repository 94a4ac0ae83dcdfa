// File-mode archive output.
//
// The session writes two raw tracks next to the target (Y4M video, float
// WAV audio); when the archive closes they are muxed into the requested
// container by invoking the ffmpeg CLI, which handles every codec without
// linking one. If ffmpeg is missing the raw tracks stay behind and a
// warning names them.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use super::y4m;
use super::ArchiveOutput;
use crate::audio::{AudioFormat, OutputAudioFrame};
use crate::video::VideoFrame;

pub struct FileOutput {
    target: PathBuf,
    video_path: PathBuf,
    audio_path: PathBuf,
    video: BufWriter<File>,
    audio: Option<hound::WavWriter<BufWriter<File>>>,
    video_frames: u64,
    audio_frames: u64,
}

impl FileOutput {
    pub fn create(
        target: &Path,
        width: u32,
        height: u32,
        fps: u32,
        format: AudioFormat,
    ) -> Result<Self> {
        let video_path = target.with_extension("y4m");
        let audio_path = target.with_extension("wav");

        let mut video = BufWriter::new(
            File::create(&video_path)
                .with_context(|| format!("cannot create {}", video_path.display()))?,
        );
        y4m::write_header(&mut video, width, height, fps)?;

        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let audio = hound::WavWriter::create(&audio_path, spec)
            .with_context(|| format!("cannot create {}", audio_path.display()))?;

        info!(
            "file output: {} + {} -> {}",
            video_path.display(),
            audio_path.display(),
            target.display()
        );
        Ok(Self {
            target: target.to_path_buf(),
            video_path,
            audio_path,
            video,
            audio: Some(audio),
            video_frames: 0,
            audio_frames: 0,
        })
    }

    /// Mux the raw tracks into the target container.
    fn remux(&self) -> Result<()> {
        let video_arg = self.video_path.display().to_string();
        let audio_arg = self.audio_path.display().to_string();
        let target_arg = self.target.display().to_string();
        let status = Command::new("ffmpeg")
            .args([
                "-y",
                "-loglevel",
                "error",
                "-i",
                video_arg.as_str(),
                "-i",
                audio_arg.as_str(),
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-b:a",
                "96k",
                "-shortest",
                target_arg.as_str(),
            ])
            .status()
            .context("failed to spawn ffmpeg")?;
        anyhow::ensure!(status.success(), "ffmpeg exited with {status}");
        Ok(())
    }
}

impl ArchiveOutput for FileOutput {
    fn write_video(&mut self, frame: &VideoFrame) -> Result<()> {
        y4m::write_frame(&mut self.video, frame)?;
        self.video_frames += 1;
        Ok(())
    }

    fn write_audio(&mut self, frame: &OutputAudioFrame) -> Result<()> {
        let writer = self
            .audio
            .as_mut()
            .context("audio track already finalized")?;
        // WAV is interleaved; the pipeline is planar.
        for i in 0..frame.sample_count() {
            for plane in &frame.planes {
                writer.write_sample(plane[i])?;
            }
        }
        self.audio_frames += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        use std::io::Write;
        self.video.flush()?;
        if let Some(audio) = self.audio.take() {
            audio.finalize().context("cannot finalize audio track")?;
        }
        info!(
            "archive tracks complete: {} video frames, {} audio frames",
            self.video_frames, self.audio_frames
        );

        match self.remux() {
            Ok(()) => {
                let _ = std::fs::remove_file(&self.video_path);
                let _ = std::fs::remove_file(&self.audio_path);
                info!("archive written to {}", self.target.display());
            }
            Err(e) => {
                warn!(
                    "mux into {} failed ({}); raw tracks kept at {} and {}",
                    self.target.display(),
                    e,
                    self.video_path.display(),
                    self.audio_path.display()
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writes_raw_tracks() -> Result<()> {
        let dir = TempDir::new()?;
        let target = dir.path().join("archive.mp4");
        let format = AudioFormat::new(48_000, 1);
        let mut output = Box::new(FileOutput::create(&target, 16, 8, 30, format)?);

        output.write_video(&VideoFrame::test_pattern(0, 16, 8, 50))?;
        output.write_audio(&OutputAudioFrame {
            pts_stream: 0,
            format,
            planes: vec![vec![0.25; 1024]],
        })?;

        let video_path = dir.path().join("archive.y4m");
        let audio_path = dir.path().join("archive.wav");
        let output: Box<dyn ArchiveOutput> = output;
        output.finish()?;

        // Either ffmpeg muxed the target, or the raw tracks survive.
        assert!(target.exists() || (video_path.exists() && audio_path.exists()));
        Ok(())
    }
}
