// Stream-mode archive output.
//
// An rtmp target means live publishing: a long-lived ffmpeg child encodes
// H.264/AAC and speaks FLV to the URL while we feed it raw media through
// two named pipes. Pipe opens and writes block, so each pipe gets a
// dedicated thread fed over a bounded channel; the async side never touches
// the pipes directly.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::OpenOptions;
use std::io::Write;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use tempfile::TempDir;
use tracing::{info, warn};

use super::y4m;
use super::ArchiveOutput;
use crate::audio::{AudioFormat, OutputAudioFrame};
use crate::video::VideoFrame;

/// Writer threads drain these; a closed channel means finish.
type ByteSender = Sender<Vec<u8>>;

pub struct StreamOutput {
    url: String,
    video_tx: Option<ByteSender>,
    audio_tx: Option<ByteSender>,
    video_thread: Option<JoinHandle<Result<()>>>,
    audio_thread: Option<JoinHandle<Result<()>>>,
    encoder: Child,
    /// Holds the fifo files alive for the session.
    _workdir: TempDir,
}

impl StreamOutput {
    pub fn spawn(
        url: &str,
        width: u32,
        height: u32,
        fps: u32,
        format: AudioFormat,
    ) -> Result<Self> {
        let workdir = TempDir::new().context("cannot create stream workdir")?;
        let video_fifo = workdir.path().join("video.y4m");
        let audio_fifo = workdir.path().join("audio.f32");
        mkfifo(&video_fifo, Mode::S_IRWXU).context("cannot create video fifo")?;
        mkfifo(&audio_fifo, Mode::S_IRWXU).context("cannot create audio fifo")?;

        let video_arg = video_fifo.display().to_string();
        let audio_arg = audio_fifo.display().to_string();
        let rate_arg = format.sample_rate.to_string();
        let channels_arg = format.channels.to_string();
        let encoder = Command::new("ffmpeg")
            .args([
                "-y",
                "-loglevel",
                "error",
                "-i",
                video_arg.as_str(),
                "-f",
                "f32le",
                "-ar",
                rate_arg.as_str(),
                "-ac",
                channels_arg.as_str(),
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
                "-f",
                "flv",
                url,
            ])
            .stdin(Stdio::null())
            .spawn()
            .context("failed to spawn ffmpeg for streaming")?;

        // Opening a fifo for writing blocks until ffmpeg opens the read end,
        // so each pipe lives on its own thread.
        let (video_tx, video_rx) = bounded::<Vec<u8>>(64);
        let (audio_tx, audio_rx) = bounded::<Vec<u8>>(256);

        let header = {
            let mut header = Vec::new();
            y4m::write_header(&mut header, width, height, fps)?;
            header
        };
        let video_thread = std::thread::spawn(move || -> Result<()> {
            let mut pipe = OpenOptions::new().write(true).open(&video_fifo)?;
            pipe.write_all(&header)?;
            for chunk in video_rx {
                pipe.write_all(&chunk)?;
            }
            pipe.flush()?;
            Ok(())
        });
        let audio_thread = std::thread::spawn(move || -> Result<()> {
            let mut pipe = OpenOptions::new().write(true).open(&audio_fifo)?;
            for chunk in audio_rx {
                pipe.write_all(&chunk)?;
            }
            pipe.flush()?;
            Ok(())
        });

        info!("streaming archive to {}", url);
        Ok(Self {
            url: url.to_string(),
            video_tx: Some(video_tx),
            audio_tx: Some(audio_tx),
            video_thread: Some(video_thread),
            audio_thread: Some(audio_thread),
            encoder,
            _workdir: workdir,
        })
    }
}

impl ArchiveOutput for StreamOutput {
    fn write_video(&mut self, frame: &VideoFrame) -> Result<()> {
        let tx = self.video_tx.as_ref().context("video pipe closed")?;
        tx.send(y4m::frame_bytes(frame))
            .context("video writer thread gone")?;
        Ok(())
    }

    fn write_audio(&mut self, frame: &OutputAudioFrame) -> Result<()> {
        let mut bytes =
            Vec::with_capacity(frame.sample_count() * frame.planes.len() * 4);
        // Raw f32le, interleaved.
        for i in 0..frame.sample_count() {
            for plane in &frame.planes {
                bytes.extend_from_slice(&plane[i].to_le_bytes());
            }
        }
        let tx = self.audio_tx.as_ref().context("audio pipe closed")?;
        tx.send(bytes).context("audio writer thread gone")?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        // Closing the channels ends the writer threads, which closes the
        // pipes, which lets ffmpeg flush and exit.
        drop(self.video_tx.take());
        drop(self.audio_tx.take());
        for thread in [self.video_thread.take(), self.audio_thread.take()]
            .into_iter()
            .flatten()
        {
            match thread.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("pipe writer failed: {}", e),
                Err(_) => warn!("pipe writer panicked"),
            }
        }
        let status = self.encoder.wait().context("waiting for ffmpeg")?;
        anyhow::ensure!(status.success(), "stream encoder exited with {status}");
        info!("stream to {} closed cleanly", self.url);
        Ok(())
    }
}
