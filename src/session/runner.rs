// Session runner: owns the archive mixer and drives it to completion.
//
// One task receives every ingest command and also runs the 100 Hz drain
// loop, so the mixer needs no locking at all — the ordering hazards the
// callback-on-any-thread design would have had simply cannot happen here.
// Producers (transport, capture pump, signal handler) only ever touch the
// command channel and the interrupt latch.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::archive::{ArchiveMixer, ArchiveStats, MediaFrame};
use crate::audio::CaptureSource;
use crate::config::Config;
use crate::mux::{open_output, ArchiveOutput};
use crate::video::VideoFrame;

/// Everything a producer can ask of the session.
#[derive(Debug)]
pub enum Command {
    /// A decoded screencast frame with its producer timestamp (seconds).
    Video { frame: VideoFrame, timestamp: f64 },
    /// A subscriber audio notification.
    Audio {
        path: String,
        timestamp: f64,
        subscriber_id: String,
    },
    /// The capture queue has new frames; pull them into the mix.
    DrainCapture,
}

/// Bridge a capture source's data notifications onto the command channel.
pub fn forward_capture_notifications(
    mut notify: mpsc::Receiver<()>,
    commands: mpsc::Sender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while notify.recv().await.is_some() {
            if commands.send(Command::DrainCapture).await.is_err() {
                break;
            }
        }
    })
}

/// Control-loop cadence.
const TICK: Duration = Duration::from_millis(10);

pub struct Session {
    /// Unique id, for log correlation across components.
    session_id: String,
    config: Config,
    output_target: String,
    commands: Option<mpsc::Receiver<Command>>,
    interrupt: Arc<AtomicBool>,
    capture: Option<CaptureSource>,
}

impl Session {
    pub fn new(
        config: Config,
        output_target: String,
        commands: mpsc::Receiver<Command>,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            config,
            output_target,
            commands: Some(commands),
            interrupt,
            capture: None,
        }
    }

    /// Attach a local system-audio capture source.
    pub fn with_capture(mut self, capture: CaptureSource) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Run until the producers go quiet or an interrupt drains the queues.
    ///
    /// The archive mixer and the output are built lazily on the first video
    /// frame: its timestamp pins global zero and its dimensions size the
    /// video track.
    pub async fn run(mut self) -> Result<ArchiveStats> {
        let mut commands = self.commands.take().expect("session runs once");
        let mut mixer: Option<ArchiveMixer> = None;
        let mut output: Option<Box<dyn ArchiveOutput>> = None;

        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut quiet_cycles: u64 = 0;
        let mut flushed = false;
        let mut producers_done = false;

        let started_at = chrono::Utc::now();
        info!(
            "{} started, archiving to {}",
            self.session_id, self.output_target
        );
        loop {
            tokio::select! {
                command = commands.recv(), if !producers_done => {
                    match command {
                        Some(command) => {
                            if let Err(e) = self
                                .handle_command(command, &mut mixer, &mut output)
                                .await
                            {
                                warn!("command failed: {:#}", e);
                            }
                        }
                        None => {
                            info!("all producers disconnected");
                            producers_done = true;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let interrupted = self.interrupt.load(Ordering::SeqCst);
                    if interrupted && !flushed {
                        info!("interrupted; draining queued media");
                        self.stop_capture().await;
                        if let Some(mixer) = mixer.as_mut() {
                            if let Some(capture) = self.capture.as_ref() {
                                mixer.drain_capture(capture);
                            }
                            mixer.flush();
                        }
                        flushed = true;
                    }

                    let mut popped = false;
                    if let (Some(mixer), Some(output)) = (mixer.as_mut(), output.as_mut()) {
                        while let Some(frame) = mixer.next(interrupted) {
                            match &frame {
                                MediaFrame::Video(frame) => output.write_video(frame)?,
                                MediaFrame::Audio(frame) => output.write_audio(frame)?,
                            }
                            popped = true;
                        }
                    }
                    if popped {
                        quiet_cycles = 0;
                        if let Some(mixer) = mixer.as_ref() {
                            tracing::debug!(
                                "{} frames remaining in queue",
                                mixer.queued_len()
                            );
                        }
                    } else {
                        quiet_cycles += 1;
                    }

                    let has_next = mixer
                        .as_ref()
                        .map(|m| if interrupted { m.has_queued() } else { m.has_next() })
                        .unwrap_or(false);
                    let keep_running = (has_next || !interrupted)
                        && quiet_cycles < self.config.session.idle_quiet_cycles;
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        self.stop_capture().await;
        let stats = mixer.as_ref().map(|m| m.stats()).unwrap_or_default();
        if let Some(output) = output {
            output.finish().context("failed to finalize archive output")?;
        }
        let duration = chrono::Utc::now().signed_duration_since(started_at);
        info!(
            "{} complete after {:.1}s: {}",
            self.session_id,
            duration.num_milliseconds() as f64 / 1000.0,
            serde_json::to_string(&stats).unwrap_or_default()
        );
        Ok(stats)
    }

    async fn handle_command(
        &mut self,
        command: Command,
        mixer: &mut Option<ArchiveMixer>,
        output: &mut Option<Box<dyn ArchiveOutput>>,
    ) -> Result<()> {
        match command {
            Command::Video { frame, timestamp } => {
                if mixer.is_none() {
                    *output = Some(open_output(
                        &self.output_target,
                        frame.width,
                        frame.height,
                        self.config.video.fps,
                        self.config.audio_format(),
                    )?);
                    *mixer = Some(ArchiveMixer::new(&self.config, timestamp));
                    if let Some(capture) = self.capture.as_mut() {
                        if let Err(e) = capture.start(timestamp).await {
                            warn!("local capture unavailable: {:#}", e);
                        }
                    }
                }
                mixer
                    .as_mut()
                    .expect("mixer built above")
                    .consume_video(frame, timestamp);
            }
            Command::Audio {
                path,
                timestamp,
                subscriber_id,
            } => match mixer.as_mut() {
                Some(mixer) => mixer.consume_audio(&path, timestamp, &subscriber_id),
                // No video yet means no timeline to rebase onto.
                None => warn!(
                    "dropping audio for {} before first video frame",
                    subscriber_id
                ),
            },
            Command::DrainCapture => {
                if let (Some(mixer), Some(capture)) = (mixer.as_mut(), self.capture.as_ref()) {
                    mixer.drain_capture(capture);
                }
            }
        }
        Ok(())
    }

    async fn stop_capture(&mut self) {
        if let Some(capture) = self.capture.as_mut() {
            if capture.is_running() {
                if let Err(e) = capture.stop().await {
                    warn!("capture stop failed: {:#}", e);
                }
            }
        }
    }
}
