// Local system-audio capture.
//
// A background producer pulls decoded PCM from a host capture device and
// parks it in a small queue; the session drains that queue into the mixer
// whenever the capture task signals that new frames are available. The
// device itself is behind the `CaptureBackend` trait — platform bridges
// and test drivers plug in there.

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::frame::InputAudioFrame;

/// Host capture device abstraction.
///
/// Implementations decode on their own schedule and deliver frames whose
/// `pts_ms` counts milliseconds since the capture stream started.
#[async_trait::async_trait]
pub trait CaptureBackend: Send {
    /// Begin capturing; frames arrive on the returned channel.
    async fn start(&mut self) -> Result<mpsc::Receiver<InputAudioFrame>>;

    /// Stop capturing and release the device.
    async fn stop(&mut self) -> Result<()>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Backend fed by an in-process channel. Used by tests and by embedders
/// that already own a decoded PCM stream.
pub struct ChannelBackend {
    rx: Option<mpsc::Receiver<InputAudioFrame>>,
}

impl ChannelBackend {
    pub fn new(rx: mpsc::Receiver<InputAudioFrame>) -> Self {
        Self { rx: Some(rx) }
    }
}

#[async_trait::async_trait]
impl CaptureBackend for ChannelBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<InputAudioFrame>> {
        self.rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("channel backend already started"))
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Capture source: queue plus lifecycle around a [`CaptureBackend`].
///
/// `notify` carries the edge trigger: one unit is sent whenever frames
/// become available, prompting the session to drain.
pub struct CaptureSource {
    backend: Box<dyn CaptureBackend>,
    queue: Arc<Mutex<VecDeque<InputAudioFrame>>>,
    running: Arc<AtomicBool>,
    /// Global time (seconds) at which the capture stream started.
    initial_ts: f64,
    notify: mpsc::Sender<()>,
    pump: Option<JoinHandle<()>>,
}

impl CaptureSource {
    /// `notify` fires whenever new frames are queued.
    pub fn new(backend: Box<dyn CaptureBackend>, notify: mpsc::Sender<()>) -> Self {
        Self {
            backend,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            running: Arc::new(AtomicBool::new(false)),
            initial_ts: 0.0,
            notify,
            pump: None,
        }
    }

    /// Begin capturing. `initial_ts` is the stream's global start time in
    /// seconds; queued frame pts count milliseconds from that instant.
    pub async fn start(&mut self, initial_ts: f64) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            warn!("capture already running");
            return Ok(());
        }
        self.initial_ts = initial_ts;
        info!("starting capture backend: {}", self.backend.name());
        let mut rx = self.backend.start().await?;
        self.running.store(true, Ordering::SeqCst);

        let queue = Arc::clone(&self.queue);
        let running = Arc::clone(&self.running);
        let notify = self.notify.clone();
        self.pump = Some(tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                {
                    let mut queue = queue.lock().expect("capture queue poisoned");
                    queue.push_back(frame);
                }
                // Edge trigger; a full channel means a drain is already due.
                let _ = notify.try_send(());
            }
            info!("capture pump finished");
        }));
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.stop().await?;
        if let Some(pump) = self.pump.take() {
            pump.abort();
            let _ = pump.await;
        }
        info!("capture stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn has_next(&self) -> bool {
        !self.queue.lock().expect("capture queue poisoned").is_empty()
    }

    /// Pop the oldest queued frame, if any.
    pub fn next(&self) -> Option<InputAudioFrame> {
        self.queue
            .lock()
            .expect("capture queue poisoned")
            .pop_front()
    }

    /// Global time (seconds) of the capture stream's first sample.
    pub fn initial_ts(&self) -> f64 {
        self.initial_ts
    }
}
