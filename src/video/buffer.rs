// Constant-rate video resampler.
//
// Screencast frames arrive whenever the page repaints; the archive needs a
// fixed cadence. This buffer holds the most recent input and emits one frame
// per output tick, duplicating the held image into every empty slot. No
// interpolation: screencast content is discrete UI, repetition is correct.

use std::collections::VecDeque;
use tracing::trace;

use super::frame::VideoFrame;

/// Sample-and-hold frame buffer producing one frame per `interval_ms` tick.
pub struct FrameBuffer {
    /// Output tick period Δv in milliseconds, `round(1000 / fps)`.
    interval_ms: i64,
    /// Most recently consumed input frame.
    latest: Option<VideoFrame>,
    /// pts of the next output slot to fill.
    next_emit_pts: i64,
    /// Ticks produced during consume, drained by `next`.
    ready: VecDeque<VideoFrame>,
    started: bool,
}

impl FrameBuffer {
    pub fn new(fps: u32) -> Self {
        Self {
            interval_ms: (1000.0 / fps as f64).round() as i64,
            latest: None,
            next_emit_pts: 0,
            ready: VecDeque::new(),
            started: false,
        }
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    /// Accept one input frame and fill every output tick up to its pts.
    ///
    /// Ticks that were pending before this frame arrived repeat the
    /// previously held image; the final covered tick carries the new one.
    /// The output timeline is pinned to zero regardless of the first
    /// frame's pts, matching the audio mixer's drain-from-zero behavior.
    pub fn consume(&mut self, frame: VideoFrame) {
        if !self.started {
            self.started = true;
            self.next_emit_pts = 0;
        }

        // Back-fill ticks fully covered before the new frame's pts with the
        // frame held so far (or the new one, when nothing was held yet).
        while self.next_emit_pts + self.interval_ms <= frame.pts_ms {
            let held = self.latest.as_ref().unwrap_or(&frame);
            self.ready.push_back(held.restamped(self.next_emit_pts));
            self.next_emit_pts += self.interval_ms;
        }
        // The tick at or just before the new pts shows the new image.
        if self.next_emit_pts <= frame.pts_ms {
            self.ready.push_back(frame.restamped(self.next_emit_pts));
            self.next_emit_pts += self.interval_ms;
        }
        trace!(
            "frame buffer consumed pts {}ms, next tick {}ms",
            frame.pts_ms,
            self.next_emit_pts
        );
        self.latest = Some(frame);
    }

    pub fn has_next(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn next(&mut self) -> Option<VideoFrame> {
        self.ready.pop_front()
    }
}
