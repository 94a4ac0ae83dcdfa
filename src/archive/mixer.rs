// Archive mixer: the session's single mixing authority.
//
// Owns the audio pipeline (per-subscriber growing-file sources -> slot
// mixer -> frame converter), the constant-rate video buffer, and the two
// ordered output queues. A merge step pops whichever queue's head is
// earlier in real time, producing one strictly ordered interleaved stream
// for the muxer. All methods run on the owner task; there is no internal
// locking.

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::audio::{
    CaptureSource, ConverterConfig, FrameConverter, GrowingFileSource, InputAudioFrame,
    OutputAudioFrame, SlotMixer,
};
use crate::config::Config;
use crate::video::{FrameBuffer, VideoFrame};

use super::stats::ArchiveStats;

/// A frame popped from the merged archive stream.
#[derive(Debug, Clone)]
pub enum MediaFrame {
    Video(VideoFrame),
    Audio(OutputAudioFrame),
}

impl MediaFrame {
    /// Presentation time in global milliseconds, for ordering assertions.
    pub fn pts_ms(&self) -> i64 {
        match self {
            MediaFrame::Video(frame) => frame.pts_ms,
            MediaFrame::Audio(frame) => frame.pts_ms(),
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, MediaFrame::Audio(_))
    }
}

/// Multi-format mixer generating archive media from screencast images and
/// per-subscriber growing audio files.
pub struct ArchiveMixer {
    /// Global time (seconds) of the session's first video frame.
    initial_timestamp: f64,
    min_buffer_ms: u64,
    capture_delay_ms: i64,
    sample_rate: u32,

    audio_mixer: SlotMixer,
    converter: FrameConverter,
    video_buffer: FrameBuffer,
    /// subscriber_id -> source, one per remote participant.
    sources: HashMap<String, GrowingFileSource>,

    /// Ordered output queues; keys are pts_ms (video) / pts_stream (audio).
    video_queue: BTreeMap<i64, VideoFrame>,
    audio_queue: BTreeMap<i64, OutputAudioFrame>,

    stats: ArchiveStats,
}

impl ArchiveMixer {
    /// `initial_timestamp` is the producer timestamp (seconds) of the first
    /// video frame; it pins global time zero.
    pub fn new(config: &Config, initial_timestamp: f64) -> Self {
        info!(
            "archive mixer created: t0={:.3}s, {} @ {}fps, frame_size {}",
            initial_timestamp,
            config.audio_format(),
            config.video.fps,
            config.audio.frame_size
        );
        Self {
            initial_timestamp,
            min_buffer_ms: config.audio.min_buffer_ms,
            capture_delay_ms: config.audio.capture_delay_ms,
            sample_rate: config.audio.sample_rate,
            audio_mixer: SlotMixer::new(),
            converter: FrameConverter::new(ConverterConfig {
                format: config.audio_format(),
                frame_size: config.audio.frame_size,
                pts_offset: 0.0,
            }),
            video_buffer: FrameBuffer::new(config.video.fps),
            sources: HashMap::new(),
            video_queue: BTreeMap::new(),
            audio_queue: BTreeMap::new(),
            stats: ArchiveStats::default(),
        }
    }

    pub fn initial_timestamp(&self) -> f64 {
        self.initial_timestamp
    }

    /// Rebase a producer timestamp (seconds) onto the global ms timeline.
    fn to_global_ms(&self, timestamp: f64) -> i64 {
        ((timestamp - self.initial_timestamp) * 1000.0).round() as i64
    }

    /// Feed one screencast frame through the constant-rate buffer into the
    /// video queue.
    pub fn consume_video(&mut self, frame: VideoFrame, timestamp: f64) {
        let pts_ms = self.to_global_ms(timestamp);
        self.stats.video_frames_in += 1;
        self.video_buffer.consume(frame.restamped(pts_ms));
        while let Some(resampled) = self.video_buffer.next() {
            self.video_queue.insert(resampled.pts_ms, resampled);
        }
    }

    /// Pull every decodable frame from a subscriber's file into the mix,
    /// then move whatever exceeds the buffering window out to the audio
    /// queue.
    ///
    /// The source is created on first sight of `subscriber_id`; an open
    /// failure is logged and NOT cached, so the next message retries.
    pub fn consume_audio(&mut self, file_path: &str, timestamp: f64, subscriber_id: &str) {
        if !self.sources.contains_key(subscriber_id) {
            // The file's sample zero corresponds to the message timestamp,
            // shifted by the configured capture pipeline delay.
            let source_start_ms = self.to_global_ms(timestamp) - self.capture_delay_ms;
            match GrowingFileSource::open(file_path, source_start_ms) {
                Ok(source) => {
                    info!(
                        "subscriber {} attached: {} (offset {}ms)",
                        subscriber_id, file_path, source_start_ms
                    );
                    self.sources.insert(subscriber_id.to_string(), source);
                }
                Err(e) => {
                    self.stats.source_open_failures += 1;
                    warn!("unable to open source for {}: {}", subscriber_id, e);
                    return;
                }
            }
        }
        let source = self
            .sources
            .get_mut(subscriber_id)
            .expect("source inserted above");

        loop {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    self.stats.audio_frames_in += 1;
                    if let Err(e) = self.audio_mixer.consume(&frame) {
                        warn!("mixer rejected frame from {}: {}", subscriber_id, e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    self.stats.decode_failures += 1;
                    warn!("{}: {}", subscriber_id, e);
                    break;
                }
            }
        }

        self.drain_mixed();
    }

    /// Mix one already-decoded frame (local capture path).
    pub fn consume_capture_frame(&mut self, frame: InputAudioFrame) {
        self.stats.audio_frames_in += 1;
        if let Err(e) = self.audio_mixer.consume(&frame) {
            warn!("mixer rejected capture frame: {}", e);
        }
    }

    /// Pull everything queued by the capture source into the mix and move
    /// ready audio out to the queue.
    pub fn drain_capture(&mut self, capture: &CaptureSource) {
        let offset_ms =
            ((capture.initial_ts() - self.initial_timestamp) * 1000.0).round() as i64;
        while let Some(mut frame) = capture.next() {
            frame.pts_ms += offset_ms;
            self.consume_capture_frame(frame);
        }
        self.drain_mixed();
    }

    /// Move mixed audio beyond the buffering window through the converter
    /// into the audio queue.
    fn drain_mixed(&mut self) {
        while self.audio_mixer.len() as u64 > self.min_buffer_ms {
            let Some(mixed) = self.audio_mixer.next() else {
                break;
            };
            if let Err(e) = self.converter.consume(&mixed) {
                warn!("converter rejected mixed frame: {}", e);
            }
        }
        self.drain_converter();
    }

    fn drain_converter(&mut self) {
        while let Some(frame) = self.converter.next() {
            self.audio_queue.insert(frame.pts_stream, frame);
        }
    }

    /// Flush everything still buffered inside the mixer, ignoring the
    /// buffering window. Called once on interrupt; converter residue short
    /// of one output frame is dropped.
    pub fn flush(&mut self) {
        while let Some(mixed) = self.audio_mixer.next() {
            if let Err(e) = self.converter.consume(&mixed) {
                warn!("converter rejected mixed frame during flush: {}", e);
            }
        }
        self.drain_converter();
        let residue = self.converter.buffered();
        if residue > 0 {
            debug!(
                "dropping {} buffered samples short of a full output frame",
                residue
            );
        }
        info!(
            "archive flushed: {} audio / {} video frames queued",
            self.audio_queue.len(),
            self.video_queue.len()
        );
    }

    /// Cross-stream readiness gate: only when both queues hold data can the
    /// merge decide which side is earlier.
    pub fn has_next(&self) -> bool {
        !self.audio_queue.is_empty() && !self.video_queue.is_empty()
    }

    /// True while anything at all is queued (drain-after-interrupt path).
    pub fn has_queued(&self) -> bool {
        !self.audio_queue.is_empty() || !self.video_queue.is_empty()
    }

    /// Pop the earlier of the two queue heads.
    ///
    /// Audio pts are in stream samples, video pts in milliseconds; both are
    /// rescaled to a common unit by cross-multiplication before comparing.
    /// Audio wins ties. With `drain` set, a single-sided queue is served
    /// instead of gating on both (post-interrupt flush).
    pub fn next(&mut self, drain: bool) -> Option<MediaFrame> {
        let audio_head = self.audio_queue.keys().next().copied();
        let video_head = self.video_queue.keys().next().copied();

        let pop_audio = match (audio_head, video_head) {
            (Some(audio_pts), Some(video_pts)) => {
                audio_pts * 1000 <= video_pts * self.sample_rate as i64
            }
            (Some(_), None) if drain => true,
            (None, Some(_)) if drain => false,
            _ => return None,
        };

        if pop_audio {
            let (_, frame) = self.audio_queue.pop_first()?;
            self.stats.audio_frames_out += 1;
            Some(MediaFrame::Audio(frame))
        } else {
            let (_, frame) = self.video_queue.pop_first()?;
            self.stats.video_frames_out += 1;
            Some(MediaFrame::Video(frame))
        }
    }

    /// Frames currently sitting in both queues.
    pub fn queued_len(&self) -> usize {
        self.audio_queue.len() + self.video_queue.len()
    }

    /// Session accounting, folding in the counters owned by the inner
    /// components.
    pub fn stats(&self) -> ArchiveStats {
        let mut stats = self.stats.clone();
        stats.clip_events = self.audio_mixer.clip_events();
        stats.late_arrivals = self.audio_mixer.late_arrivals();
        stats.format_mismatches = self.audio_mixer.format_mismatches();
        stats.decode_failures += self
            .sources
            .iter()
            .map(|(_, s)| s.decode_failures())
            .sum::<u64>();
        stats
    }

    /// Test/introspection access to the subscriber table size.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}
