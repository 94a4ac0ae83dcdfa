// Sample FIFO + frame-size converter.
//
// The mixer upstream emits 1-ms slivers; the encoder downstream wants
// codec-sized frames (1024 samples for AAC). This stage buffers samples per
// channel and re-slices them, restamping output pts in stream units so the
// muxer rescales exactly once.

use std::collections::VecDeque;
use tracing::warn;

use super::frame::{AudioFormat, MixedFrame, OutputAudioFrame};
use crate::error::MixError;

/// Converter configuration, mirroring the encoder's requirements.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub format: AudioFormat,
    /// Samples per output frame (encoder frame size).
    pub frame_size: usize,
    /// Stream-time offset (seconds) added to every output pts.
    pub pts_offset: f64,
}

/// Accumulates mixed 1-ms frames and emits fixed-size output frames.
pub struct FrameConverter {
    config: ConverterConfig,
    /// One FIFO per channel.
    fifos: Vec<VecDeque<f32>>,
    /// Frames emitted so far; output pts advances by `frame_size` per frame.
    frames_emitted: i64,
    /// Most recent input pts, for the non-decreasing check.
    last_pts_in: Option<i64>,
}

impl FrameConverter {
    pub fn new(config: ConverterConfig) -> Self {
        let channels = config.format.channels as usize;
        let capacity = config.frame_size * 4;
        Self {
            config,
            fifos: (0..channels)
                .map(|_| VecDeque::with_capacity(capacity))
                .collect(),
            frames_emitted: 0,
            last_pts_in: None,
        }
    }

    /// Append one mixed frame's samples to the FIFO.
    ///
    /// The incoming pts only feeds a monotonicity check; output timing is
    /// derived purely from the sample count.
    pub fn consume(&mut self, frame: &MixedFrame) -> Result<(), MixError> {
        if frame.format != self.config.format {
            return Err(MixError::InvalidFormat(format!(
                "expected {}, got {}",
                self.config.format, frame.format
            )));
        }
        if let Some(last) = self.last_pts_in {
            if frame.pts_ms < last {
                warn!(
                    "converter input pts regressed: {} after {}",
                    frame.pts_ms, last
                );
            }
        }
        self.last_pts_in = Some(frame.pts_ms);

        for (fifo, plane) in self.fifos.iter_mut().zip(&frame.planes) {
            fifo.extend(plane.iter().copied());
        }
        Ok(())
    }

    /// Pop one output frame, or `None` while fewer than `frame_size`
    /// samples are buffered.
    pub fn next(&mut self) -> Option<OutputAudioFrame> {
        let frame_size = self.config.frame_size;
        if self.fifos.first().map(|f| f.len()).unwrap_or(0) < frame_size {
            return None;
        }
        let planes: Vec<Vec<f32>> = self
            .fifos
            .iter_mut()
            .map(|fifo| fifo.drain(..frame_size).collect())
            .collect();
        let offset = (self.config.pts_offset * self.config.format.sample_rate as f64) as i64;
        let pts_stream = offset + self.frames_emitted * frame_size as i64;
        self.frames_emitted += 1;
        Some(OutputAudioFrame {
            pts_stream,
            format: self.config.format,
            planes,
        })
    }

    /// Samples currently buffered per channel.
    pub fn buffered(&self) -> usize {
        self.fifos.first().map(|f| f.len()).unwrap_or(0)
    }

    pub fn frame_size(&self) -> usize {
        self.config.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: AudioFormat = AudioFormat {
        sample_rate: 48_000,
        channels: 1,
    };

    fn converter(frame_size: usize) -> FrameConverter {
        FrameConverter::new(ConverterConfig {
            format: FORMAT,
            frame_size,
            pts_offset: 0.0,
        })
    }

    fn mixed(pts_ms: i64, value: f32) -> MixedFrame {
        MixedFrame {
            pts_ms,
            format: FORMAT,
            planes: vec![vec![value; FORMAT.samples_per_ms()]],
        }
    }

    #[test]
    fn holds_output_until_a_full_frame_is_buffered() {
        // 20 ms at 48kHz = 960 samples, short of a 1024-sample frame.
        let mut conv = converter(1024);
        for ms in 0..20 {
            conv.consume(&mixed(ms, 0.5)).unwrap();
        }
        assert!(conv.next().is_none());
        assert_eq!(conv.buffered(), 960);

        // Two more milliseconds push it over the edge.
        conv.consume(&mixed(20, 0.5)).unwrap();
        conv.consume(&mixed(21, 0.5)).unwrap();
        let frame = conv.next().unwrap();
        assert_eq!(frame.sample_count(), 1024);
        assert_eq!(frame.pts_stream, 0);
        assert!(conv.next().is_none());
    }

    #[test]
    fn output_pts_advances_by_exactly_frame_size() {
        let mut conv = converter(256);
        // 64 ms = 3072 samples = 12 frames of 256.
        for ms in 0..64 {
            conv.consume(&mixed(ms, 0.1)).unwrap();
        }
        let mut expected_pts = 0;
        let mut frames = 0;
        while let Some(frame) = conv.next() {
            assert_eq!(frame.pts_stream, expected_pts);
            expected_pts += 256;
            frames += 1;
        }
        assert_eq!(frames, 12);
        assert_eq!(conv.buffered(), 0);
    }

    #[test]
    fn rejects_mismatched_input_format() {
        let mut conv = converter(1024);
        let bad = MixedFrame::silence(0, AudioFormat::new(48_000, 2));
        assert!(matches!(
            conv.consume(&bad),
            Err(MixError::InvalidFormat(_))
        ));
    }

    #[test]
    fn pts_offset_shifts_stream_time() {
        let mut conv = FrameConverter::new(ConverterConfig {
            format: FORMAT,
            frame_size: 48,
            pts_offset: 1.0,
        });
        conv.consume(&mixed(0, 0.0)).unwrap();
        let frame = conv.next().unwrap();
        assert_eq!(frame.pts_stream, 48_000);
    }
}
