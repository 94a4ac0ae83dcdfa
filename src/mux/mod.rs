// Archive output boundary.
//
// The mixing core hands over a strictly ordered interleaved stream; what
// happens to it — a local container file or a live RTMP publish — hides
// behind one trait.

pub mod file;
pub mod stream;
pub mod y4m;

use anyhow::Result;
use std::path::Path;

use crate::audio::{AudioFormat, OutputAudioFrame};
use crate::video::VideoFrame;

pub use file::FileOutput;
pub use stream::StreamOutput;

/// Sink for the merged archive stream. Writers are called from the session
/// task in presentation order; `finish` consumes the sink and flushes.
pub trait ArchiveOutput: Send {
    fn write_video(&mut self, frame: &VideoFrame) -> Result<()>;
    fn write_audio(&mut self, frame: &OutputAudioFrame) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Pick the output mode from the target string: anything starting with
/// `rtmp` streams, everything else is a file path.
pub fn open_output(
    target: &str,
    width: u32,
    height: u32,
    fps: u32,
    format: AudioFormat,
) -> Result<Box<dyn ArchiveOutput>> {
    if target.starts_with("rtmp") {
        Ok(Box::new(StreamOutput::spawn(
            target, width, height, fps, format,
        )?))
    } else {
        Ok(Box::new(FileOutput::create(
            Path::new(target),
            width,
            height,
            fps,
            format,
        )?))
    }
}
