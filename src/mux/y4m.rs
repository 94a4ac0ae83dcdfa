// Minimal YUV4MPEG2 track writing.
//
// Y4M is the one raw video container ffmpeg ingests without flags: a text
// header, then `FRAME\n` + packed planes per picture. Good enough to carry
// the constant-rate YUV 4:2:0 stream into the encoder, seek-free, which
// also makes it safe to write into a pipe.

use anyhow::Result;
use std::io::Write;

use crate::video::VideoFrame;

/// Stream header; call once before the first frame.
pub fn write_header<W: Write>(writer: &mut W, width: u32, height: u32, fps: u32) -> Result<()> {
    writeln!(writer, "YUV4MPEG2 W{width} H{height} F{fps}:1 Ip A1:1 C420")?;
    Ok(())
}

/// One picture: marker line plus packed Y, U, V planes.
pub fn write_frame<W: Write>(writer: &mut W, frame: &VideoFrame) -> Result<()> {
    writer.write_all(b"FRAME\n")?;
    writer.write_all(&frame.planes.y)?;
    writer.write_all(&frame.planes.u)?;
    writer.write_all(&frame.planes.v)?;
    Ok(())
}

/// Serialize one picture to bytes (pipe writer threads send these whole).
pub fn frame_bytes(frame: &VideoFrame) -> Vec<u8> {
    let planes = &frame.planes;
    let mut bytes = Vec::with_capacity(6 + planes.y.len() + planes.u.len() + planes.v.len());
    bytes.extend_from_slice(b"FRAME\n");
    bytes.extend_from_slice(&planes.y);
    bytes.extend_from_slice(&planes.u);
    bytes.extend_from_slice(&planes.v);
    bytes
}
