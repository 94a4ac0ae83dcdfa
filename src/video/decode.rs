// Screencast payload decoding: base64 PNG in, YUV 4:2:0 planes out.
//
// Conversion uses BT.709 studio-range coefficients, matching what the
// downstream H.264 encode expects for screen content. Odd dimensions are
// trimmed to even so the chroma planes subsample cleanly.

use anyhow::{bail, Context, Result};
use base64::Engine;
use std::io::Cursor;

use super::frame::{PixelPlanes, VideoFrame};

/// Decode one screencast message payload into a video frame.
///
/// `payload` is a base64-encoded PNG; `pts_ms` is the already-rebased global
/// presentation time.
pub fn decode_screencast(payload: &str, pts_ms: i64) -> Result<VideoFrame> {
    let png_bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .context("screencast payload is not valid base64")?;
    let (rgb, width, height) = decode_png_rgb(&png_bytes)?;
    let planes = rgb_to_yuv420(&rgb, width, height);
    Ok(VideoFrame::new(pts_ms, width, height, planes))
}

/// Decode a PNG blob to packed RGB24, trimmed to even dimensions.
fn decode_png_rgb(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info().context("failed to parse PNG header")?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .context("failed to decode PNG image data")?;
    buf.truncate(info.buffer_size());

    let (in_w, in_h) = (info.width as usize, info.height as usize);
    let samples = match info.color_type {
        png::ColorType::Rgb => 3,
        png::ColorType::Rgba => 4,
        png::ColorType::Grayscale => 1,
        png::ColorType::GrayscaleAlpha => 2,
        png::ColorType::Indexed => bail!("indexed PNG not expanded by decoder"),
    };

    // Chroma subsampling needs even dimensions; drop a trailing row/column.
    let out_w = in_w & !1;
    let out_h = in_h & !1;
    if out_w == 0 || out_h == 0 {
        bail!("screencast image too small: {in_w}x{in_h}");
    }

    let mut rgb = Vec::with_capacity(out_w * out_h * 3);
    for row in 0..out_h {
        let line = &buf[row * in_w * samples..];
        for col in 0..out_w {
            let px = &line[col * samples..col * samples + samples];
            match samples {
                3 | 4 => rgb.extend_from_slice(&px[..3]),
                _ => rgb.extend_from_slice(&[px[0], px[0], px[0]]),
            }
        }
    }
    Ok((rgb, out_w as u32, out_h as u32))
}

/// Packed RGB24 to planar YUV 4:2:0, BT.709 studio range.
///
/// Chroma is averaged over each 2x2 block.
fn rgb_to_yuv420(rgb: &[u8], width: u32, height: u32) -> PixelPlanes {
    let (w, h) = (width as usize, height as usize);
    let mut y_plane = vec![0u8; w * h];
    let mut u_plane = vec![0u8; (w / 2) * (h / 2)];
    let mut v_plane = vec![0u8; (w / 2) * (h / 2)];

    for row in 0..h {
        for col in 0..w {
            let px = &rgb[(row * w + col) * 3..(row * w + col) * 3 + 3];
            let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
            let y = 16.0 + 0.1826 * r + 0.6142 * g + 0.0620 * b;
            y_plane[row * w + col] = y.round().clamp(0.0, 255.0) as u8;
        }
    }

    let uv_w = w / 2;
    for row in (0..h).step_by(2) {
        for col in (0..w).step_by(2) {
            let mut sum_r = 0.0f32;
            let mut sum_g = 0.0f32;
            let mut sum_b = 0.0f32;
            for dy in 0..2 {
                for dx in 0..2 {
                    let idx = ((row + dy) * w + col + dx) * 3;
                    sum_r += rgb[idx] as f32;
                    sum_g += rgb[idx + 1] as f32;
                    sum_b += rgb[idx + 2] as f32;
                }
            }
            let (r, g, b) = (sum_r / 4.0, sum_g / 4.0, sum_b / 4.0);
            let u = 128.0 - 0.1006 * r - 0.3386 * g + 0.4392 * b;
            let v = 128.0 + 0.4392 * r - 0.3989 * g - 0.0403 * b;
            let idx = (row / 2) * uv_w + col / 2;
            u_plane[idx] = u.round().clamp(0.0, 255.0) as u8;
            v_plane[idx] = v.round().clamp(0.0, 255.0) as u8;
        }
    }

    PixelPlanes {
        y: y_plane,
        u: u_plane,
        v: v_plane,
    }
}
