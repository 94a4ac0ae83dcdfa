use std::sync::Arc;

/// Planar YUV 4:2:0 pixel data, shared between duplicated frames.
///
/// The constant-rate resampler re-emits the same image into many output
/// slots; the pixel planes are reference-counted so duplication is cheap.
#[derive(Debug)]
pub struct PixelPlanes {
    /// Luma, `width * height` bytes, stride = width.
    pub y: Vec<u8>,
    /// Chroma, `(width/2) * (height/2)` bytes each, stride = width/2.
    pub u: Vec<u8>,
    pub v: Vec<u8>,
}

/// One video frame on the archive timeline.
///
/// `pts_ms` is global milliseconds since recording start. Immutable once
/// produced by the frame buffer.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts_ms: i64,
    pub width: u32,
    pub height: u32,
    pub planes: Arc<PixelPlanes>,
}

impl VideoFrame {
    pub fn new(pts_ms: i64, width: u32, height: u32, planes: PixelPlanes) -> Self {
        Self {
            pts_ms,
            width,
            height,
            planes: Arc::new(planes),
        }
    }

    /// The same image restamped onto a different output slot.
    pub fn restamped(&self, pts_ms: i64) -> Self {
        Self {
            pts_ms,
            width: self.width,
            height: self.height,
            planes: Arc::clone(&self.planes),
        }
    }

    /// Solid mid-gray frame. Used by tests.
    #[cfg(test)]
    pub fn test_pattern(pts_ms: i64, width: u32, height: u32, luma: u8) -> Self {
        let (w, h) = (width as usize, height as usize);
        Self::new(
            pts_ms,
            width,
            height,
            PixelPlanes {
                y: vec![luma; w * h],
                u: vec![128; (w / 2) * (h / 2)],
                v: vec![128; (w / 2) * (h / 2)],
            },
        )
    }
}
