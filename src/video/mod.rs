pub mod buffer;
pub mod decode;
pub mod frame;

pub use buffer::FrameBuffer;
pub use decode::decode_screencast;
pub use frame::{PixelPlanes, VideoFrame};
