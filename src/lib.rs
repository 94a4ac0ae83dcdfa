pub mod archive;
pub mod audio;
pub mod config;
pub mod error;
pub mod mux;
pub mod session;
pub mod transport;
pub mod video;

pub use archive::{ArchiveMixer, ArchiveStats, MediaFrame};
pub use audio::{
    AudioFormat, CaptureBackend, CaptureSource, ChannelBackend, FrameConverter, GrowingFileSource,
    InputAudioFrame, MixedFrame, OutputAudioFrame, SlotMixer,
};
pub use config::Config;
pub use error::MixError;
pub use mux::{open_output, ArchiveOutput};
pub use session::{forward_capture_notifications, Command, Session};
pub use transport::{Endpoints, IngestMessage};
pub use video::{decode_screencast, FrameBuffer, VideoFrame};
