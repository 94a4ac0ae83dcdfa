pub mod capture;
pub mod converter;
pub mod frame;
pub mod mixer;
pub mod source;

pub use capture::{CaptureBackend, CaptureSource, ChannelBackend};
pub use converter::{ConverterConfig, FrameConverter};
pub use frame::{AudioFormat, InputAudioFrame, MixedFrame, OutputAudioFrame};
pub use mixer::SlotMixer;
pub use source::GrowingFileSource;
