use serde::{Deserialize, Serialize};

/// End-of-session accounting, logged as a summary when the archive closes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveStats {
    /// Input screencast frames accepted.
    pub video_frames_in: u64,
    /// Constant-rate frames handed to the output.
    pub video_frames_out: u64,
    /// Decoded subscriber frames pushed into the mixer.
    pub audio_frames_in: u64,
    /// Codec-sized audio frames handed to the output.
    pub audio_frames_out: u64,
    /// Summed samples that hit the clip ceiling.
    pub clip_events: u64,
    /// 1-ms windows discarded because their slot was already emitted.
    pub late_arrivals: u64,
    /// Frames rejected for not matching the latched mix format.
    pub format_mismatches: u64,
    /// Corrupt packets dropped across all subscriber sources.
    pub decode_failures: u64,
    /// Subscriber files that failed to open.
    pub source_open_failures: u64,
}
