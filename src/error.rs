use thiserror::Error;

/// Recoverable error kinds raised by the mixing core.
///
/// Everything here is survivable: the offending frame is dropped, a counter
/// is bumped, and the pipeline keeps running. Fatal conditions (output open
/// or write failures, allocation failure) propagate as `anyhow::Error` from
/// the session instead.
#[derive(Debug, Error)]
pub enum MixError {
    /// A frame's latched format does not match what the mixer was primed with.
    #[error("format mismatch: expected {expected}, got {got}")]
    FormatMismatch { expected: String, got: String },

    /// The converter was handed a frame that does not match its configured input.
    #[error("invalid input format for converter: {0}")]
    InvalidFormat(String),

    /// A subscriber file produced undecodable data.
    #[error("decode failed: {0}")]
    DecodeFailed(String),

    /// A subscriber file could not be opened or probed.
    #[error("failed to open audio source: {0}")]
    SourceOpenFailed(String),
}
