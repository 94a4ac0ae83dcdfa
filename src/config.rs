use anyhow::{ensure, Result};
use serde::Deserialize;

use crate::audio::AudioFormat;

/// Top-level configuration, loadable from a layered config file.
/// Every field has a default so the binary runs with no file at all.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub video: VideoConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Socket path prefix: endpoints live at /tmp/<prefix>-screencast
    /// and /tmp/<prefix>-blobsink.
    pub endpoint_prefix: String,
    /// Control loop exits after this many consecutive idle 10ms cycles.
    pub idle_quiet_cycles: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output sample rate in Hz; must be divisible by 1000.
    pub sample_rate: u32,
    /// Output channel count.
    pub channels: u16,
    /// Samples per encoder frame (1024 for AAC).
    pub frame_size: usize,
    /// Milliseconds of mixed audio held back to absorb late arrivals.
    pub min_buffer_ms: u64,
    /// Compensation for the subscriber capture pipeline's delay, subtracted
    /// from each source's start offset. System-dependent; measured, not
    /// guessed, hence the conservative default.
    pub capture_delay_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Constant output frame rate in Hz.
    pub fps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            audio: AudioConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint_prefix: "castmix".to_string(),
            idle_quiet_cycles: 1000,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 1,
            frame_size: 1024,
            min_buffer_ms: 2000,
            capture_delay_ms: 0,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self { fps: 30 }
    }
}

impl Config {
    /// Load from a config file, or fall back to defaults when `path` is None.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let settings = config::Config::builder()
                    .add_source(config::File::with_name(path))
                    .build()?;
                settings.try_deserialize()?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.audio.sample_rate % 1000 == 0,
            "audio.sample_rate {} is not divisible by 1000 (mixer slots are 1ms)",
            self.audio.sample_rate
        );
        ensure!(self.audio.channels > 0, "audio.channels must be positive");
        ensure!(
            self.audio.frame_size > 0,
            "audio.frame_size must be positive"
        );
        ensure!(self.video.fps > 0, "video.fps must be positive");
        Ok(())
    }

    /// The output audio format every pipeline stage agrees on.
    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::new(self.audio.sample_rate, self.audio.channels)
    }
}
