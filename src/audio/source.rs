// Growing-file audio source.
//
// Each remote subscriber's audio lands in a file that another process keeps
// appending to. We decode it packet-by-packet; when the reader hits EOF the
// file has usually grown since we opened it, so the stream is reopened from
// scratch and packets we have already emitted are skipped by pts.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;
use tracing::{debug, info, warn};

use super::frame::{AudioFormat, InputAudioFrame};
use crate::error::MixError;

/// Decoder state for one subscriber file.
struct OpenStream {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
}

impl std::fmt::Debug for GrowingFileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrowingFileSource")
            .field("path", &self.path)
            .field("initial_timestamp_ms", &self.initial_timestamp_ms)
            .field("last_pts_read", &self.last_pts_read)
            .field("decode_failures", &self.decode_failures)
            .finish()
    }
}

/// Append-only audio file decoded into globally timestamped PCM frames.
pub struct GrowingFileSource {
    path: PathBuf,
    /// Global time of the file's first sample, in milliseconds.
    initial_timestamp_ms: i64,
    /// Container timestamp of the last packet decoded, for skip-after-reopen.
    last_pts_read: Option<u64>,
    stream: OpenStream,
    decode_failures: u64,
}

impl GrowingFileSource {
    /// Open and probe the subscriber file.
    ///
    /// `initial_timestamp_ms` is the global time corresponding to the file's
    /// sample zero; every emitted frame pts is rebased onto it.
    pub fn open(path: impl AsRef<Path>, initial_timestamp_ms: i64) -> Result<Self, MixError> {
        let path = path.as_ref().to_path_buf();
        let stream = open_stream(&path)?;
        info!(
            "audio source opened: {} (initial timestamp {}ms)",
            path.display(),
            initial_timestamp_ms
        );
        Ok(Self {
            path,
            initial_timestamp_ms,
            last_pts_read: None,
            stream,
            decode_failures: 0,
        })
    }

    pub fn initial_timestamp_ms(&self) -> i64 {
        self.initial_timestamp_ms
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Decode the next not-yet-seen frame.
    ///
    /// Returns `Ok(None)` when the file is exhausted even after one reopen
    /// attempt (the writer has not appended since we last looked). A fresh
    /// call re-enables the reopen retry.
    pub fn next_frame(&mut self) -> Result<Option<InputAudioFrame>, MixError> {
        let mut tried_reopen = false;
        loop {
            let packet = match self.stream.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    if tried_reopen {
                        return Ok(None);
                    }
                    debug!("{}: EOF, reopening grown file", self.path.display());
                    self.stream = open_stream(&self.path)?;
                    tried_reopen = true;
                    continue;
                }
                Err(SymphoniaError::ResetRequired) => {
                    if tried_reopen {
                        return Ok(None);
                    }
                    self.stream = open_stream(&self.path)?;
                    tried_reopen = true;
                    continue;
                }
                Err(e) => return Err(MixError::DecodeFailed(e.to_string())),
            };

            if packet.track_id() != self.stream.track_id {
                continue;
            }
            // After a reopen the reader starts from the top; skip everything
            // we already handed out.
            if self.last_pts_read.is_some_and(|last| packet.ts() <= last) {
                continue;
            }
            let packet_ts = packet.ts();

            match self.stream.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut interleaved =
                        SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    interleaved.copy_interleaved_ref(decoded);

                    self.last_pts_read = Some(packet_ts);
                    let file_ms = self.ts_to_ms(packet_ts);
                    let channels = spec.channels.count();
                    let frame = deinterleave(
                        interleaved.samples(),
                        AudioFormat::new(spec.rate, channels as u16),
                        file_ms + self.initial_timestamp_ms,
                    );
                    return Ok(Some(frame));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet: drop it, keep the source alive.
                    self.decode_failures += 1;
                    warn!("{}: decode error, packet dropped: {}", self.path.display(), e);
                    continue;
                }
                Err(e) => return Err(MixError::DecodeFailed(e.to_string())),
            }
        }
    }

    fn ts_to_ms(&self, ts: u64) -> i64 {
        match self.stream.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                time.seconds as i64 * 1000 + (time.frac * 1000.0) as i64
            }
            None => ts as i64,
        }
    }
}

fn open_stream(path: &Path) -> Result<OpenStream, MixError> {
    let file = File::open(path)
        .map_err(|e| MixError::SourceOpenFailed(format!("{}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| MixError::SourceOpenFailed(format!("{}: {}", path.display(), e)))?;
    let reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| {
            MixError::SourceOpenFailed(format!("{}: no decodable audio track", path.display()))
        })?;
    let track_id = track.id;
    let time_base = track.codec_params.time_base;

    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| MixError::SourceOpenFailed(format!("{}: {}", path.display(), e)))?;

    Ok(OpenStream {
        reader,
        decoder,
        track_id,
        time_base,
    })
}

fn deinterleave(samples: &[i16], format: AudioFormat, pts_ms: i64) -> InputAudioFrame {
    let channels = format.channels as usize;
    let per_channel = samples.len() / channels;
    let mut planes = vec![Vec::with_capacity(per_channel); channels];
    for chunk in samples.chunks_exact(channels) {
        for (channel, &sample) in chunk.iter().enumerate() {
            planes[channel].push(sample);
        }
    }
    InputAudioFrame {
        pts_ms,
        format,
        planes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinterleave_splits_channels() {
        let frame = deinterleave(&[1, -1, 2, -2, 3, -3], AudioFormat::new(48_000, 2), 10);
        assert_eq!(frame.pts_ms, 10);
        assert_eq!(frame.planes[0], vec![1, 2, 3]);
        assert_eq!(frame.planes[1], vec![-1, -2, -3]);
    }

    #[test]
    fn open_missing_file_is_source_open_failed() {
        let err = GrowingFileSource::open("/nonexistent/subscriber.wav", 0).unwrap_err();
        assert!(matches!(err, MixError::SourceOpenFailed(_)));
    }
}
