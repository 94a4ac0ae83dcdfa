// Staggered-input audio mixer.
//
// Sources with independent clocks deliver PCM frames in unpredictable order;
// this module aligns them on a common millisecond timeline. Each millisecond
// of global time owns one accumulation slot; incoming frames are sliced into
// 1-ms windows and summed into the slots they touch. Slots drain in strictly
// increasing pts order with silence synthesized for any gap, so downstream
// consumers always see a contiguous stream.

use std::collections::BTreeMap;
use tracing::debug;

use super::frame::{AudioFormat, InputAudioFrame, MixedFrame};
use crate::error::MixError;

/// One millisecond of accumulated audio.
struct MixSlot {
    /// Planar float accumulator, `samples_per_ms` samples per channel.
    planes: Vec<Vec<f32>>,
}

impl MixSlot {
    fn silent(format: AudioFormat) -> Self {
        Self {
            planes: vec![vec![0.0; format.samples_per_ms()]; format.channels as usize],
        }
    }
}

/// Multi-source audio mixer (one instance per session).
///
/// Input frames must be signed 16-bit planar PCM in the format latched from
/// the first consumed frame; a frame with any other format is rejected.
/// The caller serializes `consume`/`next` (the archive mixer invokes both
/// from a single owner task).
pub struct SlotMixer {
    /// pts_ms -> slot, ordered. Keys form a contiguous range after consume.
    slots: BTreeMap<i64, MixSlot>,
    /// Latched from the first frame; `None` until primed.
    format: Option<AudioFormat>,
    /// pts of the most recently emitted slot; `None` before the first emission.
    last_out_pts: Option<i64>,
    clip_events: u64,
    late_arrivals: u64,
    format_mismatches: u64,
}

impl SlotMixer {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            format: None,
            last_out_pts: None,
            clip_events: 0,
            late_arrivals: 0,
            format_mismatches: 0,
        }
    }

    /// Accumulate one input frame into the timeline.
    ///
    /// The frame is sliced into 1-ms windows starting at `frame.pts_ms`.
    /// Windows that land on already-emitted milliseconds are discarded and
    /// counted as late arrivals. After accumulation the slot range is
    /// re-contiguated: silence fills any hole between head and tail.
    pub fn consume(&mut self, frame: &InputAudioFrame) -> Result<(), MixError> {
        let format = match self.format {
            Some(format) => {
                if format != frame.format {
                    self.format_mismatches += 1;
                    return Err(MixError::FormatMismatch {
                        expected: format.to_string(),
                        got: frame.format.to_string(),
                    });
                }
                format
            }
            None => {
                let format = frame.format;
                self.format = Some(format);
                debug!("mixer primed with format {}", format);
                // Drain must begin at global time zero: backfill silence
                // from 0 up to the first frame's start.
                for ms in 0..frame.pts_ms.max(0) {
                    self.slots.insert(ms, MixSlot::silent(format));
                }
                format
            }
        };

        let spm = format.samples_per_ms();
        let sample_count = frame.sample_count();
        let duration_ms = (sample_count + spm - 1) / spm;

        for window in 0..duration_ms {
            let pts = frame.pts_ms + window as i64;
            if pts < 0 || self.last_out_pts.is_some_and(|last| pts <= last) {
                // This millisecond already left the mixer; its samples are gone.
                self.late_arrivals += 1;
                continue;
            }
            let slot = self
                .slots
                .entry(pts)
                .or_insert_with(|| MixSlot::silent(format));
            let start = window * spm;
            let end = (start + spm).min(sample_count);
            let mut clipped = false;
            for (channel, plane) in frame.planes.iter().enumerate() {
                let accum = &mut slot.planes[channel];
                for (j, &sample) in plane[start..end].iter().enumerate() {
                    let mixed = accum[j] + sample as f32 / 32767.0;
                    if mixed.abs() > 1.0 {
                        clipped = true;
                    }
                    accum[j] = mixed.clamp(-1.0, 1.0);
                }
            }
            if clipped {
                self.clip_events += 1;
                debug!("mixer clipped samples at {}ms", pts);
            }
        }

        self.fill_gaps(format);
        Ok(())
    }

    /// Silence-fill every missing millisecond between head and tail so the
    /// key range stays contiguous.
    fn fill_gaps(&mut self, format: AudioFormat) {
        let (Some(&head), Some(&tail)) = (self.slots.keys().next(), self.slots.keys().next_back())
        else {
            return;
        };
        let span = (tail - head + 1) as usize;
        if self.slots.len() == span {
            return;
        }
        for ms in head..=tail {
            self.slots
                .entry(ms)
                .or_insert_with(|| MixSlot::silent(format));
        }
    }

    /// Emit the next millisecond of mixed audio, or `None` when nothing is
    /// buffered.
    ///
    /// Emission is strictly sequential: if the head slot is ahead of the
    /// expected next pts, a silent frame is synthesized for the missing
    /// millisecond and the head stays put for a later call.
    pub fn next(&mut self) -> Option<MixedFrame> {
        let format = self.format?;
        let &head = self.slots.keys().next()?;
        let pts = match self.last_out_pts {
            None => head,
            Some(last) if head == last + 1 => head,
            Some(last) => {
                debug_assert!(head > last + 1, "head behind emission point");
                self.last_out_pts = Some(last + 1);
                return Some(MixedFrame::silence(last + 1, format));
            }
        };
        let slot = self.slots.remove(&pts).expect("head slot vanished");
        self.last_out_pts = Some(pts);
        Some(MixedFrame {
            pts_ms: pts,
            format,
            planes: slot.planes,
        })
    }

    /// Global pts of the oldest live slot, or 0 when empty.
    pub fn head_ts(&self) -> i64 {
        self.slots.keys().next().copied().unwrap_or(0)
    }

    /// Buffered milliseconds (one slot = one ms).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clip_events(&self) -> u64 {
        self.clip_events
    }

    pub fn late_arrivals(&self) -> u64 {
        self.late_arrivals
    }

    pub fn format_mismatches(&self) -> u64 {
        self.format_mismatches
    }
}

impl Default for SlotMixer {
    fn default() -> Self {
        Self::new()
    }
}
