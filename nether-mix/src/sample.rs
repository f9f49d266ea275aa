//! Sound sample storage
//!
//! Samples are decoded elsewhere and handed over as raw PCM bytes; this
//! module validates them, converts to the mixer's native interleaved i16,
//! and stores them in a handle table. Handles start at 1 and are never
//! reused, so 0 doubles as the universal "no sound" value.

use tracing::{debug, warn};

/// Source sample rate assumed when a load declares none.
pub const DEFAULT_SOURCE_RATE: u32 = 11_025;

/// Handle to a loaded sound sample. Index 0 is reserved as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SoundHandle(pub u32);

impl SoundHandle {
    /// The "no sound" handle.
    pub const INVALID: SoundHandle = SoundHandle(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

/// A loaded sample: interleaved i16 PCM plus playback metadata.
#[derive(Debug, Clone)]
pub(crate) struct Sample {
    /// Interleaved PCM, `channels` samples per frame.
    pub pcm: Vec<i16>,
    /// Source rate in Hz, always >= 1.
    pub rate: u32,
    /// 1 (mono) or 2 (stereo).
    pub channels: u32,
    /// First frame of the loop region.
    pub loop_start: u32,
    /// One past the last frame of the loop region; `None` plays to the end.
    pub loop_end: Option<u32>,
}

impl Sample {
    /// Validate and convert raw PCM bytes.
    ///
    /// Accepts 8-bit unsigned or 16-bit signed little-endian input, mono or
    /// stereo. Trailing bytes that do not fill a whole frame are dropped.
    /// Returns `None` (leaving no state behind) for anything else.
    pub fn from_raw(
        data: &[u8],
        frequency: u32,
        channels: u32,
        bits: u32,
        loop_start: i32,
        loop_end: i32,
    ) -> Option<Sample> {
        if data.is_empty() {
            warn!("sample load rejected: empty data");
            return None;
        }
        if channels != 1 && channels != 2 {
            warn!("sample load rejected: unsupported channel count {}", channels);
            return None;
        }
        let bytes_per_sample = match bits {
            8 => 1,
            16 => 2,
            _ => {
                warn!("sample load rejected: unsupported bit depth {}", bits);
                return None;
            }
        };

        let in_samples = data.len() / bytes_per_sample;
        let frames = in_samples / channels as usize;
        if frames == 0 {
            warn!(
                "sample load rejected: {} bytes is less than one {}-bit {}-channel frame",
                data.len(),
                bits,
                channels
            );
            return None;
        }

        let kept = frames * channels as usize;
        let pcm: Vec<i16> = if bits == 8 {
            // 8-bit input is unsigned; recenter and widen.
            data[..kept].iter().map(|&v| ((v as i32 - 128) << 8) as i16).collect()
        } else {
            data.chunks_exact(2)
                .take(kept)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect()
        };

        if frames > u16::MAX as usize {
            // Playback positions are 16.16 fixed point; the integer field
            // wraps past 65535 frames.
            warn!(
                "sample is {} frames long; positions wrap past {} frames",
                frames,
                u16::MAX
            );
        }

        Some(Sample {
            pcm,
            rate: if frequency > 0 { frequency } else { DEFAULT_SOURCE_RATE },
            channels,
            loop_start: loop_start.max(0) as u32,
            loop_end: (loop_end >= 0).then_some(loop_end as u32),
        })
    }

    /// Length in frames.
    pub fn frames(&self) -> u32 {
        (self.pcm.len() / self.channels as usize) as u32
    }

    /// Length in milliseconds at the sample's own rate.
    pub fn ms_length(&self) -> u32 {
        (u64::from(self.frames()) * 1000 / u64::from(self.rate.max(1))) as u32
    }
}

/// Handle table for loaded samples. Index 0 is unused so that handle values
/// map directly to indices.
pub(crate) struct SampleBank {
    samples: Vec<Option<Sample>>,
    next_handle: u32,
}

impl SampleBank {
    pub fn new() -> Self {
        Self {
            samples: vec![None],
            next_handle: 1,
        }
    }

    /// Store a sample and return its new handle.
    pub fn insert(&mut self, sample: Sample) -> SoundHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        if handle as usize >= self.samples.len() {
            self.samples.resize_with(handle as usize + 1, || None);
        }
        debug!(
            "loaded sample {} ({} frames, {} Hz, {}ch)",
            handle,
            sample.frames(),
            sample.rate,
            sample.channels
        );
        self.samples[handle as usize] = Some(sample);
        SoundHandle(handle)
    }

    /// Remove a sample; the handle value is never reissued.
    pub fn remove(&mut self, handle: SoundHandle) -> Option<Sample> {
        self.samples
            .get_mut(handle.0 as usize)
            .and_then(|slot| slot.take())
    }

    pub fn get(&self, handle: SoundHandle) -> Option<&Sample> {
        self.samples.get(handle.0 as usize).and_then(|s| s.as_ref())
    }
}
