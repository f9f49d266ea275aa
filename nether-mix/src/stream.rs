//! Pull-model music streaming
//!
//! Music arrives through a caller-supplied [`PullSource`]: whenever the mix
//! pass needs more converted audio than is queued, it asks the source to fill
//! a fixed chunk of raw bytes, converts the whole chunk (width, channel, and
//! rate conversion in one go) into an interleaved stereo i16 queue, then
//! drains the queue into the output with saturating adds. Leftover converted
//! frames wait for the next pass.

use std::collections::VecDeque;

use crate::clamp16;
use crate::resample::{frame_of, step_for_rates, FRAC_BITS};

/// Minimum pull-chunk size in bytes; smaller requests are rounded up.
pub(crate) const MIN_CHUNK_BYTES: usize = 256;

/// Upper bound on converted frames produced from one chunk.
const CONVERT_FRAME_CAP: usize = 8192;

/// Consecutive failed pulls tolerated per mix pass on a looping stream
/// before giving up until the next pass.
pub(crate) const PULL_RETRY_LIMIT: u32 = 4;

/// A source of raw streamed audio, pulled from the mix thread.
///
/// `pull` must fill `buf` completely and return `true`, or return `false`
/// when no more data is available. Looping sources are expected to wrap
/// internally and keep returning `true`.
pub trait PullSource: Send {
    fn pull(&mut self, buf: &mut [u8]) -> bool;
}

impl<F> PullSource for F
where
    F: FnMut(&mut [u8]) -> bool + Send,
{
    fn pull(&mut self, buf: &mut [u8]) -> bool {
        self(buf)
    }
}

/// Sample width of the raw bytes a [`PullSource`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleWidth {
    /// Unsigned 8-bit.
    U8,
    /// Signed 16-bit, native endian.
    I16,
    /// Signed 32-bit, native endian.
    I32,
    /// 32-bit float, native endian.
    F32,
}

impl SampleWidth {
    fn bytes(self) -> usize {
        match self {
            SampleWidth::U8 => 1,
            SampleWidth::I16 => 2,
            SampleWidth::I32 => 4,
            SampleWidth::F32 => 4,
        }
    }
}

/// Layout of the raw bytes a [`PullSource`] produces.
#[derive(Debug, Clone, Copy)]
pub struct StreamFormat {
    pub width: SampleWidth,
    /// Mono input is replicated into both output channels.
    pub mono: bool,
}

/// Handle to the live music stream. Creating a new stream makes every
/// previously issued id stale; stale ids act like a silent, ended stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamId(pub(crate) u64);

/// The single live music stream.
pub(crate) struct MusicStream {
    source: Box<dyn PullSource>,
    /// Pull scratch; the source fills all of it or fails.
    chunk: Vec<u8>,
    format: StreamFormat,
    /// Declared source rate; 0 means "already at output rate".
    source_rate: u32,
    looping: bool,
    paused: bool,
    ended: bool,
    volume: f32,
    /// Output frames delivered so far.
    position: u64,
    /// Converted, not yet drained, interleaved stereo samples.
    queue: VecDeque<i16>,
}

impl MusicStream {
    pub fn new(
        source: Box<dyn PullSource>,
        chunk_bytes: usize,
        format: StreamFormat,
        source_rate: u32,
    ) -> Self {
        Self {
            source,
            chunk: vec![0; chunk_bytes.max(MIN_CHUNK_BYTES)],
            format,
            source_rate,
            looping: false,
            paused: false,
            ended: false,
            volume: 1.0,
            position: 0,
            queue: VecDeque::new(),
        }
    }

    pub fn play(&mut self, looping: bool, volume: f32) -> bool {
        self.looping = looping;
        self.volume = volume;
        self.paused = false;
        self.ended = false;
        true
    }

    pub fn stop(&mut self) {
        self.ended = true;
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    pub fn set_paused(&mut self, paused: bool) -> bool {
        self.paused = paused;
        true
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn stats(&self) -> String {
        format!(
            "stream: pos={} ended={} paused={}",
            self.position, self.ended as u8, self.paused as u8
        )
    }

    /// Pull, convert and add up to `out.len() / 2` frames into `out`.
    ///
    /// Never blocks: a non-looping source that fails to deliver marks the
    /// stream ended; a looping one gets a few retries this pass and is left
    /// alone until the next.
    pub fn mix_into(&mut self, out: &mut [i16], out_rate: u32) {
        let frames = out.len() / 2;
        if self.ended || self.paused || frames == 0 {
            return;
        }

        let mut failures = 0u32;
        while self.queue.len() < frames * 2 && !self.ended {
            if !self.source.pull(&mut self.chunk) {
                if self.looping {
                    failures += 1;
                    if failures >= PULL_RETRY_LIMIT {
                        break;
                    }
                    continue;
                }
                self.ended = true;
                break;
            }
            failures = 0;
            self.convert_chunk(out_rate);
        }

        let vol = self.volume.max(0.0);
        for i in 0..frames {
            if self.queue.len() < 2 {
                break;
            }
            let Some(l) = self.queue.pop_front() else { break };
            let Some(r) = self.queue.pop_front() else { break };
            let idx = i * 2;
            // Volume is stored raw, so the scaled sample can saturate the
            // cast at i32::MAX; the accumulate must not wrap on top of it.
            out[idx] = clamp16((out[idx] as i32).saturating_add((l as f32 * vol) as i32));
            out[idx + 1] = clamp16((out[idx + 1] as i32).saturating_add((r as f32 * vol) as i32));
            self.position += 1;
        }
    }

    /// Convert the whole chunk into queued stereo frames.
    fn convert_chunk(&mut self, out_rate: u32) {
        let Self { chunk, queue, format, .. } = self;
        let in_channels: usize = if format.mono { 1 } else { 2 };
        let in_rate = if self.source_rate > 0 { self.source_rate } else { out_rate };

        let in_samples = chunk.len() / format.width.bytes();
        let in_frames = in_samples / in_channels;
        if in_frames == 0 {
            return;
        }

        let step = step_for_rates(in_rate, out_rate).max(1);
        let max_out = ((in_frames as u64) << FRAC_BITS).div_ceil(u64::from(step));
        let max_out = (max_out as usize).min(CONVERT_FRAME_CAP);

        let mut pos: u32 = 0;
        for _ in 0..max_out {
            let f = frame_of(pos) as usize;
            if f >= in_frames {
                break;
            }
            let l = read_sample(chunk, format.width, f * in_channels, in_samples);
            let r = if in_channels == 2 {
                read_sample(chunk, format.width, f * in_channels + 1, in_samples)
            } else {
                l
            };
            queue.push_back(clamp16((l * 32767.0) as i32));
            queue.push_back(clamp16((r * 32767.0) as i32));
            pos = pos.wrapping_add(step);
        }
    }
}

/// Read one sample from raw chunk bytes, normalized to roughly [-1, 1].
/// The index is clamped into bounds, so a short final frame repeats the
/// last sample instead of reading past the buffer.
fn read_sample(chunk: &[u8], width: SampleWidth, idx: usize, in_samples: usize) -> f32 {
    let idx = idx.min(in_samples.saturating_sub(1));
    match width {
        SampleWidth::U8 => (chunk[idx] as i32 - 128) as f32 / 128.0,
        SampleWidth::I16 => {
            let b = idx * 2;
            i16::from_ne_bytes([chunk[b], chunk[b + 1]]) as f32 / 32768.0
        }
        SampleWidth::I32 => {
            let b = idx * 4;
            i32::from_ne_bytes([chunk[b], chunk[b + 1], chunk[b + 2], chunk[b + 3]]) as f32
                / 2_147_483_648.0
        }
        SampleWidth::F32 => {
            let b = idx * 4;
            f32::from_ne_bytes([chunk[b], chunk[b + 1], chunk[b + 2], chunk[b + 3]])
        }
    }
}
