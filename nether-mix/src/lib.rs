//! Nether-Mix: Software PCM sound mixer for Nethercore clients
//!
//! A pull-model stereo mixer: sound effects play from a fixed pool of 32
//! voices with oldest-slot eviction, music arrives through a pluggable
//! pull-style stream source, and everything is resampled with 16.16
//! fixed-point steps (nearest sample, no interpolation - the retro sound is
//! the point).
//!
//! # Architecture
//!
//! ```text
//! Caller thread                         Mix thread (one of two drivers)
//!     │                                     │
//! [SoundRenderer]──lock──►[MixerCore]◄──lock──[cpal callback]
//!     │                      │                   - or -
//! [drain_finished]◄──────[finished]◄──lock──[headless timer thread]──►[PCM pipe]
//! ```
//!
//! One mutex guards the whole mixer state. The caller mutates it through
//! `SoundRenderer`'s methods; whichever driver is running locks it once per
//! output buffer and runs a mix pass. Voices that finish (naturally, by
//! eviction, or by sample unload) queue their owner tag; the caller collects
//! them with [`SoundRenderer::drain_finished`] and dispatches outside the
//! lock.
//!
//! The device driver adapts the mixer's native format (interleaved
//! native-endian i16 stereo) to whatever cpal negotiated. When no device is
//! available and the host opted in (`NETHERMIX_HEADLESS` / `NETHERMIX_FIFO`),
//! a timer thread mixes at the same cadence and optionally writes the raw
//! PCM to a named pipe for capture.

mod headless;
mod mixer;
mod output;
mod renderer;
mod resample;
mod sample;
mod stream;
mod voice;

pub use mixer::Activity;
pub use output::{OutputError, OutputOptions, OutputSpec, DEFAULT_BUFFER_FRAMES, OUTPUT_SAMPLE_RATE};
pub use renderer::SoundRenderer;
pub use sample::{SoundHandle, DEFAULT_SOURCE_RATE};
pub use stream::{PullSource, SampleWidth, StreamFormat, StreamId};
pub use voice::{OwnerTag, VoiceId, MAX_VOICES};

/// Clamp a 32-bit intermediate sum to the i16 range.
///
/// The mixer accumulates voices into each output slot with plain 32-bit adds
/// and clamps on store. This is the only anti-clipping mechanism.
#[inline]
pub(crate) fn clamp16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp16_passes_in_range_values() {
        assert_eq!(clamp16(0), 0);
        assert_eq!(clamp16(1234), 1234);
        assert_eq!(clamp16(-1234), -1234);
        assert_eq!(clamp16(32767), 32767);
        assert_eq!(clamp16(-32768), -32768);
    }

    #[test]
    fn test_clamp16_saturates_out_of_range_values() {
        assert_eq!(clamp16(32768), 32767);
        assert_eq!(clamp16(-32769), -32768);
        assert_eq!(clamp16(i32::MAX), 32767);
        assert_eq!(clamp16(i32::MIN), -32768);
    }
}
