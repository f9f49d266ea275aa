//! 16.16 fixed-point resampling math
//!
//! Playback positions are 16.16 fixed point: the high 16 bits are the source
//! frame index, the low 16 bits the fraction between frames. Each output
//! frame advances the position by a precomputed step, and the source frame is
//! simply the integer part - nearest-sample selection, no interpolation.

/// Fractional bits in a playback position or step.
pub(crate) const FRAC_BITS: u32 = 16;

/// Fixed-point one (a step of exactly one source frame per output frame).
pub(crate) const FRAC_ONE: u32 = 1 << FRAC_BITS;

/// Compute the 16.16 step that advances `in_rate` source frames per second
/// when consumed at `out_rate` output frames per second.
///
/// Rounds to nearest so long playback drifts as little as possible;
/// equal rates always yield exactly [`FRAC_ONE`].
#[inline]
pub(crate) fn step_for_rates(in_rate: u32, out_rate: u32) -> u32 {
    let out = u64::from(out_rate.max(1));
    ((u64::from(in_rate) * u64::from(FRAC_ONE) + out / 2) / out) as u32
}

/// Integer source frame for a 16.16 position.
#[inline]
pub(crate) fn frame_of(pos: u32) -> u32 {
    pos >> FRAC_BITS
}
