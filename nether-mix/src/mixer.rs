//! Shared mixer state and the mix pass
//!
//! `MixerCore` is the single piece of shared state: the sample bank, the
//! voice pool, the optional music stream, volumes and pause/activity flags,
//! and the pending completion list. The renderer locks it to mutate, the
//! output driver locks it once per buffer and calls [`MixerCore::mix`].
//!
//! Everything here runs under that one lock; nothing blocks and nothing
//! panics on bad input, because a wedged or dead mix pass means silence for
//! the rest of the process.

use std::mem;

use tracing::{debug, warn};

use crate::clamp16;
use crate::output::OutputSpec;
use crate::resample::{frame_of, step_for_rates, FRAC_BITS};
use crate::sample::{Sample, SampleBank, SoundHandle};
use crate::stream::{MusicStream, PullSource, StreamFormat, StreamId};
use crate::voice::{OwnerTag, Voice, VoiceId, VoicePool};

/// Host activity level. Mirrors the client's focus/minimize handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activity {
    /// Normal mixing.
    #[default]
    Active,
    /// Sound effects are silenced (and frozen in place); music keeps playing.
    Mute,
    /// Accepted for interface parity; mixes exactly like `Active`.
    Paused,
    /// Full silence: the pass zero-fills the buffer and touches nothing.
    Complete,
}

/// All mixer state, guarded by one mutex owned by the renderer.
pub(crate) struct MixerCore {
    spec: OutputSpec,
    sfx_volume: f32,
    music_volume: f32,
    sfx_paused: bool,
    activity: Activity,
    bank: SampleBank,
    pool: VoicePool,
    music: Option<MusicStream>,
    /// Serial of the live stream; every create bumps it, so replaced
    /// [`StreamId`]s stop matching.
    stream_serial: u64,
    finished: Vec<OwnerTag>,
}

impl MixerCore {
    pub fn new(spec: OutputSpec) -> Self {
        Self {
            spec,
            sfx_volume: 1.0,
            music_volume: 1.0,
            sfx_paused: false,
            activity: Activity::Active,
            bank: SampleBank::new(),
            pool: VoicePool::new(),
            music: None,
            stream_serial: 0,
            finished: Vec::new(),
        }
    }

    // =========================================================================
    // The mix pass
    // =========================================================================

    /// Mix one buffer of interleaved stereo i16 frames.
    ///
    /// Order matters: music ignores the SFX pause and master volume but is
    /// gated by `Complete`; sound effects are additionally gated by the SFX
    /// pause and the (possibly muted) master volume. Inaudible voices do not
    /// advance - restoring volume resumes them where they stopped.
    pub fn mix(&mut self, out: &mut [i16]) {
        out.fill(0);
        let frames = out.len() / 2;
        if frames == 0 {
            return;
        }
        let out = &mut out[..frames * 2];

        if self.activity != Activity::Complete
            && let Some(music) = self.music.as_mut()
        {
            // The renderer's music volume governs the stream.
            music.set_volume(self.music_volume);
            music.mix_into(out, self.spec.sample_rate);
        }

        if self.activity == Activity::Complete {
            return;
        }
        if self.sfx_paused {
            return;
        }

        let master = if self.activity == Activity::Mute {
            0.0
        } else {
            self.sfx_volume
        };
        if master <= 0.0 {
            return;
        }

        let Self { bank, pool, finished, .. } = self;
        for voice in pool.iter_mut() {
            if !voice.active {
                continue;
            }
            mix_voice(voice, bank, master, out, finished);
        }
    }

    // =========================================================================
    // Samples
    // =========================================================================

    pub fn load_sound_raw(
        &mut self,
        data: &[u8],
        frequency: u32,
        channels: u32,
        bits: u32,
        loop_start: i32,
        loop_end: i32,
    ) -> SoundHandle {
        match Sample::from_raw(data, frequency, channels, bits, loop_start, loop_end) {
            Some(sample) => self.bank.insert(sample),
            None => SoundHandle::INVALID,
        }
    }

    /// Drop a sample, severing (and notifying) every voice playing it first.
    pub fn unload_sound(&mut self, handle: SoundHandle) {
        if !handle.is_valid() {
            return;
        }
        let Self { pool, finished, .. } = self;
        pool.silence_sample(handle, finished);
        self.bank.remove(handle);
    }

    pub fn sample_frames(&self, handle: SoundHandle) -> u32 {
        self.bank.get(handle).map_or(0, Sample::frames)
    }

    pub fn sample_ms(&self, handle: SoundHandle) -> u32 {
        self.bank.get(handle).map_or(0, Sample::ms_length)
    }

    pub fn output_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    // =========================================================================
    // Voices
    // =========================================================================

    /// Start a sample on a fresh (possibly evicted) voice.
    ///
    /// Fails without touching the pool when the sample is missing or empty,
    /// so a bad handle never evicts anyone.
    pub fn start_sound(
        &mut self,
        handle: SoundHandle,
        volume: f32,
        looping: bool,
        owner: OwnerTag,
    ) -> Option<VoiceId> {
        let step = {
            let sample = self.bank.get(handle)?;
            if sample.frames() == 0 {
                return None;
            }
            step_for_rates(sample.rate, self.spec.sample_rate)
        };

        let Self { pool, finished, .. } = self;
        let id = pool.allocate(owner, finished);
        if let Some(voice) = pool.get_mut(id) {
            voice.sample = handle;
            voice.step = step;
            voice.volume = volume.max(0.0);
            voice.looping = looping;
        }
        Some(id)
    }

    /// Silence a voice immediately. Deliberately does NOT notify the owner;
    /// an explicit stop is not a completion.
    pub fn stop_voice(&mut self, id: VoiceId) {
        if let Some(voice) = self.pool.get_mut(id) {
            voice.active = false;
            voice.sample = SoundHandle::INVALID;
        }
    }

    pub fn set_voice_volume(&mut self, id: VoiceId, volume: f32) {
        if let Some(voice) = self.pool.get_mut(id) {
            voice.volume = volume.max(0.0);
        }
    }

    /// Playback position in source frames; a finished voice reports its
    /// sample length.
    pub fn voice_position(&self, id: VoiceId) -> u32 {
        self.pool.get(id).map_or(0, |v| frame_of(v.pos))
    }

    /// The voice's own gain. The master volume is not factored in.
    pub fn voice_audibility(&self, id: VoiceId) -> f32 {
        self.pool.get(id).map_or(0.0, |v| v.volume)
    }

    pub fn voice_active(&self, id: VoiceId) -> bool {
        self.pool.get(id).is_some_and(|v| v.active)
    }

    pub fn active_voices(&self) -> usize {
        self.pool.active_count()
    }

    // =========================================================================
    // Global state
    // =========================================================================

    pub fn set_sfx_paused(&mut self, paused: bool) {
        self.sfx_paused = paused;
    }

    pub fn set_activity(&mut self, activity: Activity) {
        self.activity = activity;
    }

    pub fn set_sfx_volume(&mut self, volume: f32) {
        self.sfx_volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_music_volume(&mut self, volume: f32) {
        self.music_volume = volume.clamp(0.0, 1.0);
    }

    /// Move the pending completions out. Called under the lock; the caller
    /// dispatches after releasing it.
    pub fn take_finished(&mut self) -> Vec<OwnerTag> {
        mem::take(&mut self.finished)
    }

    // =========================================================================
    // Music stream
    // =========================================================================

    /// Install a new music stream, discarding any live one (queued data and
    /// all). Previously issued ids go stale.
    pub fn create_stream(
        &mut self,
        source: Box<dyn PullSource>,
        chunk_bytes: usize,
        format: StreamFormat,
        sample_rate: u32,
    ) -> StreamId {
        if self.music.is_some() {
            debug!("replacing live music stream");
        }
        self.stream_serial += 1;
        self.music = Some(MusicStream::new(source, chunk_bytes, format, sample_rate));
        StreamId(self.stream_serial)
    }

    pub fn play_stream(&mut self, id: StreamId, looping: bool, volume: f32) -> bool {
        let volume = volume.clamp(0.0, 1.0);
        self.live_stream_mut(id).is_some_and(|s| s.play(looping, volume))
    }

    pub fn stop_stream(&mut self, id: StreamId) {
        if let Some(stream) = self.live_stream_mut(id) {
            stream.stop();
        }
    }

    pub fn set_stream_volume(&mut self, id: StreamId, volume: f32) {
        if let Some(stream) = self.live_stream_mut(id) {
            stream.set_volume(volume);
        }
    }

    pub fn set_stream_paused(&mut self, id: StreamId, paused: bool) -> bool {
        match self.live_stream_mut(id) {
            Some(stream) => stream.set_paused(paused),
            // Stale handles answer like a silent, ended stream.
            None => true,
        }
    }

    pub fn stream_position(&self, id: StreamId) -> u64 {
        self.live_stream(id).map_or(0, MusicStream::position)
    }

    pub fn stream_ended(&self, id: StreamId) -> bool {
        self.live_stream(id).is_none_or(MusicStream::is_ended)
    }

    pub fn stream_stats(&self, id: StreamId) -> String {
        self.live_stream(id)
            .map_or_else(|| "null stream".to_string(), MusicStream::stats)
    }

    fn live_stream(&self, id: StreamId) -> Option<&MusicStream> {
        if id.0 != 0 && id.0 == self.stream_serial {
            self.music.as_ref()
        } else {
            None
        }
    }

    fn live_stream_mut(&mut self, id: StreamId) -> Option<&mut MusicStream> {
        if id.0 != 0 && id.0 == self.stream_serial {
            self.music.as_mut()
        } else {
            None
        }
    }
}

/// Mix one voice into an interleaved stereo buffer, advancing its position
/// and handling loop wrap or completion.
fn mix_voice(
    voice: &mut Voice,
    bank: &SampleBank,
    master: f32,
    out: &mut [i16],
    finished: &mut Vec<OwnerTag>,
) {
    let Some(sample) = bank.get(voice.sample) else {
        // Unload severs voices under the same lock, so this indicates a
        // bookkeeping bug; drop the voice rather than fault the mix thread.
        warn!("active voice references missing sample {}; dropping it", voice.sample.0);
        voice.active = false;
        voice.sample = SoundHandle::INVALID;
        return;
    };

    let s_frames = sample.frames();
    if s_frames == 0 {
        voice.active = false;
        return;
    }

    // Loop bounds are normalized at mix time so samples can be reloaded with
    // different regions without touching playing voices.
    let loop_start = sample.loop_start.min(s_frames);
    let loop_end = match sample.loop_end {
        None => s_frames,
        Some(end) => end.clamp(loop_start, s_frames),
    };

    let gain = voice.volume.max(0.0) * master;
    if gain <= 0.0 {
        return;
    }

    for frame in out.chunks_exact_mut(2) {
        let mut f = frame_of(voice.pos);
        if f >= s_frames {
            if voice.looping && loop_end > loop_start {
                voice.pos = loop_start << FRAC_BITS;
                f = loop_start;
            } else {
                voice.active = false;
                voice.pos = s_frames << FRAC_BITS;
                finished.push(voice.owner);
                break;
            }
        }

        let idx = f as usize * sample.channels as usize;
        let left = sample.pcm[idx];
        let right = if sample.channels == 2 { sample.pcm[idx + 1] } else { left };

        // Gain has no upper clamp, so the scaled sample can saturate the
        // cast at i32::MAX; the accumulate must not wrap on top of it.
        frame[0] = clamp16((frame[0] as i32).saturating_add((left as f32 * gain) as i32));
        frame[1] = clamp16((frame[1] as i32).saturating_add((right as f32 * gain) as i32));

        voice.pos = voice.pos.wrapping_add(voice.step);
        // Snap back the moment the integer frame crosses the loop end so the
        // loop length stays exact.
        if voice.looping && loop_end > loop_start && frame_of(voice.pos) >= loop_end {
            voice.pos = loop_start << FRAC_BITS;
        }
    }
}
