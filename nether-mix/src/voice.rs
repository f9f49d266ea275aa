//! Voice pool
//!
//! Sound effects play from a fixed pool of 32 voices. Allocation takes the
//! first inactive slot; when every slot is busy, slot 0 is stolen and its
//! owner is reported through the completion list exactly like a naturally
//! finished voice ("ended" means "no longer playing", not "played to the
//! end"). Eviction is O(1) and not priority-aware.
//!
//! Callers never hold references into the pool. They get a [`VoiceId`]
//! carrying the slot's generation; eviction and reuse bump the generation,
//! so a stale id simply stops matching and every operation on it becomes a
//! no-op.

use crate::sample::SoundHandle;

/// Fixed number of simultaneously playing voices.
pub const MAX_VOICES: usize = 32;

/// Caller-supplied tag identifying who started a voice. Returned verbatim in
/// completion notifications; the mixer never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OwnerTag(pub u32);

/// Generation-checked handle to a playing voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceId {
    slot: u32,
    generation: u32,
}

/// One mixing voice.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Voice {
    /// Sample being played; INVALID when the voice was severed.
    pub sample: SoundHandle,
    /// 16.16 playback position in source frames.
    pub pos: u32,
    /// 16.16 position increment per output frame.
    pub step: u32,
    /// Voice gain, >= 0 (may exceed 1).
    pub volume: f32,
    pub looping: bool,
    pub active: bool,
    pub owner: OwnerTag,
    /// Bumped every time the slot is reissued.
    pub generation: u32,
}

/// The fixed voice array plus allocation logic.
pub(crate) struct VoicePool {
    voices: [Voice; MAX_VOICES],
}

impl VoicePool {
    pub fn new() -> Self {
        Self {
            voices: [Voice::default(); MAX_VOICES],
        }
    }

    /// Claim a slot for `owner`, evicting slot 0 if the pool is full.
    ///
    /// The evicted voice's owner (if any was playing) is pushed onto
    /// `finished`. The claimed slot is reset with a fresh generation; the
    /// caller fills in sample, step, volume and looping.
    pub fn allocate(&mut self, owner: OwnerTag, finished: &mut Vec<OwnerTag>) -> VoiceId {
        let slot = match self.voices.iter().position(|v| !v.active) {
            Some(slot) => slot,
            None => {
                finished.push(self.voices[0].owner);
                0
            }
        };
        let generation = self.voices[slot].generation.wrapping_add(1);
        self.voices[slot] = Voice {
            active: true,
            owner,
            generation,
            ..Voice::default()
        };
        VoiceId {
            slot: slot as u32,
            generation,
        }
    }

    /// Look up a voice by id. Finished voices still match (their parked
    /// position stays queryable); evicted or reused slots do not.
    pub fn get(&self, id: VoiceId) -> Option<&Voice> {
        self.voices
            .get(id.slot as usize)
            .filter(|v| v.generation == id.generation)
    }

    pub fn get_mut(&mut self, id: VoiceId) -> Option<&mut Voice> {
        self.voices
            .get_mut(id.slot as usize)
            .filter(|v| v.generation == id.generation)
    }

    /// Deactivate every voice playing `handle` and queue each owner once.
    /// After this returns no voice references the sample.
    pub fn silence_sample(&mut self, handle: SoundHandle, finished: &mut Vec<OwnerTag>) {
        for voice in self.voices.iter_mut() {
            if voice.active && voice.sample == handle {
                voice.active = false;
                voice.sample = SoundHandle::INVALID;
                finished.push(voice.owner);
            }
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.voices.iter_mut()
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }
}
