//! The public face of the mixer
//!
//! `SoundRenderer` owns the output driver and the shared [`MixerCore`], and
//! exposes the whole mixing surface as plain methods. Every method locks the
//! core internally, so the renderer can be called from wherever game code
//! lives without extra synchronization.
//!
//! Construction never fails: with no device and no headless opt-in the
//! renderer comes up "invalid" and every operation degrades to a sensible
//! no-op, the same way it would sound on a muted machine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::headless::HeadlessOutput;
use crate::mixer::{Activity, MixerCore};
use crate::output::{DeviceOutput, OutputOptions, OutputSpec};
use crate::sample::{SoundHandle, DEFAULT_SOURCE_RATE};
use crate::stream::{PullSource, StreamFormat, StreamId};
use crate::voice::{OwnerTag, VoiceId, MAX_VOICES};

pub struct SoundRenderer {
    inner: Option<RendererInner>,
}

/// The driver is declared first so it stops producing before the core goes.
struct RendererInner {
    _driver: Driver,
    core: Arc<Mutex<MixerCore>>,
}

enum Driver {
    Device(DeviceOutput),
    Headless(HeadlessOutput),
}

impl SoundRenderer {
    /// Bring the mixer up against the default audio device.
    ///
    /// When no device is usable and `options` opt into it, a headless timer
    /// thread mixes instead (optionally capturing PCM to a pipe). Otherwise
    /// the renderer is created invalid and silently absorbs every call.
    pub fn new(options: OutputOptions) -> Self {
        match DeviceOutput::open() {
            Ok((device, core)) => Self {
                inner: Some(RendererInner {
                    _driver: Driver::Device(device),
                    core,
                }),
            },
            Err(err) if options.wants_headless() => {
                info!("audio device unavailable ({}); using headless mixer", err);
                Self::headless(options.fifo_path)
            }
            Err(err) => {
                warn!("audio device unavailable ({}); sound disabled", err);
                Self { inner: None }
            }
        }
    }

    /// A renderer with sound off: loads and starts fail, queries answer the
    /// way a finished system would, nothing panics.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    fn headless(fifo_path: Option<std::path::PathBuf>) -> Self {
        let spec = OutputSpec::default();
        let core = Arc::new(Mutex::new(MixerCore::new(spec)));
        let driver = HeadlessOutput::spawn(Arc::clone(&core), spec, fifo_path);
        Self {
            inner: Some(RendererInner {
                _driver: Driver::Headless(driver),
                core,
            }),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    fn lock(&self) -> Option<MutexGuard<'_, MixerCore>> {
        self.inner
            .as_ref()
            .map(|inner| inner.core.lock().unwrap_or_else(PoisonError::into_inner))
    }

    // =========================================================================
    // Samples
    // =========================================================================

    /// Register raw PCM as a playable sample.
    ///
    /// `bits` must be 8 (unsigned) or 16 (signed little-endian), `channels`
    /// 1 or 2, interleaved. A non-positive `frequency` falls back to
    /// 11,025 Hz; `loop_end < 0` means play to the end. Returns
    /// [`SoundHandle::INVALID`] when the data is rejected.
    pub fn load_sound_raw(
        &self,
        data: &[u8],
        frequency: u32,
        channels: u32,
        bits: u32,
        loop_start: i32,
        loop_end: i32,
    ) -> SoundHandle {
        self.lock().map_or(SoundHandle::INVALID, |mut core| {
            core.load_sound_raw(data, frequency, channels, bits, loop_start, loop_end)
        })
    }

    /// Discard a sample. Voices playing it are silenced and their owners
    /// reported through [`drain_finished`](Self::drain_finished).
    pub fn unload_sound(&self, handle: SoundHandle) {
        if let Some(mut core) = self.lock() {
            core.unload_sound(handle);
        }
    }

    pub fn sample_frames(&self, handle: SoundHandle) -> u32 {
        self.lock().map_or(0, |core| core.sample_frames(handle))
    }

    /// Sample length in milliseconds at its own rate.
    pub fn sample_ms(&self, handle: SoundHandle) -> u32 {
        self.lock().map_or(0, |core| core.sample_ms(handle))
    }

    // =========================================================================
    // Voices
    // =========================================================================

    /// Start a sample on a voice, evicting the oldest slot when all 32 are
    /// busy. `None` when the renderer is invalid or the sample is not
    /// playable; nothing is evicted in that case.
    pub fn start_sound(
        &self,
        handle: SoundHandle,
        volume: f32,
        looping: bool,
        owner: OwnerTag,
    ) -> Option<VoiceId> {
        self.lock()?.start_sound(handle, volume, looping, owner)
    }

    /// Stop a voice without a completion notification.
    pub fn stop_voice(&self, id: VoiceId) {
        if let Some(mut core) = self.lock() {
            core.stop_voice(id);
        }
    }

    pub fn set_voice_volume(&self, id: VoiceId, volume: f32) {
        if let Some(mut core) = self.lock() {
            core.set_voice_volume(id, volume);
        }
    }

    /// Current playback position in source frames.
    pub fn voice_position(&self, id: VoiceId) -> u32 {
        self.lock().map_or(0, |core| core.voice_position(id))
    }

    /// The voice's own gain, ignoring the master volume.
    pub fn voice_audibility(&self, id: VoiceId) -> f32 {
        self.lock().map_or(0.0, |core| core.voice_audibility(id))
    }

    pub fn voice_active(&self, id: VoiceId) -> bool {
        self.lock().is_some_and(|core| core.voice_active(id))
    }

    /// Owners of voices that finished, were evicted, or were severed since
    /// the last drain. Call from the game tick and dispatch the results;
    /// each voice reports at most once.
    pub fn drain_finished(&self) -> Vec<OwnerTag> {
        self.lock().map_or_else(Vec::new, |mut core| core.take_finished())
    }

    // =========================================================================
    // Global controls
    // =========================================================================

    pub fn set_sfx_volume(&self, volume: f32) {
        if let Some(mut core) = self.lock() {
            core.set_sfx_volume(volume);
        }
    }

    pub fn set_music_volume(&self, volume: f32) {
        if let Some(mut core) = self.lock() {
            core.set_music_volume(volume);
        }
    }

    /// Freeze sound effects in place; music keeps playing.
    pub fn set_sfx_paused(&self, paused: bool) {
        if let Some(mut core) = self.lock() {
            core.set_sfx_paused(paused);
        }
    }

    pub fn set_activity(&self, activity: Activity) {
        if let Some(mut core) = self.lock() {
            core.set_activity(activity);
        }
    }

    // =========================================================================
    // Music stream
    // =========================================================================

    /// Install a music stream fed by `source`, replacing any live one.
    /// Replaced (and invalid-renderer) ids answer like a silent, ended
    /// stream.
    pub fn create_stream(
        &self,
        source: Box<dyn PullSource>,
        chunk_bytes: usize,
        format: StreamFormat,
        sample_rate: u32,
    ) -> StreamId {
        self.lock().map_or(StreamId(0), |mut core| {
            core.create_stream(source, chunk_bytes, format, sample_rate)
        })
    }

    pub fn play_stream(&self, id: StreamId, looping: bool, volume: f32) -> bool {
        self.lock()
            .is_some_and(|mut core| core.play_stream(id, looping, volume))
    }

    pub fn stop_stream(&self, id: StreamId) {
        if let Some(mut core) = self.lock() {
            core.stop_stream(id);
        }
    }

    pub fn set_stream_volume(&self, id: StreamId, volume: f32) {
        if let Some(mut core) = self.lock() {
            core.set_stream_volume(id, volume);
        }
    }

    pub fn set_stream_paused(&self, id: StreamId, paused: bool) -> bool {
        self.lock()
            .is_none_or(|mut core| core.set_stream_paused(id, paused))
    }

    /// Output frames the stream has delivered so far.
    pub fn stream_position(&self, id: StreamId) -> u64 {
        self.lock().map_or(0, |core| core.stream_position(id))
    }

    pub fn stream_ended(&self, id: StreamId) -> bool {
        self.lock().is_none_or(|core| core.stream_ended(id))
    }

    pub fn stream_stats(&self, id: StreamId) -> String {
        self.lock()
            .map_or_else(|| "null stream".to_string(), |core| core.stream_stats(id))
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Negotiated output rate; the classic 11,025 Hz default when invalid.
    pub fn output_rate(&self) -> u32 {
        self.lock().map_or(DEFAULT_SOURCE_RATE, |core| core.output_rate())
    }

    pub fn stats(&self) -> String {
        self.lock().map_or_else(
            || "mixer inactive".to_string(),
            |core| {
                format!(
                    "mixer: rate={} Hz, voices={}, active={}",
                    core.output_rate(),
                    MAX_VOICES,
                    core.active_voices()
                )
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SampleWidth;
    use std::time::Duration;

    fn tone_bytes(frames: usize, value: i16) -> Vec<u8> {
        std::iter::repeat_n(value, frames)
            .flat_map(i16::to_le_bytes)
            .collect()
    }

    fn silent_source() -> Box<dyn PullSource> {
        Box::new(|buf: &mut [u8]| {
            buf.fill(0);
            true
        })
    }

    #[test]
    fn test_disabled_renderer_absorbs_everything() {
        let r = SoundRenderer::disabled();
        assert!(!r.is_valid());

        let data = tone_bytes(64, 1000);
        let handle = r.load_sound_raw(&data, 44_100, 1, 16, 0, -1);
        assert_eq!(handle, SoundHandle::INVALID);
        assert_eq!(r.sample_frames(handle), 0);
        assert_eq!(r.sample_ms(handle), 0);
        r.unload_sound(handle);

        assert!(r.start_sound(handle, 1.0, false, OwnerTag(1)).is_none());
        assert!(r.drain_finished().is_empty());

        let format = StreamFormat { width: SampleWidth::I16, mono: false };
        let id = r.create_stream(silent_source(), 4096, format, 44_100);
        assert!(!r.play_stream(id, true, 1.0));
        assert!(r.stream_ended(id));
        assert_eq!(r.stream_position(id), 0);
        assert!(r.set_stream_paused(id, true));
        assert_eq!(r.stream_stats(id), "null stream");
        r.stop_stream(id);
        r.set_stream_volume(id, 0.5);

        r.set_sfx_volume(0.5);
        r.set_music_volume(0.5);
        r.set_sfx_paused(true);
        r.set_activity(Activity::Complete);

        assert_eq!(r.output_rate(), 11_025);
        assert_eq!(r.stats(), "mixer inactive");
    }

    #[test]
    fn test_construction_never_panics() {
        // With or without a real device, a renderer always comes up and its
        // validity agrees with what load reports.
        let r = SoundRenderer::new(OutputOptions::default());
        let data = tone_bytes(64, 1000);
        let handle = r.load_sound_raw(&data, 44_100, 1, 16, 0, -1);
        assert_eq!(handle.is_valid(), r.is_valid());
        assert!(r.drain_finished().is_empty());
        if r.is_valid() {
            assert!(r.output_rate() > 0);
        }
    }

    #[test]
    fn test_headless_renderer_plays_a_sound_to_completion() {
        let r = SoundRenderer::headless(None);
        assert!(r.is_valid());
        assert!(r.stats().starts_with("mixer: rate=44100"));

        // 0.1 seconds of tone; the timer thread chews through it quickly.
        let data = tone_bytes(4410, 1000);
        let handle = r.load_sound_raw(&data, 44_100, 1, 16, 0, -1);
        assert!(handle.is_valid());
        assert_eq!(r.sample_ms(handle), 100);

        let id = r.start_sound(handle, 1.0, false, OwnerTag(7)).unwrap();
        let mut finished = Vec::new();
        for _ in 0..500 {
            std::thread::sleep(Duration::from_millis(10));
            finished = r.drain_finished();
            if !finished.is_empty() {
                break;
            }
        }
        assert_eq!(finished, vec![OwnerTag(7)]);
        assert!(!r.voice_active(id));
        assert_eq!(r.voice_position(id), 4410);
        assert!(r.drain_finished().is_empty(), "completion reported once");
    }

    #[test]
    fn test_headless_renderer_advances_a_stream() {
        let r = SoundRenderer::headless(None);
        let format = StreamFormat { width: SampleWidth::I16, mono: false };
        let id = r.create_stream(silent_source(), 4096, format, 22_050);
        assert!(r.play_stream(id, true, 1.0));

        let mut position = 0;
        for _ in 0..500 {
            std::thread::sleep(Duration::from_millis(10));
            position = r.stream_position(id);
            if position > 0 {
                break;
            }
        }
        assert!(position > 0, "the stream is being pulled");
        assert!(!r.stream_ended(id));
        r.stop_stream(id);
        assert!(r.stream_ended(id));
    }

    #[test]
    fn test_stopping_a_voice_through_the_facade() {
        let r = SoundRenderer::headless(None);
        let data = tone_bytes(44_100, 500);
        let handle = r.load_sound_raw(&data, 44_100, 1, 16, 0, 44_100);
        let id = r.start_sound(handle, 1.0, true, OwnerTag(3)).unwrap();
        assert!(r.voice_active(id));
        assert_eq!(r.voice_audibility(id), 1.0);

        r.stop_voice(id);
        assert!(!r.voice_active(id));
        std::thread::sleep(Duration::from_millis(50));
        assert!(r.drain_finished().is_empty(), "explicit stops never notify");
    }
}
