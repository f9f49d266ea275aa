//! Timer-driven mixing for machines without audio hardware
//!
//! CI boxes and dedicated servers have no output device, but gameplay code
//! still expects sounds to start, advance, and complete. The headless driver
//! runs the same mix pass off a plain thread at the buffer cadence a device
//! would have, and can mirror the mixed PCM into a pipe for capture
//! harnesses to read.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::info;

use crate::mixer::MixerCore;
use crate::output::OutputSpec;

/// A running headless mix thread. Dropping it stops the thread and joins it.
pub(crate) struct HeadlessOutput {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HeadlessOutput {
    /// Start mixing `core` at the cadence `spec` implies, optionally copying
    /// every buffer into the pipe at `fifo_path`.
    pub fn spawn(
        core: Arc<Mutex<MixerCore>>,
        spec: OutputSpec,
        fifo_path: Option<PathBuf>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("mix-headless".into())
            .spawn(move || run_mix_loop(&core, spec, fifo_path, &flag))
            .expect("failed to spawn headless mix thread");
        Self {
            running,
            handle: Some(handle),
        }
    }
}

impl Drop for HeadlessOutput {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_mix_loop(
    core: &Mutex<MixerCore>,
    spec: OutputSpec,
    fifo_path: Option<PathBuf>,
    running: &AtomicBool,
) {
    let frames = spec.buffer_frames.max(1) as usize;
    let mut buffer = vec![0i16; frames * 2];
    let mut sink = fifo_path.map(FifoWriter::new);
    let period = Duration::from_micros(
        frames as u64 * 1_000_000 / u64::from(spec.sample_rate.max(1)),
    );

    info!("headless mixer started ({} Hz)", spec.sample_rate);
    while running.load(Ordering::Relaxed) {
        core.lock().unwrap_or_else(PoisonError::into_inner).mix(&mut buffer);
        if let Some(sink) = sink.as_mut() {
            sink.write(bytemuck::cast_slice(&buffer));
        }
        thread::sleep(period);
    }
}

/// Best-effort PCM sink over a named pipe (or any writable path).
///
/// The pipe is opened lazily and non-blocking, read-write so our own handle
/// keeps it alive when no reader is attached yet. Failures drop the handle
/// and the next pass retries; the mix loop itself never blocks on the sink.
#[cfg(unix)]
struct FifoWriter {
    path: PathBuf,
    file: Option<std::fs::File>,
}

#[cfg(unix)]
impl FifoWriter {
    fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    fn write(&mut self, bytes: &[u8]) {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        use tracing::{debug, trace};

        if self.file.is_none() {
            match std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.path)
            {
                Ok(file) => {
                    debug!("headless sink opened at {}", self.path.display());
                    self.file = Some(file);
                }
                Err(err) => {
                    trace!("headless sink unavailable: {}", err);
                    return;
                }
            }
        }

        if let Some(file) = self.file.as_mut()
            && let Err(err) = file.write_all(bytes)
        {
            // A full pipe just drops the rest of this buffer; the reader is
            // behind and catches up on real audio data later.
            if err.kind() != std::io::ErrorKind::WouldBlock {
                debug!("headless sink write failed ({}); reopening later", err);
                self.file = None;
            }
        }
    }
}

#[cfg(not(unix))]
struct FifoWriter {
    path: PathBuf,
    warned: bool,
}

#[cfg(not(unix))]
impl FifoWriter {
    fn new(path: PathBuf) -> Self {
        Self { path, warned: false }
    }

    fn write(&mut self, _bytes: &[u8]) {
        if !self.warned {
            tracing::warn!(
                "PCM sinks are unix-only; ignoring {}",
                self.path.display()
            );
            self.warned = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::OwnerTag;

    fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn small_spec() -> OutputSpec {
        OutputSpec {
            sample_rate: 44_100,
            buffer_frames: 256,
        }
    }

    /// Mixer core preloaded with one looping voice so every pass is audible.
    fn noisy_core() -> Arc<Mutex<MixerCore>> {
        let mut core = MixerCore::new(small_spec());
        let data: Vec<u8> = std::iter::repeat_n(1000i16, 64)
            .flat_map(i16::to_le_bytes)
            .collect();
        let handle = core.load_sound_raw(&data, 44_100, 1, 16, 0, 64);
        core.start_sound(handle, 1.0, true, OwnerTag(1))
            .expect("voice should start");
        Arc::new(Mutex::new(core))
    }

    /// Mixer core with a long one-shot voice whose position only grows.
    fn tracking_core() -> (Arc<Mutex<MixerCore>>, crate::voice::VoiceId) {
        let mut core = MixerCore::new(small_spec());
        let data: Vec<u8> = std::iter::repeat_n(1000i16, 441_000)
            .flat_map(i16::to_le_bytes)
            .collect();
        let handle = core.load_sound_raw(&data, 44_100, 1, 16, 0, -1);
        let id = core
            .start_sound(handle, 1.0, false, OwnerTag(1))
            .expect("voice should start");
        (Arc::new(Mutex::new(core)), id)
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_writer_appends_whole_buffers() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sink.pcm");
        std::fs::File::create(&path).unwrap();

        let buffer = vec![1000i16; 512];
        let bytes: &[u8] = bytemuck::cast_slice(&buffer);
        let mut writer = FifoWriter::new(path.clone());
        writer.write(bytes);
        writer.write(bytes);

        let written = std::fs::metadata(&path).unwrap().len();
        assert_eq!(written, 2 * bytes.len() as u64);
    }

    #[cfg(unix)]
    #[test]
    fn test_fifo_writer_tolerates_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = FifoWriter::new(dir.path().join("never-created.pcm"));
        writer.write(&[0u8; 64]);
        writer.write(&[0u8; 64]);
        assert!(writer.file.is_none(), "no handle without a sink to open");
    }

    #[test]
    fn test_headless_thread_advances_the_mixer() {
        init_logging();
        let (core, id) = tracking_core();
        let output = HeadlessOutput::spawn(Arc::clone(&core), small_spec(), None);

        // ~6ms per pass at 256 frames; give it room on slow machines.
        let mut advanced = false;
        for _ in 0..200 {
            std::thread::sleep(Duration::from_millis(10));
            if core.lock().unwrap().voice_position(id) > 0 {
                advanced = true;
                break;
            }
        }
        drop(output);
        assert!(advanced, "the mix thread advanced the voice on its own");
    }

    #[cfg(unix)]
    #[test]
    fn test_headless_thread_writes_pcm_to_the_sink() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.pcm");
        std::fs::File::create(&path).unwrap();

        let core = noisy_core();
        let output = HeadlessOutput::spawn(Arc::clone(&core), small_spec(), Some(path.clone()));

        let mut len = 0;
        for _ in 0..200 {
            std::thread::sleep(Duration::from_millis(10));
            len = std::fs::metadata(&path).unwrap().len();
            if len > 0 {
                break;
            }
        }
        drop(output);

        assert!(len > 0, "mixed PCM reached the sink");
        assert_eq!(len % 4, 0, "sink holds whole interleaved stereo frames");
        let contents = std::fs::read(&path).unwrap();
        assert!(contents.iter().any(|&b| b != 0), "the voice is audible in the capture");
    }
}
