//! Audio device output via cpal
//!
//! The device dictates the output sample rate, so opening the device also
//! creates the [`MixerCore`]: everything downstream resamples against
//! whatever rate was negotiated here. The stream callback locks the core,
//! mixes straight into the hardware buffer, and converts in place when the
//! device wants a format other than i16.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tracing::{error, info};

use crate::mixer::MixerCore;

/// Output rate requested from headless sinks and reported by disabled
/// renderers.
pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;

/// Frames mixed per pass when no device is negotiating the buffer size.
pub const DEFAULT_BUFFER_FRAMES: u32 = 1024;

/// Negotiated output parameters, fixed for the lifetime of a mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub buffer_frames: u32,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
        }
    }
}

/// How to bring up the output side.
///
/// The defaults ask for a real device. `NETHERMIX_HEADLESS=1` opts into the
/// timer-driven fallback when no device is available; `NETHERMIX_FIFO=path`
/// additionally mirrors the mixed PCM into a pipe (and implies headless).
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    pub headless: bool,
    pub fifo_path: Option<PathBuf>,
}

impl OutputOptions {
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("NETHERMIX_HEADLESS").ok().as_deref(),
            std::env::var("NETHERMIX_FIFO").ok().as_deref(),
        )
    }

    fn from_vars(headless: Option<&str>, fifo: Option<&str>) -> Self {
        Self {
            headless: headless.is_some_and(|v| !v.is_empty() && v != "0"),
            fifo_path: fifo.filter(|v| !v.is_empty()).map(PathBuf::from),
        }
    }

    pub(crate) fn wants_headless(&self) -> bool {
        self.headless || self.fifo_path.is_some()
    }
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("failed to query default stream config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("unsupported device sample format {0:?}")]
    UnsupportedFormat(cpal::SampleFormat),
    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// A running cpal output stream. Dropping it stops the callbacks.
pub(crate) struct DeviceOutput {
    _stream: cpal::Stream,
}

impl DeviceOutput {
    /// Open the default output device and return it together with the mixer
    /// core its callback drives.
    pub fn open() -> Result<(Self, Arc<Mutex<MixerCore>>), OutputError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(OutputError::NoDevice)?;
        let default_config = device.default_output_config()?;

        let sample_rate = default_config.sample_rate().0;
        let config = cpal::StreamConfig {
            channels: 2,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let core = Arc::new(Mutex::new(MixerCore::new(OutputSpec {
            sample_rate,
            buffer_frames: DEFAULT_BUFFER_FRAMES,
        })));

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::I16 => {
                let core = Arc::clone(&core);
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        core.lock().unwrap_or_else(PoisonError::into_inner).mix(data);
                    },
                    |err| error!("audio stream error: {}", err),
                    None,
                )?
            }
            cpal::SampleFormat::F32 => {
                let core = Arc::clone(&core);
                let mut scratch: Vec<i16> = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0);
                        core.lock().unwrap_or_else(PoisonError::into_inner).mix(&mut scratch);
                        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                            *dst = f32::from(src) / 32768.0;
                        }
                    },
                    |err| error!("audio stream error: {}", err),
                    None,
                )?
            }
            cpal::SampleFormat::U16 => {
                let core = Arc::clone(&core);
                let mut scratch: Vec<i16> = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0);
                        core.lock().unwrap_or_else(PoisonError::into_inner).mix(&mut scratch);
                        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                            *dst = (i32::from(src) + 32_768) as u16;
                        }
                    },
                    |err| error!("audio stream error: {}", err),
                    None,
                )?
            }
            format => return Err(OutputError::UnsupportedFormat(format)),
        };

        stream.play()?;
        info!(
            "audio device started ({} Hz, {:?})",
            sample_rate,
            default_config.sample_format()
        );
        Ok((Self { _stream: stream }, core))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_spec_defaults() {
        let spec = OutputSpec::default();
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.buffer_frames, 1024);
    }

    #[test]
    fn test_options_default_to_device_output() {
        let opts = OutputOptions::default();
        assert!(!opts.headless);
        assert!(opts.fifo_path.is_none());
        assert!(!opts.wants_headless());
    }

    #[test]
    fn test_headless_var_is_truthy_unless_zero_or_empty() {
        assert!(OutputOptions::from_vars(Some("1"), None).headless);
        assert!(OutputOptions::from_vars(Some("true"), None).headless);
        assert!(!OutputOptions::from_vars(Some("0"), None).headless);
        assert!(!OutputOptions::from_vars(Some(""), None).headless);
        assert!(!OutputOptions::from_vars(None, None).headless);
    }

    #[test]
    fn test_fifo_var_implies_headless_fallback() {
        let opts = OutputOptions::from_vars(None, Some("/tmp/mix.pcm"));
        assert!(!opts.headless);
        assert!(opts.wants_headless());
        assert_eq!(opts.fifo_path.as_deref(), Some(std::path::Path::new("/tmp/mix.pcm")));

        let opts = OutputOptions::from_vars(None, Some(""));
        assert!(opts.fifo_path.is_none());
        assert!(!opts.wants_headless());
    }

    #[test]
    fn test_error_messages_name_the_failure() {
        let err = OutputError::NoDevice;
        assert_eq!(err.to_string(), "no audio output device available");
        let err = OutputError::UnsupportedFormat(cpal::SampleFormat::F64);
        assert!(err.to_string().contains("F64"));
    }
}
