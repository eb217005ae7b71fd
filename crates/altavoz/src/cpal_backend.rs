//! cpal-based hardware backend.
//!
//! Reaches the platform audio APIs through
//! [cpal](https://crates.io/crates/cpal): Core Audio on macOS/iOS,
//! AAudio/OpenSL on Android, WASAPI on Windows, ALSA on Linux. Each voice
//! owns one output stream configured at the player's format; the OS mixes
//! the streams, so no software mixing enters the engine. The stream's data
//! callback renders through the shared core.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::backend::{Backend, RenderHandle, Voice, VoiceRequest};
use crate::context::ContextOptions;
use crate::format::Format;
use crate::player::PlayerState;
use crate::{Error, Result};

/// The hardware backend. This is the default used by
/// [`Context::new`](crate::Context::new) when the `cpal-backend` feature is
/// enabled.
pub struct CpalBackend {
    device: cpal::Device,
    actual_rate: f64,
}

impl CpalBackend {
    /// Open the platform's default audio host and select the output device
    /// (by case-insensitive substring when `options.device_name` is set).
    pub fn new(options: &ContextOptions) -> Result<Self> {
        let host = cpal::default_host();
        let device = match options.device_name.as_deref() {
            Some(search) => find_output_device(&host, search)?,
            None => host.default_output_device().ok_or(Error::NoDevice)?,
        };
        let actual_rate = device
            .default_output_config()
            .map(|config| f64::from(config.sample_rate()))
            .unwrap_or(options.sample_rate);
        tracing::info!(
            host = host.id().name(),
            device = device.name().unwrap_or_else(|_| "<unnamed>".into()),
            rate = actual_rate,
            "cpal backend initialized"
        );
        Ok(Self {
            device,
            actual_rate,
        })
    }
}

fn find_output_device(host: &cpal::Host, search: &str) -> Result<cpal::Device> {
    let search_lower = search.to_lowercase();
    let devices = host
        .output_devices()
        .map_err(|err| Error::Backend(err.to_string()))?;
    for device in devices {
        if let Ok(name) = device.name()
            && name.to_lowercase().contains(search_lower.as_str())
        {
            return Ok(device);
        }
    }
    Err(Error::Backend(format!(
        "no output device matching '{}'",
        search
    )))
}

fn build_stream(
    device: &cpal::Device,
    format: Format,
    handle: RenderHandle,
) -> Result<cpal::Stream> {
    let channels = u16::from(format.num_channels);
    let config = cpal::StreamConfig {
        channels,
        sample_rate: format.sample_rate as u32,
        buffer_size: cpal::BufferSize::Default,
    };
    let render = handle;
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render.render(data, channels);
            },
            move |err| {
                tracing::warn!(error = %err, "output stream error");
            },
            None,
        )
        .map_err(|err| Error::Backend(err.to_string()))?;
    // The stream stays paused until the player transitions to Playing.
    Ok(stream)
}

impl Backend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn actual_sample_rate(&self) -> f64 {
        self.actual_rate
    }

    fn create_voice(&mut self, request: VoiceRequest) -> Result<Box<dyn Voice>> {
        let stream = build_stream(&self.device, request.format, request.handle.clone())?;
        tracing::debug!(
            bus = request.bus,
            rate = request.format.sample_rate,
            channels = request.format.num_channels,
            "cpal voice created"
        );
        Ok(Box::new(CpalVoice {
            bus: request.bus,
            device: self.device.clone(),
            handle: request.handle,
            stream,
            started: false,
            suspended: false,
        }))
    }
}

struct CpalVoice {
    bus: u32,
    device: cpal::Device,
    handle: RenderHandle,
    stream: cpal::Stream,
    /// Whether `stream.play()` has been issued and not paused since.
    started: bool,
    suspended: bool,
}

impl Voice for CpalVoice {
    fn bus(&self) -> u32 {
        self.bus
    }

    fn set_format(&mut self, format: Format) -> Result<()> {
        // A stream's format is fixed at construction; reconfigure by
        // rebuilding it. The player is already stopped here.
        self.stream = build_stream(&self.device, format, self.handle.clone())?;
        self.started = false;
        Ok(())
    }

    fn handle_state_change(&mut self, _old: PlayerState, new: PlayerState) -> Result<()> {
        match new {
            PlayerState::Playing => {
                self.stream
                    .play()
                    .map_err(|err| Error::Backend(err.to_string()))?;
                self.started = true;
            }
            PlayerState::Stopped => {
                if self.started {
                    self.stream
                        .pause()
                        .map_err(|err| Error::Backend(err.to_string()))?;
                    self.started = false;
                }
            }
            PlayerState::Paused => {
                // Keep the stream running: the pause fade drains on the
                // render thread, which then gates the voice to silence.
            }
        }
        Ok(())
    }

    fn suspend(&mut self) {
        if self.started {
            let _ = self.stream.pause();
            self.suspended = true;
        }
    }

    fn resume(&mut self) {
        if self.suspended {
            let _ = self.stream.play();
            self.suspended = false;
        }
    }
}
