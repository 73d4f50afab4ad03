//! Output device abstraction.
//!
//! The pipeline never holds a device directly. It goes through an [`OutputPort`], which is
//! empty while no device is connected; every operation on an empty port fails with
//! [`PlayerError::NotConnected`].

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;

use crate::error::{PlayerError, Result};

/// Format of the PCM bytes handed to [`OutputDevice::write`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits: u16,
}

impl PcmFormat {
    /// Stream format used when a device is (re)connected before any track set its own.
    pub const DEFAULT: PcmFormat = PcmFormat {
        sample_rate: 48_000,
        channels: 2,
        bits: 16,
    };

    pub fn bytes_per_frame(&self) -> usize {
        usize::from(self.channels) * usize::from(self.bits / 8)
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz / {} ch / {} bit",
            self.sample_rate, self.channels, self.bits
        )
    }
}

/// An audio output device (USB audio class sink on the target hardware).
pub trait OutputDevice: Send + Sync {
    /// Write interleaved PCM. `timeout = None` waits as long as the device needs.
    fn write(&self, pcm: &[u8], format: PcmFormat, timeout: Option<Duration>) -> Result<()>;

    /// Set the volume, 0..=100.
    fn set_volume(&self, volume: u8) -> Result<()>;

    fn volume(&self) -> Result<u8>;

    fn set_mute(&self, muted: bool) -> Result<()>;

    fn name(&self) -> String;
}

/// Connection notifications delivered to the device events worker.
#[derive(Clone)]
pub enum DeviceEvent {
    Connected(Arc<dyn OutputDevice>),
    Disconnected,
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(dev) => f.debug_tuple("Connected").field(&dev.name()).finish(),
            Self::Disconnected => f.write_str("Disconnected"),
        }
    }
}

/// Nullable handle to the current output device, shared by every stage.
#[derive(Clone, Default)]
pub struct OutputPort {
    device: Arc<RwLock<Option<Arc<dyn OutputDevice>>>>,
}

impl OutputPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, device: Arc<dyn OutputDevice>) {
        *self.device.write().unwrap_or_else(PoisonError::into_inner) = Some(device);
    }

    /// Drop the current device, returning it if one was attached.
    pub fn detach(&self) -> Option<Arc<dyn OutputDevice>> {
        self.device
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_connected(&self) -> bool {
        self.device
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn device_name(&self) -> Option<String> {
        self.current().ok().map(|d| d.name())
    }

    /// Clone of the attached device. The lock is not held across device calls, so a
    /// blocking write never stalls attach/detach.
    fn current(&self) -> Result<Arc<dyn OutputDevice>> {
        self.device
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PlayerError::NotConnected)
    }

    pub fn write(&self, pcm: &[u8], format: PcmFormat, timeout: Option<Duration>) -> Result<()> {
        self.current()?.write(pcm, format, timeout)
    }

    pub fn set_volume(&self, volume: u8) -> Result<()> {
        self.current()?.set_volume(volume.min(100))
    }

    pub fn volume(&self) -> Result<u8> {
        self.current()?.volume()
    }

    pub fn set_mute(&self, muted: bool) -> Result<()> {
        self.current()?.set_mute(muted)
    }
}
