//! Host audio subsystem seam.
//!
//! The engine talks to the sound system through three small traits:
//! - [`AudioHost`]: enumerate endpoint hints and open a PCM by name
//! - [`PcmHandle`]: one open playback handle (probe, blocking write, prepare, drain)
//! - [`HwNegotiation`]: the ordered hardware-parameter steps for a handle
//!
//! Backends: [`crate::alsa_host`] (Linux) and [`crate::cpal_host`] (everywhere), plus an in-memory
//! fake used by the tests.

#[cfg(test)]
pub(crate) mod fake;

use thiserror::Error;

/// Raw endpoint hint as reported by the host, before catalog filtering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointHint {
    /// PCM name usable with [`AudioHost::open_pcm`].
    pub name: Option<String>,
    /// Human description.
    pub description: Option<String>,
    /// Direction tag (`"Output"`, `"Input"`), absent for bidirectional endpoints.
    pub direction: Option<String>,
}

/// Values the driver actually installed when the hardware parameters were committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HwCommit {
    pub rate_hz: u32,
    pub channels: u16,
    pub period_frames: usize,
    pub buffer_frames: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Buffer underrun (`EPIPE` on ALSA).
    Underrun,
    Other,
}

/// Failure reported by a backend call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn underrun() -> Self {
        Self {
            kind: DriverErrorKind::Underrun,
            message: "Broken pipe".to_string(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Other,
            message: message.into(),
        }
    }

    pub fn is_underrun(&self) -> bool {
        self.kind == DriverErrorKind::Underrun
    }
}

/// Ordered hardware-parameter negotiation for one handle.
///
/// Setters that take a `_near` value return what the driver actually accepted.
pub trait HwNegotiation {
    fn set_access_interleaved(&mut self) -> Result<(), DriverError>;
    fn set_format_s16_le(&mut self) -> Result<(), DriverError>;
    fn set_channels(&mut self, channels: u16) -> Result<(), DriverError>;
    fn set_rate_near(&mut self, rate_hz: u32) -> Result<u32, DriverError>;
    /// Largest buffer time the configuration space still allows, in microseconds.
    fn buffer_time_max_us(&self) -> Result<u32, DriverError>;
    fn set_period_time_near(&mut self, period_us: u32) -> Result<u32, DriverError>;
    fn set_buffer_time_near(&mut self, buffer_us: u32) -> Result<u32, DriverError>;
    /// Install the parameters and report the values in effect.
    fn commit(self) -> Result<HwCommit, DriverError>
    where
        Self: Sized;
}

/// One open playback handle. All calls happen on the playback worker thread.
pub trait PcmHandle: Send {
    type Negotiation<'a>: HwNegotiation
    where
        Self: 'a;

    /// Name reported by the driver (for diagnostics).
    fn name(&self) -> String;

    /// Start hardware negotiation from the full configuration space.
    fn hw_params(&mut self) -> Result<Self::Negotiation<'_>, DriverError>;

    fn set_sw_params(&mut self, avail_min: usize, start_threshold: usize) -> Result<(), DriverError>;

    /// Non-blocking probe: `(frames the device can accept, frames still unplayed)`.
    fn avail_delay(&mut self) -> Result<(i64, i64), DriverError>;

    /// Blocking interleaved write; returns the number of frames written.
    fn write_interleaved(&mut self, samples: &[i16]) -> Result<usize, DriverError>;

    /// Re-arm the stream after an underrun.
    fn prepare(&mut self) -> Result<(), DriverError>;

    /// Block until everything written has been played.
    fn drain(&mut self) -> Result<(), DriverError>;
}

/// Host sound subsystem.
pub trait AudioHost: Send + Sync + 'static {
    type Pcm: PcmHandle + 'static;

    /// All named PCM endpoints, unfiltered.
    fn endpoint_hints(&self) -> Result<Vec<EndpointHint>, DriverError>;

    /// Open the named PCM for playback.
    fn open_pcm(&self, name: &str) -> Result<Self::Pcm, DriverError>;
}
