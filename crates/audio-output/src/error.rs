//! Error taxonomy for the output engine.
//!
//! Every variant is recoverable from the worker's point of view: the playback loop
//! logs it, records it in the shared status and retries. Only [`OutputError::Spawn`]
//! ever reaches a caller of [`crate::player::Player::start`].

use std::fmt;

use thiserror::Error;

/// Hardware/software parameter steps negotiated by `DeviceSession::open`, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwParam {
    /// Loading the full configuration space of the device.
    Defaults,
    /// Interleaved read/write access.
    Access,
    /// Signed 16-bit little-endian samples.
    SampleFormat,
    Channels,
    /// Sample rate (nearest supported rate is accepted).
    SampleRate,
    /// Period and buffer time.
    Timing,
    /// Installing the hardware parameters on the device.
    HardwareCommit,
    /// Avail-min and start threshold.
    SoftwareParams,
}

impl fmt::Display for HwParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HwParam::Defaults => "default parameters",
            HwParam::Access => "interleaved mode",
            HwParam::SampleFormat => "format",
            HwParam::Channels => "channels number",
            HwParam::SampleRate => "rate",
            HwParam::Timing => "buffer/period time",
            HwParam::HardwareCommit => "hardware parameters",
            HwParam::SoftwareParams => "software parameters",
        };
        f.write_str(name)
    }
}

/// Errors produced by the output engine.
#[derive(Debug, Error)]
pub enum OutputError {
    /// The named device could not be opened.
    #[error("can't open {device} PCM device: {message}")]
    DeviceUnavailable { device: String, message: String },

    /// The driver rejected a negotiation step.
    #[error("can't set {parameter}: {message}")]
    ParameterNegotiationFailed { parameter: HwParam, message: String },

    /// The hardware buffer ran dry before new data arrived.
    #[error("XRUN")]
    Underrun,

    /// A write failed for any reason other than an underrun.
    #[error("can't write to PCM device: {0}")]
    WriteFatal(String),

    /// The upstream source had nothing to deliver.
    #[error("failed to get chunk")]
    ChunkUnavailable,

    /// An operation needed an open session but the session was closed.
    #[error("PCM session is closed")]
    SessionClosed,

    /// The worker thread could not be created.
    #[error("failed to spawn output worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl OutputError {
    /// Whether the worker handles this error by tearing the session down.
    pub fn requires_reopen(&self) -> bool {
        matches!(
            self,
            OutputError::WriteFatal(_)
                | OutputError::SessionClosed
                | OutputError::DeviceUnavailable { .. }
                | OutputError::ParameterNegotiationFailed { .. }
        )
    }
}
