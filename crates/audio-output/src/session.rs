//! Device session: one open playback handle plus its transfer buffer.
//!
//! A session is either open (valid handle and buffer) or closed (neither). Opening runs
//! the full negotiation; closing drains, closes and frees everything in one step.

use crate::config::OutputConfig;
use crate::contract::StreamFormat;
use crate::error::{HwParam, OutputError};
use crate::host::{AudioHost, DriverError, HwCommit, HwNegotiation, PcmHandle};

/// Period/buffer sizing actually installed on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeriodGeometry {
    pub period_frames: usize,
    pub period_time_us: u32,
    pub buffer_time_us: u32,
}

/// Stream parameters the device accepted. The rate may differ from the requested one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub rate_hz: u32,
    pub channels: u16,
    pub buffer_frames: usize,
}

/// Result of a single write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Frames accepted by the device.
    Written(usize),
    /// The device ran dry; call [`DeviceSession::recover_underrun`] before writing again.
    Underrun,
    /// Unrecoverable for this handle; close and reopen the session.
    Fatal(String),
}

struct OpenPcm<P> {
    handle: P,
    buffer: Vec<i16>,
}

/// Exclusively owned playback handle and transfer buffer.
pub struct DeviceSession<P: PcmHandle> {
    device_id: String,
    geometry: PeriodGeometry,
    negotiated: NegotiatedFormat,
    open: Option<OpenPcm<P>>,
}

impl<P: PcmHandle> DeviceSession<P> {
    /// Open `device_id` and negotiate `format`.
    ///
    /// Negotiation order: access, sample format, channels, rate (nearest), period and
    /// buffer time, hardware commit, software thresholds. The handle is released if
    /// any step fails.
    pub fn open<H>(
        host: &H,
        device_id: &str,
        format: StreamFormat,
        config: &OutputConfig,
    ) -> Result<Self, OutputError>
    where
        H: AudioHost<Pcm = P>,
    {
        let mut handle = host
            .open_pcm(device_id)
            .map_err(|e| OutputError::DeviceUnavailable {
                device: device_id.to_string(),
                message: e.message,
            })?;

        let commit = negotiate_hw(&mut handle, format, config)?;
        if commit.period_frames == 0 || commit.rate_hz == 0 || commit.channels == 0 {
            return Err(OutputError::ParameterNegotiationFailed {
                parameter: HwParam::HardwareCommit,
                message: format!("driver reported an unusable configuration: {commit:?}"),
            });
        }

        handle
            .set_sw_params(commit.period_frames, commit.period_frames)
            .map_err(rejected(HwParam::SoftwareParams))?;

        let geometry = PeriodGeometry {
            period_frames: commit.period_frames,
            period_time_us: frames_to_us(commit.period_frames, commit.rate_hz),
            buffer_time_us: frames_to_us(commit.buffer_frames, commit.rate_hz),
        };
        let negotiated = NegotiatedFormat {
            rate_hz: commit.rate_hz,
            channels: commit.channels,
            buffer_frames: commit.buffer_frames,
        };
        let buffer = vec![0i16; commit.period_frames * usize::from(commit.channels)];

        tracing::debug!(
            pcm = %handle.name(),
            channels = negotiated.channels,
            rate_hz = negotiated.rate_hz,
            frames = geometry.period_frames,
            period_time_us = geometry.period_time_us,
            buffer_time_us = geometry.buffer_time_us,
            "pcm negotiated"
        );
        if negotiated.rate_hz != format.sample_rate_hz {
            tracing::warn!(
                requested_hz = format.sample_rate_hz,
                negotiated_hz = negotiated.rate_hz,
                "device runs at a different rate than the stream"
            );
        }

        Ok(Self {
            device_id: device_id.to_string(),
            geometry,
            negotiated,
            open: Some(OpenPcm { handle, buffer }),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn geometry(&self) -> PeriodGeometry {
        self.geometry
    }

    pub fn negotiated(&self) -> NegotiatedFormat {
        self.negotiated
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Size of the transfer buffer in bytes (`period_frames * channels * 2`).
    pub fn buffer_bytes(&self) -> usize {
        self.open
            .as_ref()
            .map(|o| o.buffer.len() * std::mem::size_of::<i16>())
            .unwrap_or(0)
    }

    /// Interleaved transfer buffer, one period long.
    pub fn buffer_mut(&mut self) -> Option<&mut [i16]> {
        self.open.as_mut().map(|o| o.buffer.as_mut_slice())
    }

    /// Non-blocking probe of `(available frames, unplayed frames)`.
    ///
    /// A stream that already ran dry reports [`OutputError::Underrun`]; it is recovered
    /// with [`DeviceSession::recover_underrun`] like a failed write.
    pub fn query_available_and_delay(&mut self) -> Result<(i64, i64), OutputError> {
        let open = self.open.as_mut().ok_or(OutputError::SessionClosed)?;
        open.handle.avail_delay().map_err(|e| {
            if e.is_underrun() {
                OutputError::Underrun
            } else {
                OutputError::WriteFatal(e.message)
            }
        })
    }

    /// Write the first `frames` frames of the transfer buffer.
    pub fn write(&mut self, frames: usize) -> WriteOutcome {
        let Some(open) = self.open.as_mut() else {
            return WriteOutcome::Fatal(OutputError::SessionClosed.to_string());
        };
        let channels = usize::from(self.negotiated.channels);
        let samples = frames.min(self.geometry.period_frames) * channels;
        match open.handle.write_interleaved(&open.buffer[..samples]) {
            Ok(written) => WriteOutcome::Written(written),
            Err(e) if e.is_underrun() => WriteOutcome::Underrun,
            Err(e) => WriteOutcome::Fatal(e.message),
        }
    }

    /// Prepare the device again after [`WriteOutcome::Underrun`].
    pub fn recover_underrun(&mut self) -> Result<(), OutputError> {
        let open = self.open.as_mut().ok_or(OutputError::SessionClosed)?;
        open.handle
            .prepare()
            .map_err(|e| OutputError::WriteFatal(e.message))
    }

    /// Drain pending audio, close the handle and free the buffer. No-op when closed.
    pub fn close(&mut self) {
        let Some(mut open) = self.open.take() else {
            return;
        };
        if let Err(e) = open.handle.drain() {
            tracing::debug!(device = %self.device_id, "drain failed on close: {e}");
        }
        drop(open);
        tracing::debug!(device = %self.device_id, "pcm closed");
    }
}

impl<P: PcmHandle> Drop for DeviceSession<P> {
    fn drop(&mut self) {
        self.close();
    }
}

fn negotiate_hw<P: PcmHandle>(
    handle: &mut P,
    format: StreamFormat,
    config: &OutputConfig,
) -> Result<HwCommit, OutputError> {
    let mut hw = handle.hw_params().map_err(rejected(HwParam::Defaults))?;

    hw.set_access_interleaved()
        .map_err(rejected(HwParam::Access))?;
    hw.set_format_s16_le()
        .map_err(rejected(HwParam::SampleFormat))?;
    hw.set_channels(format.channels)
        .map_err(rejected(HwParam::Channels))?;
    hw.set_rate_near(format.sample_rate_hz)
        .map_err(rejected(HwParam::SampleRate))?;

    let (period_us, buffer_us) = target_timing(
        hw.buffer_time_max_us().map_err(rejected(HwParam::Timing))?,
        config,
    );
    let period_us = hw
        .set_period_time_near(period_us)
        .map_err(rejected(HwParam::Timing))?;
    let buffer_us = hw
        .set_buffer_time_near(buffer_us)
        .map_err(rejected(HwParam::Timing))?;
    tracing::trace!(period_us, buffer_us, "timing accepted by driver");

    hw.commit().map_err(rejected(HwParam::HardwareCommit))
}

/// `(period_us, buffer_us)` to request: the buffer is capped at the configured maximum and
/// split evenly into periods.
fn target_timing(device_max_us: u32, config: &OutputConfig) -> (u32, u32) {
    let buffer_us = device_max_us.min(config.max_buffer_time_us());
    (buffer_us / config.periods(), buffer_us)
}

fn frames_to_us(frames: usize, rate_hz: u32) -> u32 {
    if rate_hz == 0 {
        return 0;
    }
    let us = frames as u64 * 1_000_000 / u64::from(rate_hz);
    u32::try_from(us).unwrap_or(u32::MAX)
}

fn rejected(parameter: HwParam) -> impl Fn(DriverError) -> OutputError {
    move |e| OutputError::ParameterNegotiationFailed {
        parameter,
        message: e.message,
    }
}
