//! ALSA backend (Linux).
//!
//! Maps the host seam onto `snd_pcm_*` through the `alsa` crate: device hints, blocking
//! interleaved S16_LE writes, `EPIPE` reported as an underrun.

use alsa::device_name::HintIter;
use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use crate::host::{AudioHost, DriverError, EndpointHint, HwCommit, HwNegotiation, PcmHandle};

/// The system ALSA library.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlsaHost;

impl AudioHost for AlsaHost {
    type Pcm = AlsaPcm;

    fn endpoint_hints(&self) -> Result<Vec<EndpointHint>, DriverError> {
        let hints = HintIter::new_str(None, "pcm").map_err(driver_error)?;
        Ok(hints
            .map(|h| EndpointHint {
                name: h.name,
                description: h.desc,
                direction: direction_tag(h.direction),
            })
            .collect())
    }

    fn open_pcm(&self, name: &str) -> Result<AlsaPcm, DriverError> {
        let pcm = PCM::new(name, Direction::Playback, false).map_err(driver_error)?;
        Ok(AlsaPcm {
            name: name.to_string(),
            pcm,
        })
    }
}

/// Open blocking playback PCM. Closed on drop.
pub struct AlsaPcm {
    name: String,
    pcm: PCM,
}

pub struct AlsaNegotiation<'a> {
    pcm: &'a PCM,
    hwp: HwParams<'a>,
}

impl HwNegotiation for AlsaNegotiation<'_> {
    fn set_access_interleaved(&mut self) -> Result<(), DriverError> {
        self.hwp.set_access(Access::RWInterleaved).map_err(driver_error)
    }

    fn set_format_s16_le(&mut self) -> Result<(), DriverError> {
        self.hwp.set_format(Format::S16LE).map_err(driver_error)
    }

    fn set_channels(&mut self, channels: u16) -> Result<(), DriverError> {
        self.hwp
            .set_channels(u32::from(channels))
            .map_err(driver_error)
    }

    fn set_rate_near(&mut self, rate_hz: u32) -> Result<u32, DriverError> {
        self.hwp
            .set_rate_near(rate_hz, ValueOr::Nearest)
            .map_err(driver_error)
    }

    fn buffer_time_max_us(&self) -> Result<u32, DriverError> {
        self.hwp.get_buffer_time_max().map_err(driver_error)
    }

    fn set_period_time_near(&mut self, period_us: u32) -> Result<u32, DriverError> {
        self.hwp
            .set_period_time_near(period_us, ValueOr::Nearest)
            .map_err(driver_error)
    }

    fn set_buffer_time_near(&mut self, buffer_us: u32) -> Result<u32, DriverError> {
        self.hwp
            .set_buffer_time_near(buffer_us, ValueOr::Nearest)
            .map_err(driver_error)
    }

    fn commit(self) -> Result<HwCommit, DriverError> {
        self.pcm.hw_params(&self.hwp).map_err(driver_error)?;
        let rate_hz = self.hwp.get_rate().map_err(driver_error)?;
        let channels = self.hwp.get_channels().map_err(driver_error)?;
        let period = self.hwp.get_period_size().map_err(driver_error)?;
        let buffer = self.hwp.get_buffer_size().map_err(driver_error)?;
        Ok(HwCommit {
            rate_hz,
            channels: u16::try_from(channels)
                .map_err(|_| DriverError::other(format!("unsupported channel count {channels}")))?,
            period_frames: usize::try_from(period).unwrap_or(0),
            buffer_frames: usize::try_from(buffer).unwrap_or(0),
        })
    }
}

impl PcmHandle for AlsaPcm {
    type Negotiation<'a> = AlsaNegotiation<'a>;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn hw_params(&mut self) -> Result<AlsaNegotiation<'_>, DriverError> {
        let hwp = HwParams::any(&self.pcm).map_err(driver_error)?;
        Ok(AlsaNegotiation {
            pcm: &self.pcm,
            hwp,
        })
    }

    fn set_sw_params(&mut self, avail_min: usize, start_threshold: usize) -> Result<(), DriverError> {
        let swp = self.pcm.sw_params_current().map_err(driver_error)?;
        swp.set_avail_min(to_frames(avail_min)).map_err(driver_error)?;
        swp.set_start_threshold(to_frames(start_threshold))
            .map_err(driver_error)?;
        self.pcm.sw_params(&swp).map_err(driver_error)
    }

    fn avail_delay(&mut self) -> Result<(i64, i64), DriverError> {
        let (avail, delay) = self.pcm.avail_delay().map_err(driver_error)?;
        Ok((avail as i64, delay as i64))
    }

    fn write_interleaved(&mut self, samples: &[i16]) -> Result<usize, DriverError> {
        let io = self.pcm.io_i16().map_err(driver_error)?;
        io.writei(samples).map_err(driver_error)
    }

    fn prepare(&mut self) -> Result<(), DriverError> {
        self.pcm.prepare().map_err(driver_error)
    }

    fn drain(&mut self) -> Result<(), DriverError> {
        self.pcm.drain().map_err(driver_error)
    }
}

fn driver_error(e: alsa::Error) -> DriverError {
    if e.errno() == libc::EPIPE {
        DriverError::underrun()
    } else {
        DriverError::other(e.to_string())
    }
}

fn to_frames(frames: usize) -> alsa::pcm::Frames {
    alsa::pcm::Frames::try_from(frames).unwrap_or(alsa::pcm::Frames::MAX)
}

fn direction_tag(direction: Option<Direction>) -> Option<String> {
    direction.map(|d| match d {
        Direction::Playback => "Output".to_string(),
        Direction::Capture => "Input".to_string(),
    })
}
