//! Contract between the playback worker and the upstream chunk source.
//!
//! The worker never pulls "the next chunk". It measures how many frames are still
//! queued in the device, converts that backlog into a render delay and asks the
//! source for the `frames` frames that must become audible once that delay has elapsed.
//! Any resampling or drift compensation needed to honor the request is the source's job.

use std::time::Duration;

/// PCM layout delivered by the upstream source. Samples are always interleaved S16_LE.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate_hz: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub const BITS_PER_SAMPLE: u16 = 16;

    pub fn new(sample_rate_hz: u32, channels: u16) -> Self {
        Self {
            sample_rate_hz,
            channels,
        }
    }

    /// Bytes per interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.channels) * usize::from(Self::BITS_PER_SAMPLE / 8)
    }
}

/// Upstream provider of time-aligned PCM.
///
/// Shared between the controller and the worker thread; implementations handle their own
/// synchronization.
pub trait ChunkSource: Send + Sync {
    /// Format of the stream, queried once per session open.
    fn format(&self) -> StreamFormat;

    /// Fill `out` with `frames` interleaved frames that should play `render_delay` from now.
    ///
    /// `out` holds at least `frames * channels` samples. Returns `false` when no audio is
    /// available; the worker retries later.
    fn request_chunk(&self, out: &mut [i16], render_delay: Duration, frames: usize) -> bool;
}

/// Convert a backlog of unplayed frames into a render delay.
///
/// `1_000_000 * frames_delay / rate_hz` microseconds, rounded down. A negative backlog
/// (reported by some drivers right after an underrun) and a zero rate both yield zero.
pub fn render_delay(frames_delay: i64, rate_hz: u32) -> Duration {
    if frames_delay <= 0 || rate_hz == 0 {
        return Duration::ZERO;
    }
    let micros = (frames_delay as u128 * 1_000_000) / u128::from(rate_hz);
    Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
}
