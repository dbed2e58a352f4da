//! In-memory host used by the unit tests.
//!
//! Records every device call, counts open handles and lets a test script open failures,
//! negotiation rejections, write results and reported latencies.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{AudioHost, DriverError, EndpointHint, HwCommit, HwNegotiation, PcmHandle};
use crate::error::HwParam;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum FakeEvent {
    Open { device: String },
    HwParams {
        channels: u16,
        rate_hz: u32,
        period_us: u32,
        buffer_us: u32,
    },
    SwParams {
        avail_min: usize,
        start_threshold: usize,
    },
    Probe { avail: i64, delay: i64 },
    Write { frames: usize },
    Prepare,
    Drain,
    Close,
}

struct Behavior {
    hints: Result<Vec<EndpointHint>, DriverError>,
    failing_opens: usize,
    reject: Option<HwParam>,
    buffer_time_max_us: u32,
    period_frames: Option<usize>,
    rate_override: Option<u32>,
    writes: VecDeque<Result<usize, DriverError>>,
    delay_errors: VecDeque<DriverError>,
    write_delay: Duration,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            hints: Ok(Vec::new()),
            failing_opens: 0,
            reject: None,
            buffer_time_max_us: 2_000_000,
            period_frames: None,
            rate_override: None,
            writes: VecDeque::new(),
            delay_errors: VecDeque::new(),
            write_delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct Shared {
    behavior: Mutex<Behavior>,
    events: Mutex<Vec<FakeEvent>>,
    open_handles: AtomicI64,
    total_opened: AtomicU64,
}

impl Shared {
    fn behavior(&self) -> MutexGuard<'_, Behavior> {
        self.behavior.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: FakeEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    fn check(&self, step: HwParam) -> Result<(), DriverError> {
        if self.behavior().reject == Some(step) {
            return Err(DriverError::other(format!("Invalid argument ({step})")));
        }
        Ok(())
    }
}

/// Scriptable fake host. Clones share state, so a test keeps one clone for inspection.
#[derive(Clone, Default)]
pub(crate) struct FakeHost {
    shared: Arc<Shared>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_hints(&self, hints: Vec<EndpointHint>) {
        self.shared.behavior().hints = Ok(hints);
    }

    pub(crate) fn fail_enumeration(&self) {
        self.shared.behavior().hints = Err(DriverError::other("No such file or directory"));
    }

    /// Fail the next `count` opens.
    pub(crate) fn fail_opens(&self, count: usize) {
        self.shared.behavior().failing_opens = count;
    }

    pub(crate) fn reject(&self, step: HwParam) {
        self.shared.behavior().reject = Some(step);
    }

    pub(crate) fn set_buffer_time_max_us(&self, us: u32) {
        self.shared.behavior().buffer_time_max_us = us;
    }

    /// Report this period size after commit instead of deriving it from the period time.
    pub(crate) fn set_period_frames(&self, frames: usize) {
        self.shared.behavior().period_frames = Some(frames);
    }

    /// Accept this rate whatever rate is requested.
    pub(crate) fn set_rate_override(&self, rate_hz: u32) {
        self.shared.behavior().rate_override = Some(rate_hz);
    }

    /// Results for the next writes; once exhausted every write succeeds.
    pub(crate) fn script_writes(&self, results: Vec<Result<usize, DriverError>>) {
        self.shared.behavior().writes = results.into();
    }

    /// Errors returned by the next `avail_delay` calls, in order.
    pub(crate) fn script_delay_errors(&self, errors: Vec<DriverError>) {
        self.shared.behavior().delay_errors = errors.into();
    }

    /// Make each write block for `delay`, like a device consuming a period.
    pub(crate) fn set_write_delay(&self, delay: Duration) {
        self.shared.behavior().write_delay = delay;
    }

    pub(crate) fn events(&self) -> Vec<FakeEvent> {
        self.shared
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn open_handles(&self) -> i64 {
        self.shared.open_handles.load(Ordering::SeqCst)
    }

    pub(crate) fn total_opened(&self) -> u64 {
        self.shared.total_opened.load(Ordering::SeqCst)
    }
}

impl AudioHost for FakeHost {
    type Pcm = FakePcm;

    fn endpoint_hints(&self) -> Result<Vec<EndpointHint>, DriverError> {
        self.shared.behavior().hints.clone()
    }

    fn open_pcm(&self, name: &str) -> Result<FakePcm, DriverError> {
        {
            let mut b = self.shared.behavior();
            if b.failing_opens > 0 {
                b.failing_opens -= 1;
                return Err(DriverError::other("No such device"));
            }
        }
        self.shared.record(FakeEvent::Open {
            device: name.to_string(),
        });
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        self.shared.total_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakePcm {
            shared: self.shared.clone(),
            name: name.to_string(),
            committed: None,
            queued_frames: 0,
        })
    }
}

pub(crate) struct FakePcm {
    shared: Arc<Shared>,
    name: String,
    committed: Option<HwCommit>,
    queued_frames: i64,
}

impl Drop for FakePcm {
    fn drop(&mut self) {
        self.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
        self.shared.record(FakeEvent::Close);
    }
}

pub(crate) struct FakeNegotiation<'a> {
    pcm: &'a mut FakePcm,
    channels: u16,
    rate_hz: u32,
    period_us: u32,
    buffer_us: u32,
}

impl HwNegotiation for FakeNegotiation<'_> {
    fn set_access_interleaved(&mut self) -> Result<(), DriverError> {
        self.pcm.shared.check(HwParam::Access)
    }

    fn set_format_s16_le(&mut self) -> Result<(), DriverError> {
        self.pcm.shared.check(HwParam::SampleFormat)
    }

    fn set_channels(&mut self, channels: u16) -> Result<(), DriverError> {
        self.pcm.shared.check(HwParam::Channels)?;
        self.channels = channels;
        Ok(())
    }

    fn set_rate_near(&mut self, rate_hz: u32) -> Result<u32, DriverError> {
        self.pcm.shared.check(HwParam::SampleRate)?;
        self.rate_hz = self.pcm.shared.behavior().rate_override.unwrap_or(rate_hz);
        Ok(self.rate_hz)
    }

    fn buffer_time_max_us(&self) -> Result<u32, DriverError> {
        self.pcm.shared.check(HwParam::Timing)?;
        Ok(self.pcm.shared.behavior().buffer_time_max_us)
    }

    fn set_period_time_near(&mut self, period_us: u32) -> Result<u32, DriverError> {
        self.period_us = period_us;
        Ok(period_us)
    }

    fn set_buffer_time_near(&mut self, buffer_us: u32) -> Result<u32, DriverError> {
        self.buffer_us = buffer_us;
        Ok(buffer_us)
    }

    fn commit(self) -> Result<HwCommit, DriverError> {
        self.pcm.shared.check(HwParam::HardwareCommit)?;
        self.pcm.shared.record(FakeEvent::HwParams {
            channels: self.channels,
            rate_hz: self.rate_hz,
            period_us: self.period_us,
            buffer_us: self.buffer_us,
        });
        let derived = (u64::from(self.period_us) * u64::from(self.rate_hz) / 1_000_000) as usize;
        let period_frames = self.pcm.shared.behavior().period_frames.unwrap_or(derived);
        let periods = if self.period_us == 0 {
            1
        } else {
            (self.buffer_us / self.period_us).max(1) as usize
        };
        let commit = HwCommit {
            rate_hz: self.rate_hz,
            channels: self.channels,
            period_frames,
            buffer_frames: period_frames * periods,
        };
        self.pcm.committed = Some(commit);
        Ok(commit)
    }
}

impl PcmHandle for FakePcm {
    type Negotiation<'a> = FakeNegotiation<'a>;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn hw_params(&mut self) -> Result<FakeNegotiation<'_>, DriverError> {
        self.shared.check(HwParam::Defaults)?;
        Ok(FakeNegotiation {
            pcm: self,
            channels: 0,
            rate_hz: 0,
            period_us: 0,
            buffer_us: 0,
        })
    }

    fn set_sw_params(&mut self, avail_min: usize, start_threshold: usize) -> Result<(), DriverError> {
        self.shared.check(HwParam::SoftwareParams)?;
        self.shared.record(FakeEvent::SwParams {
            avail_min,
            start_threshold,
        });
        Ok(())
    }

    /// Reports the frames written so far, capped at the buffer size.
    fn avail_delay(&mut self) -> Result<(i64, i64), DriverError> {
        let scripted = self.shared.behavior().delay_errors.pop_front();
        if let Some(e) = scripted {
            if e.is_underrun() {
                self.queued_frames = 0;
            }
            return Err(e);
        }
        let buffer = self.committed.map(|c| c.buffer_frames as i64).unwrap_or(0);
        let delay = self.queued_frames.min(buffer);
        let avail = buffer - delay;
        self.shared.record(FakeEvent::Probe { avail, delay });
        Ok((avail, delay))
    }

    fn write_interleaved(&mut self, samples: &[i16]) -> Result<usize, DriverError> {
        let channels = self.committed.map(|c| usize::from(c.channels)).unwrap_or(1).max(1);
        let frames = samples.len() / channels;
        let (scripted, delay) = {
            let mut b = self.shared.behavior();
            (b.writes.pop_front(), b.write_delay)
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.shared.record(FakeEvent::Write { frames });
        let result = scripted.unwrap_or(Ok(frames));
        match &result {
            Ok(n) => self.queued_frames += *n as i64,
            Err(e) if e.is_underrun() => self.queued_frames = 0,
            Err(_) => {}
        }
        result
    }

    fn prepare(&mut self) -> Result<(), DriverError> {
        self.shared.record(FakeEvent::Prepare);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), DriverError> {
        self.shared.record(FakeEvent::Drain);
        self.queued_frames = 0;
        Ok(())
    }
}
