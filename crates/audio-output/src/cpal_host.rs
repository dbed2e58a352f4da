//! CPAL backend: a blocking-write facade over CPAL's callback model.
//!
//! The worker writes periods into a bounded [`SampleQueue`]; the CPAL callback drains it.
//! The queue plays the role of the hardware ring buffer:
//! - `avail` is the free space, `delay` the queued frames plus the stream's reported latency
//! - playback starts once `start_threshold` frames are queued
//! - running dry after the start is reported as an underrun on the next write
//!
//! `cpal::Stream` is not `Send` on every platform, so each stream lives on its own thread
//! and is dropped there when the handle closes.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::host::{AudioHost, DriverError, EndpointHint, HwCommit, HwNegotiation, PcmHandle};
use crate::queue::{SampleQueue, capacity_for};

const DEFAULT_DEVICE: &str = "default";
const WRITE_STALL_MARGIN: Duration = Duration::from_millis(500);

/// CPAL default host.
#[derive(Clone, Copy, Debug)]
pub struct CpalHost {
    queue_periods: usize,
}

impl CpalHost {
    /// `queue_periods` sizes the staging queue that stands in for the device buffer.
    pub fn new(queue_periods: usize) -> Self {
        Self {
            queue_periods: queue_periods.max(2),
        }
    }
}

impl Default for CpalHost {
    fn default() -> Self {
        Self::new(4)
    }
}

impl AudioHost for CpalHost {
    type Pcm = CpalPcm;

    fn endpoint_hints(&self) -> Result<Vec<EndpointHint>, DriverError> {
        let host = cpal::default_host();
        let mut hints = Vec::new();
        if let Some(default) = host.default_output_device() {
            hints.push(EndpointHint {
                name: Some(DEFAULT_DEVICE.to_string()),
                description: default.description().ok().map(|d| d.to_string()),
                direction: Some("Output".to_string()),
            });
        }
        let devices = host
            .output_devices()
            .map_err(|e| DriverError::other(e.to_string()))?;
        for device in devices {
            let description = device.description().ok().map(|d| d.to_string());
            let name = device.id().ok().map(|id| id.to_string()).or_else(|| description.clone());
            hints.push(EndpointHint {
                name,
                description,
                direction: Some("Output".to_string()),
            });
        }
        Ok(hints)
    }

    fn open_pcm(&self, name: &str) -> Result<CpalPcm, DriverError> {
        let host = cpal::default_host();
        let device = if name == DEFAULT_DEVICE {
            host.default_output_device()
        } else {
            host.output_devices()
                .map_err(|e| DriverError::other(e.to_string()))?
                .find(|d| device_matches(d, name))
        }
        .ok_or_else(|| DriverError::other(format!("No such device: {name}")))?;

        Ok(CpalPcm {
            name: name.to_string(),
            device,
            queue_periods: self.queue_periods,
            shared: None,
            stream: None,
        })
    }
}

fn device_matches(device: &cpal::Device, name: &str) -> bool {
    if device.id().is_ok_and(|id| id.to_string() == name) {
        return true;
    }
    device
        .description()
        .is_ok_and(|d| d.to_string().to_lowercase().contains(&name.to_lowercase()))
}

/// State shared between the writer and the stream callback.
struct StreamShared {
    ring: SampleQueue,
    channels: usize,
    rate_hz: u32,
    start_threshold: AtomicUsize,
    started: AtomicBool,
    underrun: AtomicBool,
    latency_frames: AtomicU64,
    lost: Mutex<Option<String>>,
    /// Longest a write waits for the callback to free space.
    write_timeout: Duration,
}

impl StreamShared {
    fn new(channels: usize, rate_hz: u32, buffer_frames: usize, period_frames: usize) -> Self {
        Self {
            ring: SampleQueue::new(channels, capacity_for(buffer_frames, channels)),
            channels,
            rate_hz,
            start_threshold: AtomicUsize::new(period_frames),
            started: AtomicBool::new(false),
            underrun: AtomicBool::new(false),
            latency_frames: AtomicU64::new(0),
            lost: Mutex::new(None),
            write_timeout: Duration::from_micros(u64::from(frames_to_us(buffer_frames, rate_hz)))
                + WRITE_STALL_MARGIN,
        }
    }

    /// Queue one period. Fails instead of blocking when the callback stopped draining.
    fn write(&self, samples: &[i16]) -> Result<usize, DriverError> {
        if let Some(message) = self.lost() {
            return Err(DriverError::other(message));
        }
        if self.underrun.swap(false, Ordering::AcqRel) {
            return Err(DriverError::underrun());
        }
        let pushed = self.ring.push_timeout(samples, self.write_timeout);
        if pushed < samples.len() {
            if let Some(message) = self.lost() {
                return Err(DriverError::other(message));
            }
            let message = format!("stream stalled: no audio consumed for {:?}", self.write_timeout);
            self.mark_lost(message.clone());
            return Err(DriverError::other(message));
        }
        if !self.started.load(Ordering::Acquire)
            && self.ring.len_frames() >= self.start_threshold.load(Ordering::Acquire)
        {
            self.started.store(true, Ordering::Release);
        }
        Ok(pushed / self.channels)
    }

    fn lost(&self) -> Option<String> {
        self.lost.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn mark_lost(&self, message: String) {
        *self.lost.lock().unwrap_or_else(|e| e.into_inner()) = Some(message);
        self.ring.close();
    }

    /// Fill one callback buffer. Silence before the start threshold is reached and after
    /// the queue runs dry; the latter flags an underrun.
    fn fill<T>(&self, data: &mut [T], scratch: &mut Vec<i16>)
    where
        T: cpal::Sample + cpal::FromSample<i16>,
    {
        if !self.started.load(Ordering::Acquire) {
            data.fill(T::EQUILIBRIUM);
            return;
        }
        if scratch.len() < data.len() {
            scratch.resize(data.len(), 0);
        }
        let got = self.ring.pop_into(&mut scratch[..data.len()]);
        for (dst, src) in data.iter_mut().zip(&scratch[..got]) {
            *dst = T::from_sample(*src);
        }
        if got < data.len() {
            data[got..].fill(T::EQUILIBRIUM);
            self.started.store(false, Ordering::Release);
            self.underrun.store(true, Ordering::Release);
        }
    }

    fn record_latency(&self, latency: Duration) {
        let frames = latency.as_micros() * u128::from(self.rate_hz) / 1_000_000;
        self.latency_frames
            .store(u64::try_from(frames).unwrap_or(u64::MAX), Ordering::Relaxed);
    }
}

struct StreamThread {
    close: Sender<()>,
    join: JoinHandle<()>,
}

/// Output device plus (after commit) its running stream.
pub struct CpalPcm {
    name: String,
    device: cpal::Device,
    queue_periods: usize,
    shared: Option<Arc<StreamShared>>,
    stream: Option<StreamThread>,
}

impl CpalPcm {
    fn shared(&self) -> Result<&Arc<StreamShared>, DriverError> {
        self.shared
            .as_ref()
            .ok_or_else(|| DriverError::other("stream not configured"))
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream.close);
            if stream.join.join().is_err() {
                tracing::warn!(device = %self.name, "cpal stream thread panicked");
            }
        }
    }
}

impl Drop for CpalPcm {
    fn drop(&mut self) {
        if let Some(shared) = &self.shared {
            shared.ring.close();
        }
        self.stop_stream();
    }
}

/// Choice made while negotiating: one supported range at one rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Choice {
    range: usize,
    rate_hz: u32,
}

pub struct CpalNegotiation<'a> {
    pcm: &'a mut CpalPcm,
    ranges: Vec<cpal::SupportedStreamConfigRange>,
    channels: u16,
    choice: Option<Choice>,
    period_frames: usize,
}

impl CpalNegotiation<'_> {
    fn chosen(&self) -> Result<(Choice, &cpal::SupportedStreamConfigRange), DriverError> {
        let choice = self
            .choice
            .ok_or_else(|| DriverError::other("sample rate not set"))?;
        Ok((choice, &self.ranges[choice.range]))
    }
}

impl HwNegotiation for CpalNegotiation<'_> {
    fn set_access_interleaved(&mut self) -> Result<(), DriverError> {
        // CPAL buffers are always interleaved.
        Ok(())
    }

    fn set_format_s16_le(&mut self) -> Result<(), DriverError> {
        if self.ranges.iter().any(|r| sample_format_rank(r.sample_format()).is_some()) {
            Ok(())
        } else {
            Err(DriverError::other("no convertible sample format"))
        }
    }

    fn set_channels(&mut self, channels: u16) -> Result<(), DriverError> {
        if !self.ranges.iter().any(|r| r.channels() == channels) {
            return Err(DriverError::other(format!("{channels} channels not supported")));
        }
        self.channels = channels;
        Ok(())
    }

    fn set_rate_near(&mut self, rate_hz: u32) -> Result<u32, DriverError> {
        let channels = self.channels;
        let choice = self
            .ranges
            .iter()
            .enumerate()
            .filter(|(_, r)| r.channels() == channels)
            .filter_map(|(i, r)| {
                let rank = sample_format_rank(r.sample_format())?;
                let rate = pick_rate_for_range(r.min_sample_rate(), r.max_sample_rate(), rate_hz);
                Some((rate.abs_diff(rate_hz), rank, Choice { range: i, rate_hz: rate }))
            })
            .min_by_key(|(distance, rank, _)| (*distance, *rank))
            .map(|(_, _, choice)| choice)
            .ok_or_else(|| DriverError::other("no usable configuration"))?;
        self.choice = Some(choice);
        Ok(choice.rate_hz)
    }

    fn buffer_time_max_us(&self) -> Result<u32, DriverError> {
        let (choice, range) = self.chosen()?;
        Ok(match range.buffer_size() {
            cpal::SupportedBufferSize::Range { max, .. } => frames_to_us(
                (*max as usize).saturating_mul(self.pcm.queue_periods),
                choice.rate_hz,
            ),
            cpal::SupportedBufferSize::Unknown => u32::MAX,
        })
    }

    fn set_period_time_near(&mut self, period_us: u32) -> Result<u32, DriverError> {
        let (choice, range) = self.chosen()?;
        let wanted = us_to_frames(period_us, choice.rate_hz).max(1);
        let frames = clamp_period(wanted, range.buffer_size());
        self.period_frames = frames;
        Ok(frames_to_us(frames, choice.rate_hz))
    }

    /// The staging queue always holds `queue_periods` periods.
    fn set_buffer_time_near(&mut self, _buffer_us: u32) -> Result<u32, DriverError> {
        let (choice, _) = self.chosen()?;
        Ok(frames_to_us(
            self.period_frames.saturating_mul(self.pcm.queue_periods),
            choice.rate_hz,
        ))
    }

    fn commit(self) -> Result<HwCommit, DriverError> {
        let (choice, range) = self.chosen()?;
        let sample_format = range.sample_format();
        let buffer_size = match range.buffer_size() {
            cpal::SupportedBufferSize::Range { .. } => {
                cpal::BufferSize::Fixed(u32::try_from(self.period_frames).unwrap_or(u32::MAX))
            }
            cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Default,
        };
        let config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: choice.rate_hz,
            buffer_size,
        };
        let period_frames = self.period_frames;
        let buffer_frames = period_frames.saturating_mul(self.pcm.queue_periods);

        self.pcm.stop_stream();
        let shared = Arc::new(StreamShared::new(
            usize::from(self.channels),
            choice.rate_hz,
            buffer_frames,
            period_frames,
        ));
        let stream = spawn_stream(
            &self.pcm.name,
            self.pcm.device.clone(),
            config,
            sample_format,
            shared.clone(),
        )?;
        self.pcm.shared = Some(shared);
        self.pcm.stream = Some(stream);

        Ok(HwCommit {
            rate_hz: choice.rate_hz,
            channels: self.channels,
            period_frames,
            buffer_frames,
        })
    }
}

impl PcmHandle for CpalPcm {
    type Negotiation<'a> = CpalNegotiation<'a>;

    fn name(&self) -> String {
        self.device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| self.name.clone())
    }

    fn hw_params(&mut self) -> Result<CpalNegotiation<'_>, DriverError> {
        let ranges: Vec<cpal::SupportedStreamConfigRange> = self
            .device
            .supported_output_configs()
            .map_err(|e| DriverError::other(e.to_string()))?
            .collect();
        if ranges.is_empty() {
            return Err(DriverError::other("No supported output configs"));
        }
        Ok(CpalNegotiation {
            pcm: self,
            ranges,
            channels: 0,
            choice: None,
            period_frames: 0,
        })
    }

    /// Only the start threshold matters: writes already block on queue space.
    fn set_sw_params(&mut self, _avail_min: usize, start_threshold: usize) -> Result<(), DriverError> {
        self.shared()?
            .start_threshold
            .store(start_threshold.max(1), Ordering::Release);
        Ok(())
    }

    fn avail_delay(&mut self) -> Result<(i64, i64), DriverError> {
        let shared = self.shared()?;
        if let Some(message) = shared.lost() {
            return Err(DriverError::other(message));
        }
        let avail = shared.ring.free_frames() as i64;
        let latency = i64::try_from(shared.latency_frames.load(Ordering::Relaxed)).unwrap_or(0);
        let queued = shared.ring.len_frames() as i64;
        let delay = if shared.started.load(Ordering::Acquire) {
            queued + latency
        } else {
            queued
        };
        Ok((avail, delay))
    }

    fn write_interleaved(&mut self, samples: &[i16]) -> Result<usize, DriverError> {
        self.shared()?.write(samples)
    }

    fn prepare(&mut self) -> Result<(), DriverError> {
        let shared = self.shared()?;
        shared.ring.clear();
        shared.underrun.store(false, Ordering::Release);
        shared.started.store(false, Ordering::Release);
        Ok(())
    }

    fn drain(&mut self) -> Result<(), DriverError> {
        let shared = self.shared()?;
        if shared.ring.len_frames() == 0 {
            return Ok(());
        }
        shared.started.store(true, Ordering::Release);
        let queued = Duration::from_micros(u64::from(frames_to_us(
            shared.ring.max_frames(),
            shared.rate_hz,
        )));
        if shared.ring.wait_until_empty(queued + Duration::from_millis(500)) {
            Ok(())
        } else {
            Err(DriverError::other("drain timed out"))
        }
    }
}

/// Build and run the stream on its own thread; returns once it is playing.
fn spawn_stream(
    name: &str,
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: Arc<StreamShared>,
) -> Result<StreamThread, DriverError> {
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), DriverError>>(1);
    let (close_tx, close_rx) = crossbeam_channel::bounded::<()>(0);
    let device_name = name.to_string();

    let join = std::thread::Builder::new()
        .name("audio-output-cpal".to_string())
        .spawn(move || {
            let stream = match build_output_stream(&device, &config, sample_format, shared) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(DriverError::other(e.to_string())));
                return;
            }
            tracing::debug!(device = %device_name, ?config, ?sample_format, "cpal stream running");
            let _ = ready_tx.send(Ok(()));
            // Park until the handle is closed (sender dropped).
            let _ = close_rx.recv();
            drop(stream);
        })
        .map_err(|e| DriverError::other(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(StreamThread {
            close: close_tx,
            join,
        }),
        Ok(Err(e)) => {
            let _ = join.join();
            Err(e)
        }
        Err(_) => {
            let _ = join.join();
            Err(DriverError::other("cpal stream thread exited"))
        }
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: Arc<StreamShared>,
) -> Result<cpal::Stream, DriverError> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared),
        other => Err(DriverError::other(format!("Unsupported sample format: {other:?}"))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<StreamShared>,
) -> Result<cpal::Stream, DriverError>
where
    T: cpal::SizedSample + cpal::FromSample<i16> + Send + 'static,
{
    let mut scratch: Vec<i16> = Vec::new();
    let shared_cb = shared.clone();
    let shared_err = shared;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
                let ts = info.timestamp();
                if let Some(latency) = ts.playback.duration_since(&ts.callback) {
                    shared_cb.record_latency(latency);
                }
                shared_cb.fill(data, &mut scratch);
            },
            move |err| match err {
                cpal::StreamError::DeviceNotAvailable => {
                    tracing::warn!("stream error: {err}");
                    shared_err.mark_lost(err.to_string());
                }
                other => tracing::warn!("stream error: {other}"),
            },
            None,
        )
        .map_err(|e| DriverError::other(e.to_string()))
}

/// Preference among the formats the callback can convert `i16` into (lower is better).
fn sample_format_rank(format: cpal::SampleFormat) -> Option<u8> {
    match format {
        cpal::SampleFormat::I16 => Some(0),
        cpal::SampleFormat::F32 => Some(1),
        cpal::SampleFormat::I32 => Some(2),
        cpal::SampleFormat::U16 => Some(3),
        _ => None,
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn clamp_period(frames: usize, buffer_size: &cpal::SupportedBufferSize) -> usize {
    match buffer_size {
        cpal::SupportedBufferSize::Range { min, max } => {
            frames.clamp(*min as usize, (*max as usize).max(*min as usize))
        }
        cpal::SupportedBufferSize::Unknown => frames,
    }
}

fn us_to_frames(us: u32, rate_hz: u32) -> usize {
    (u64::from(us) * u64::from(rate_hz) / 1_000_000) as usize
}

fn frames_to_us(frames: usize, rate_hz: u32) -> u32 {
    if rate_hz == 0 {
        return 0;
    }
    let us = frames as u64 * 1_000_000 / u64::from(rate_hz);
    u32::try_from(us).unwrap_or(u32::MAX)
}
