//! Playback worker: the real-time loop driving one output device.
//!
//! Each iteration:
//! 1. opens the device if no session is open (throttled retry on failure)
//! 2. probes the unplayed backlog and converts it to a render delay
//! 3. asks the source for one period of audio due after that delay
//! 4. writes it, recovering underruns in place and reopening after fatal errors
//!
//! The loop owns the session exclusively. Stop is cooperative: it is checked at the top of
//! every iteration and interrupts the retry sleeps.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::catalog::OutputDeviceDescriptor;
use crate::config::OutputConfig;
use crate::contract::{ChunkSource, render_delay};
use crate::error::OutputError;
use crate::host::AudioHost;
use crate::session::{DeviceSession, WriteOutcome};
use crate::status::OutputStatusState;

/// Controller half of the stop signal. Dropping it (or calling [`StopSignal::stop`])
/// stops the worker.
pub struct StopSignal {
    tx: Option<Sender<()>>,
}

/// Worker half of the stop signal.
#[derive(Clone)]
pub struct StopToken {
    rx: Receiver<()>,
}

/// Create a connected stop signal and token.
pub fn stop_channel() -> (StopSignal, StopToken) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (StopSignal { tx: Some(tx) }, StopToken { rx })
}

impl StopSignal {
    pub fn stop(&mut self) {
        self.tx.take();
    }
}

impl StopToken {
    pub fn is_stopped(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `interval` unless stopped first. Returns `true` when stopped.
    pub fn sleep(&self, interval: Duration) -> bool {
        !matches!(self.rx.recv_timeout(interval), Err(RecvTimeoutError::Timeout))
    }
}

/// Session lifecycle as seen by the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Closed,
    Opening,
    Running,
}

/// What the loop does after one iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Continue,
    /// Wait for the retry interval before the next iteration.
    Throttle,
}

pub(crate) struct PlaybackWorker<H: AudioHost> {
    host: Arc<H>,
    device: OutputDeviceDescriptor,
    source: Arc<dyn ChunkSource>,
    config: OutputConfig,
    status: Arc<OutputStatusState>,
    session: Option<DeviceSession<H::Pcm>>,
    state: WorkerState,
}

impl<H: AudioHost> PlaybackWorker<H> {
    pub(crate) fn new(
        host: Arc<H>,
        device: OutputDeviceDescriptor,
        source: Arc<dyn ChunkSource>,
        config: OutputConfig,
        status: Arc<OutputStatusState>,
    ) -> Self {
        Self {
            host,
            device,
            source,
            config,
            status,
            session: None,
            state: WorkerState::Closed,
        }
    }

    /// Run until `stop` fires and hand the still-open session (if any) back to the caller.
    pub(crate) fn run(mut self, stop: StopToken) -> Option<DeviceSession<H::Pcm>> {
        tracing::info!(device = %self.device.id, "output worker started");
        while !stop.is_stopped() {
            if self.step() == Step::Throttle && stop.sleep(self.config.retry.interval) {
                break;
            }
        }
        tracing::info!(device = %self.device.id, "output worker stopped");
        self.session.take()
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.state
    }

    /// One iteration of the loop.
    pub(crate) fn step(&mut self) -> Step {
        if self.session.is_none() && !self.open_session() {
            return Step::Throttle;
        }
        let Some(session) = self.session.as_mut() else {
            return Step::Throttle;
        };

        let (avail, delay_frames) = match session.query_available_and_delay() {
            Ok(probe) => probe,
            Err(OutputError::Underrun) => return self.recover_underrun(),
            Err(e) => return self.fail(e),
        };
        let delay = render_delay(delay_frames, session.negotiated().rate_hz);
        tracing::trace!(
            avail,
            delay = delay_frames,
            delay_ms = delay.as_millis() as u64,
            "pcm latency"
        );
        self.status
            .last_delay_us
            .store(delay.as_micros() as u64, Ordering::Relaxed);

        let frames = session.geometry().period_frames;
        let Some(buffer) = session.buffer_mut() else {
            return self.fail(OutputError::SessionClosed);
        };
        if !self.source.request_chunk(buffer, delay, frames) {
            tracing::info!("{}", OutputError::ChunkUnavailable);
            OutputStatusState::add(&self.status.chunk_misses, 1);
            return Step::Throttle;
        }

        match session.write(frames) {
            WriteOutcome::Written(written) => {
                OutputStatusState::add(&self.status.frames_written, written as u64);
                Step::Continue
            }
            WriteOutcome::Underrun => self.recover_underrun(),
            WriteOutcome::Fatal(message) => self.fail(OutputError::WriteFatal(message)),
        }
    }

    /// Prepare the device once and keep the session.
    fn recover_underrun(&mut self) -> Step {
        tracing::warn!(device = %self.device.id, "{}", OutputError::Underrun);
        OutputStatusState::add(&self.status.underrun_events, 1);
        let Some(session) = self.session.as_mut() else {
            return Step::Continue;
        };
        match session.recover_underrun() {
            Ok(()) => Step::Continue,
            Err(e) => self.fail(e),
        }
    }

    fn open_session(&mut self) -> bool {
        self.state = WorkerState::Opening;
        let format = self.source.format();
        match DeviceSession::open(self.host.as_ref(), &self.device.id, format, &self.config) {
            Ok(session) => {
                tracing::info!(
                    device = %self.device.id,
                    rate_hz = session.negotiated().rate_hz,
                    channels = session.negotiated().channels,
                    period_frames = session.geometry().period_frames,
                    "output session opened"
                );
                self.status
                    .session_opened(&self.device.id, session.negotiated(), session.geometry());
                self.state = WorkerState::Running;
                self.session = Some(session);
                true
            }
            Err(e) => {
                tracing::error!(device = %self.device.id, "open failed: {e}");
                OutputStatusState::add(&self.status.open_failures, 1);
                self.status.record_error(&e);
                self.state = WorkerState::Closed;
                false
            }
        }
    }

    /// Log and record `error`; tear the session down when it cannot be reused.
    fn fail(&mut self, error: OutputError) -> Step {
        tracing::error!(device = %self.device.id, "{error}");
        self.status.record_error(&error);
        if error.requires_reopen() {
            OutputStatusState::add(&self.status.fatal_errors, 1);
            self.close_session();
        }
        Step::Continue
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            self.status.session_closed();
        }
        self.state = WorkerState::Closed;
    }
}
