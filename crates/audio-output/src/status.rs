use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::session::{NegotiatedFormat, PeriodGeometry};

/// Shared output status updated by the playback worker.
#[derive(Debug, Default)]
pub struct OutputStatusState {
    session: Mutex<SessionInfo>,
    /// Frames accepted by the device.
    pub frames_written: AtomicU64,
    /// Underruns recovered with a prepare.
    pub underrun_events: AtomicU64,
    /// Successful session opens (the first one included).
    pub opens: AtomicU64,
    /// Failed open attempts.
    pub open_failures: AtomicU64,
    /// Sessions torn down after a fatal write or probe.
    pub fatal_errors: AtomicU64,
    /// Requests the upstream source could not satisfy.
    pub chunk_misses: AtomicU64,
    /// Render delay passed with the latest chunk request.
    pub last_delay_us: AtomicU64,
}

#[derive(Debug, Default)]
struct SessionInfo {
    device: Option<String>,
    negotiated: Option<NegotiatedFormat>,
    geometry: Option<PeriodGeometry>,
    last_error: Option<String>,
}

/// Point-in-time copy of [`OutputStatusState`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Device of the open session, if any.
    pub device: Option<String>,
    /// Rate the device actually runs at.
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub period_frames: Option<usize>,
    pub buffer_time_us: Option<u32>,
    pub frames_written: u64,
    pub underrun_events: u64,
    pub opens: u64,
    pub open_failures: u64,
    pub fatal_errors: u64,
    pub chunk_misses: u64,
    pub last_delay_us: u64,
    pub last_error: Option<String>,
}

impl OutputStatusState {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn session(&self) -> MutexGuard<'_, SessionInfo> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a freshly opened session.
    pub fn session_opened(&self, device: &str, negotiated: NegotiatedFormat, geometry: PeriodGeometry) {
        self.opens.fetch_add(1, Ordering::Relaxed);
        let mut s = self.session();
        s.device = Some(device.to_string());
        s.negotiated = Some(negotiated);
        s.geometry = Some(geometry);
    }

    /// Forget the session-specific fields; counters are kept.
    pub fn session_closed(&self) {
        let mut s = self.session();
        s.device = None;
        s.negotiated = None;
        s.geometry = None;
    }

    pub fn record_error(&self, error: impl ToString) {
        self.session().last_error = Some(error.to_string());
    }

    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let s = self.session();
        StatusSnapshot {
            device: s.device.clone(),
            sample_rate: s.negotiated.map(|n| n.rate_hz),
            channels: s.negotiated.map(|n| n.channels),
            period_frames: s.geometry.map(|g| g.period_frames),
            buffer_time_us: s.geometry.map(|g| g.buffer_time_us),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            underrun_events: self.underrun_events.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
            chunk_misses: self.chunk_misses.load(Ordering::Relaxed),
            last_delay_us: self.last_delay_us.load(Ordering::Relaxed),
            last_error: s.last_error.clone(),
        }
    }
}
