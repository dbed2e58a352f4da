//! Thread-safe bounded queue for interleaved `i16` samples.
//!
//! Used in two places:
//! - stdin/network producer → [`crate::source::QueuedSource`]
//! - playback worker → CPAL callback (the blocking-write facade in [`crate::cpal_host`])
//!
//! Shutdown is deterministic: `close()` wakes every waiter and producers stop early.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Bounded FIFO of interleaved samples.
///
/// ## Design
/// - Multiple producers / multiple consumers.
/// - Bounded by `max_buffered_samples` to cap memory and latency.
/// - A single [`Condvar`] signals any state change; the `done` flag lives under the same
///   mutex as the samples to avoid lost wakeups.
pub struct SampleQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_buffered_samples: usize,
}

struct QueueInner {
    queue: VecDeque<i16>,
    done: bool,
}

/// Queue capacity in **samples** for `frames` frames of `channels` channels.
pub fn capacity_for(frames: usize, channels: usize) -> usize {
    frames.max(1).saturating_mul(channels.max(1))
}

impl SampleQueue {
    pub fn new(channels: usize, max_buffered_samples: usize) -> Self {
        Self {
            channels: channels.max(1),
            inner: Mutex::new(QueueInner {
                queue: VecDeque::with_capacity(max_buffered_samples),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Capacity in frames.
    pub fn max_frames(&self) -> usize {
        self.max_buffered_samples / self.channels
    }

    /// Buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().queue.len() / self.channels
    }

    /// Free space in frames (best-effort snapshot).
    pub fn free_frames(&self) -> usize {
        let queued = self.lock().queue.len();
        self.max_buffered_samples.saturating_sub(queued) / self.channels
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Mark the queue as finished and wake all waiters. Idempotent.
    pub fn close(&self) {
        self.lock().done = true;
        self.cv.notify_all();
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.lock().queue.clear();
        self.cv.notify_all();
    }

    /// Push samples, blocking while the queue is full.
    ///
    /// Returns the number of samples accepted; less than `samples.len()` only when the
    /// queue was closed while waiting.
    pub fn push_blocking(&self, samples: &[i16]) -> usize {
        self.push_until(samples, None)
    }

    /// Like [`SampleQueue::push_blocking`], but gives up once no space has been freed
    /// for `timeout`.
    pub fn push_timeout(&self, samples: &[i16], timeout: Duration) -> usize {
        self.push_until(samples, Some(timeout))
    }

    fn push_until(&self, samples: &[i16], stall: Option<Duration>) -> usize {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.lock();
            let deadline = stall.map(|t| Instant::now() + t);
            while g.queue.len() >= self.max_buffered_samples && !g.done {
                match deadline {
                    None => g = self.cv.wait(g).unwrap_or_else(|e| e.into_inner()),
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return offset;
                        }
                        let (ng, _timeout) = self
                            .cv
                            .wait_timeout(g, deadline - now)
                            .unwrap_or_else(|e| e.into_inner());
                        g = ng;
                    }
                }
            }
            if g.done {
                return offset;
            }

            let room = self.max_buffered_samples - g.queue.len();
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            self.cv.notify_all();
        }
        offset
    }

    /// Pop exactly `frames` frames into `out` without blocking.
    ///
    /// Returns `false` and leaves the queue untouched when fewer frames are buffered.
    pub fn pop_exact(&self, out: &mut [i16], frames: usize) -> bool {
        let want = frames * self.channels;
        if out.len() < want {
            return false;
        }
        let mut g = self.lock();
        if g.queue.len() < want {
            return false;
        }
        for (dst, src) in out[..want].iter_mut().zip(g.queue.drain(..want)) {
            *dst = src;
        }
        drop(g);
        self.cv.notify_all();
        true
    }

    /// Pop up to `out.len()` samples (whole frames only) without blocking.
    ///
    /// Returns the number of samples copied.
    pub fn pop_into(&self, out: &mut [i16]) -> usize {
        let mut g = self.lock();
        let available = g.queue.len() - g.queue.len() % self.channels;
        let take = available.min(out.len() - out.len() % self.channels);
        if take == 0 {
            return 0;
        }
        for (dst, src) in out[..take].iter_mut().zip(g.queue.drain(..take)) {
            *dst = src;
        }
        drop(g);
        self.cv.notify_all();
        take
    }

    /// Block until the queue is empty or `timeout` elapses. Returns `true` when empty.
    pub fn wait_until_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        while !g.queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (ng, _timeout) = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            g = ng;
        }
        true
    }
}
