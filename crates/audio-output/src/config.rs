use std::time::Duration;

/// Output tuning parameters shared by the session, the worker and the backends.
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// Upper bound for the hardware buffer time; the device maximum is used when lower.
    pub max_buffer_time: Duration,
    /// Number of periods the buffer is split into.
    pub periods: u32,
    /// Retry policy for the worker's recoverable failures.
    pub retry: RetryPolicy,
    /// Size of the CPAL backend's staging queue, in periods.
    pub cpal_queue_periods: usize,
}

impl Default for OutputConfig {
    /// 100 ms of hardware buffering split in 4 periods, retried every 100 ms.
    fn default() -> Self {
        Self {
            max_buffer_time: Duration::from_millis(100),
            periods: 4,
            retry: RetryPolicy::default(),
            cpal_queue_periods: 4,
        }
    }
}

impl OutputConfig {
    /// Target buffer time in microseconds, saturated to the driver's `u32` range.
    pub fn max_buffer_time_us(&self) -> u32 {
        u32::try_from(self.max_buffer_time.as_micros()).unwrap_or(u32::MAX)
    }

    /// Period count, never zero.
    pub fn periods(&self) -> u32 {
        self.periods.max(1)
    }
}

/// How the worker throttles retries after an open failure or a missing chunk.
///
/// Retries are unbounded; only the spacing is configurable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
        }
    }
}
