//! Minimal [`ChunkSource`] backed by a [`SampleQueue`].
//!
//! It serves frames in arrival order and ignores the render delay, which is enough for
//! piping raw PCM into the engine. Time-aligned sources (network jitter buffers) implement
//! [`ChunkSource`] themselves.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::contract::{ChunkSource, StreamFormat};
use crate::queue::{SampleQueue, capacity_for};

pub struct QueuedSource {
    format: StreamFormat,
    queue: Arc<SampleQueue>,
    last_delay_us: AtomicU64,
}

impl QueuedSource {
    /// Source holding up to `buffer` of audio.
    pub fn new(format: StreamFormat, buffer: Duration) -> Self {
        let frames = (u128::from(format.sample_rate_hz) * buffer.as_micros() / 1_000_000) as usize;
        let queue = SampleQueue::new(
            usize::from(format.channels),
            capacity_for(frames, usize::from(format.channels)),
        );
        Self {
            format,
            queue: Arc::new(queue),
            last_delay_us: AtomicU64::new(0),
        }
    }

    /// Producer side of the source.
    pub fn queue(&self) -> Arc<SampleQueue> {
        self.queue.clone()
    }

    /// Render delay of the most recent request.
    pub fn last_render_delay(&self) -> Duration {
        Duration::from_micros(self.last_delay_us.load(Ordering::Relaxed))
    }
}

impl ChunkSource for QueuedSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn request_chunk(&self, out: &mut [i16], render_delay: Duration, frames: usize) -> bool {
        self.last_delay_us.store(
            u64::try_from(render_delay.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        if self.queue.pop_exact(out, frames) {
            return true;
        }
        // Flush the tail once the producer is finished, padding with silence.
        if self.queue.is_done() && self.queue.len_frames() > 0 {
            let want = (frames * self.queue.channels()).min(out.len());
            let got = self.queue.pop_into(&mut out[..want]);
            out[got..want].fill(0);
            return true;
        }
        false
    }
}
