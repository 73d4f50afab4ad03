//! Bounded sample queue between the output stage and the CPAL callback.
//!
//! The output stage pushes converted samples (blocking, optionally with a deadline);
//! the callback drains without blocking and plays silence on underrun. `close()` wakes
//! every waiter so a stream teardown never leaves a writer parked.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Interleaved `f32` samples for one open stream. Channel count is fixed per queue.
pub struct SampleQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_samples: usize,
    low_watermark_ms: AtomicU64,
}

struct QueueInner {
    samples: VecDeque<f32>,
    closed: bool,
}

/// Outcome of [`SampleQueue::push_until`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Every sample was queued.
    Complete,
    /// The deadline passed with `pushed` samples queued.
    TimedOut { pushed: usize },
    /// The queue was closed with `pushed` samples queued.
    Closed { pushed: usize },
}

/// Queue capacity in samples for `seconds` of audio (fallback 0.5 s on bad input).
pub fn capacity_for(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let secs = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        0.5
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels.max(1))
}

impl SampleQueue {
    pub fn new(channels: usize, max_samples: usize) -> Self {
        Self {
            channels: channels.max(1),
            inner: Mutex::new(QueueInner {
                samples: VecDeque::with_capacity(max_samples),
                closed: false,
            }),
            cv: Condvar::new(),
            max_samples: max_samples.max(1),
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn len_samples(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Mark the queue closed and wake all waiters. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.cv.notify_all();
    }

    /// Queue `samples`, blocking while full. `deadline = None` waits indefinitely.
    pub fn push_until(&self, samples: &[f32], deadline: Option<Instant>) -> PushOutcome {
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.lock();
            while g.samples.len() >= self.max_samples && !g.closed {
                g = match deadline {
                    None => self.cv.wait(g).unwrap_or_else(PoisonError::into_inner),
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return PushOutcome::TimedOut { pushed: offset };
                        }
                        self.cv
                            .wait_timeout(g, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                };
            }
            if g.closed {
                return PushOutcome::Closed { pushed: offset };
            }
            let room = self.max_samples - g.samples.len();
            let take = room.min(samples.len() - offset);
            g.samples.extend(&samples[offset..offset + take]);
            offset += take;
            drop(g);
            self.cv.notify_all();
        }
        PushOutcome::Complete
    }

    /// Up to `max_frames` whole frames without blocking; `None` when fewer than one frame
    /// is buffered.
    pub fn pop_nonblocking(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take_frames = (g.samples.len() / self.channels).min(max_frames);
        if take_frames == 0 {
            return None;
        }
        let out: Vec<f32> = g.samples.drain(..take_frames * self.channels).collect();
        let queued = g.samples.len();
        drop(g);
        self.cv.notify_all();
        self.log_low_watermark(queued);
        Some(out)
    }

    /// Block until the queue is empty (or closed) or `timeout` elapses.
    /// Returns `true` when the queue drained.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.lock();
        loop {
            if g.samples.is_empty() || g.closed {
                return g.samples.is_empty();
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            g = self
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_low_watermark(&self, queued: usize) {
        let threshold = (self.max_samples / 8).max(self.channels * 16);
        if queued == 0 || queued >= threshold {
            return;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let last = self.low_watermark_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) > 1000 {
            self.low_watermark_ms.store(now, Ordering::Relaxed);
            tracing::debug!(
                queued_samples = queued,
                threshold_samples = threshold,
                "sample queue low watermark"
            );
        }
    }
}
