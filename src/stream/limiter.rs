//! Byte-rate limiting reader.
//!
//! A token bucket refilled at the normal rate. The bucket holds at most
//! `min(burst, normal * max_ratio)` bytes, which bounds how far a short
//! burst can run ahead of the sustained rate. Reads are granted at most the
//! tokens available and otherwise wait for the bucket to refill.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::Sleep;

use crate::config::SpeedLimiterConfig;

/// Largest single read handed to the inner reader.
const MAX_READ_CHUNK: usize = 16 * 1024;

/// Smallest grant worth waking up for, unless the caller wants less.
const MIN_GRANT: usize = 1024;

/// Limiter tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterSettings {
    /// Sustained rate in bytes per second.
    pub normal_rate: f64,
    /// Short-term rate in bytes per second.
    pub burst_rate: u64,
    /// Maximum burst-to-normal ratio.
    pub max_burst_ratio: f64,
}

impl LimiterSettings {
    /// Settings from configuration, or `None` when limiting is disabled.
    pub fn from_config(config: &SpeedLimiterConfig) -> Option<Self> {
        config.enabled.then_some(Self {
            normal_rate: config.normal_bytes_per_sec,
            burst_rate: config.burst_bytes_per_sec,
            max_burst_ratio: config.max_burst_ratio,
        })
    }

    /// Bucket capacity in bytes. Never below one byte.
    pub fn capacity(&self) -> f64 {
        (self.burst_rate as f64)
            .min(self.normal_rate * self.max_burst_ratio)
            .max(1.0)
    }
}

/// A byte token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;
    }

    fn available(&self) -> usize {
        self.tokens.max(0.0).floor() as usize
    }

    fn consume(&mut self, bytes: usize) {
        self.tokens -= bytes as f64;
    }

    /// Time until at least `amount` tokens are available.
    fn time_until(&self, amount: f64) -> Duration {
        let deficit = (amount - self.tokens).max(0.0);
        Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX)
    }
}

/// Reader decorator that paces reads through a token bucket.
pub struct BandwidthLimiter<R> {
    inner: R,
    bucket: TokenBucket,
    min_grant: usize,
    scratch: Box<[u8]>,
    delay: Option<Pin<Box<Sleep>>>,
}

impl<R> BandwidthLimiter<R> {
    pub fn new(inner: R, settings: LimiterSettings) -> Self {
        let capacity = settings.capacity();
        let rate = if settings.normal_rate > 0.0 {
            settings.normal_rate
        } else {
            1.0
        };

        Self {
            inner,
            bucket: TokenBucket::new(capacity, rate),
            min_grant: MIN_GRANT.min(capacity as usize).max(1),
            scratch: vec![0u8; MAX_READ_CHUNK].into_boxed_slice(),
            delay: None,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for BandwidthLimiter<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            if let Some(delay) = this.delay.as_mut() {
                ready!(delay.as_mut().poll(cx));
                this.delay = None;
            }

            this.bucket.refill(Instant::now());

            let wanted = buf.remaining().min(this.scratch.len());
            let threshold = wanted.min(this.min_grant);
            if this.bucket.available() < threshold {
                let wait = this.bucket.time_until(threshold as f64);
                this.delay = Some(Box::pin(tokio::time::sleep(wait)));
                continue;
            }

            let grant = this.bucket.available().min(wanted);
            let mut limited = ReadBuf::new(&mut this.scratch[..grant]);
            ready!(Pin::new(&mut this.inner).poll_read(cx, &mut limited))?;

            let filled = limited.filled();
            buf.put_slice(filled);
            this.bucket.consume(filled.len());
            return Poll::Ready(Ok(()));
        }
    }
}
