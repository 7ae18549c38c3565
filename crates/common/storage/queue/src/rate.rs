// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Byte-rate write limiter.
//!
//! A token bucket holding at most one second worth of bytes. A write larger
//! than the bucket is admitted by going into debt, and the writer sleeps
//! until the debt is repaid.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub(crate) struct RateLimiter {
    /// Bytes per second, `0.0` when disabled.
    rate:   f64,
    tokens: f64,
    last:   Instant,
}

impl RateLimiter {
    #[allow(clippy::cast_precision_loss)]
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec as f64;
        Self {
            rate,
            tokens: rate,
            last: Instant::now(),
        }
    }

    pub fn is_enabled(&self) -> bool { self.rate > 0.0 }

    /// Charges `bytes` against the bucket at `now` and returns how long the
    /// writer must wait before the write is within budget.
    #[allow(clippy::cast_precision_loss)]
    pub fn reserve(&mut self, bytes: usize, now: Instant) -> Duration {
        if !self.is_enabled() {
            return Duration::ZERO;
        }

        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.rate);
        self.tokens -= bytes as f64;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / self.rate)
        }
    }

    /// Blocks the calling thread until `bytes` may be written.
    pub fn acquire(&mut self, bytes: usize) {
        let wait = self.reserve(bytes, Instant::now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}
