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

use std::time::Duration;

/// Wait applied after a failed backup retry, in whole seconds.
///
/// Grows by one second per consecutive failure up to [`Backoff::MAX`] and
/// drops back to [`Backoff::MIN`] after a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    secs: u64,
}

impl Default for Backoff {
    fn default() -> Self { Self::new() }
}

impl Backoff {
    pub const MAX: u64 = 10;
    pub const MIN: u64 = 1;

    pub const fn new() -> Self { Self { secs: Self::MIN } }

    /// Current wait.
    pub const fn delay(&self) -> Duration { Duration::from_secs(self.secs) }

    pub const fn secs(&self) -> u64 { self.secs }

    pub fn on_failure(&mut self) { self.secs = (self.secs + 1).min(Self::MAX); }

    pub const fn on_success(&mut self) { self.secs = Self::MIN; }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sustained_failure_sequence() {
        let mut backoff = Backoff::new();
        let mut seen = Vec::new();
        for _ in 0..12 {
            seen.push(backoff.secs());
            backoff.on_failure();
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 10, 10]);
    }

    #[test]
    fn test_success_resets() {
        let mut backoff = Backoff::new();
        for _ in 0..5 {
            backoff.on_failure();
        }
        assert_eq!(backoff.delay(), Duration::from_secs(6));
        backoff.on_success();
        assert_eq!(backoff, Backoff::new());
        assert_eq!(backoff.delay(), Duration::from_secs(1));
    }
}
