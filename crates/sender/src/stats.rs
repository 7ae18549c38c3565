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

use std::{
    fmt::Display,
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Delivery counters shared by `submit` and every worker.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    success:    AtomicU64,
    errors:     AtomicU64,
    last_error: Mutex<Option<String>>,
    backlog:    AtomicI64,
    ft:         bool,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Successful delivery attempts.
    pub success:    u64,
    /// Failed delivery attempts.
    pub errors:     u64,
    pub last_error: Option<String>,
    /// Entries waiting in the disk queues.
    pub backlog:    i64,
    /// Set when produced by the fault-tolerant wrapper.
    pub ft:         bool,
}

impl DeliveryStats {
    /// Counters owned by a fault-tolerant sender.
    #[must_use]
    pub fn fault_tolerant() -> Self {
        Self {
            ft: true,
            ..Self::default()
        }
    }

    pub fn record_success(&self) { self.success.fetch_add(1, Ordering::Relaxed); }

    pub fn record_failure(&self, error: impl Display) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(error.to_string());
    }

    pub fn clear_last_error(&self) { *self.last_error.lock() = None; }

    pub fn set_backlog(&self, backlog: i64) { self.backlog.store(backlog, Ordering::Relaxed); }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            success:    self.success.load(Ordering::Relaxed),
            errors:     self.errors.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
            backlog:    self.backlog.load(Ordering::Relaxed),
            ft:         self.ft,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_counters_and_error_detail() {
        let stats = DeliveryStats::fault_tolerant();
        stats.record_success();
        stats.record_failure("sink down");
        stats.set_backlog(7);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.success, 1);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.last_error.as_deref(), Some("sink down"));
        assert_eq!(snapshot.backlog, 7);
        assert!(snapshot.ft);

        stats.clear_last_error();
        assert_eq!(stats.snapshot().last_error, None);
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(DeliveryStats::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        stats.record_success();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().success, 8_000);
        assert!(!stats.snapshot().ft);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = StatsSnapshot {
            success: 2,
            ft: true,
            ..StatsSnapshot::default()
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(
            json,
            r#"{"success":2,"errors":0,"last_error":null,"backlog":0,"ft":true}"#
        );
    }
}
