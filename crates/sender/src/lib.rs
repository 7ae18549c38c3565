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

//! Fault-tolerant delivery for record batches.
//!
//! [`FtSender`] wraps any [`Sink`] and guarantees that every accepted batch
//! is eventually delivered, spilling to two disk queues while the sink is
//! unavailable.

mod attempt;
pub mod backoff;
pub mod codec;
pub mod config;
pub mod error;
mod ft;
pub mod metrics;
pub mod sink;
pub mod stats;
mod worker;

pub use backoff::Backoff;
pub use codec::{Batch, Record};
pub use config::{FtConfig, Strategy};
pub use error::{FtError, Result};
pub use ft::{FtSender, open_queue, peek_queue_depth};
pub use sink::{DeliveryError, FailureKind, JsonLinesSink, Sink, StdoutSink};
pub use stats::{DeliveryStats, StatsSnapshot};
