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

use std::{path::PathBuf, time::Duration};

use bon::Builder;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::ensure;

use crate::error::{ConfigSnafu, Result};

pub const STREAM_QUEUE_NAME: &str = "stream_local_save";
pub const BACKUP_QUEUE_NAME: &str = "backup_local_save";

pub const DEFAULT_SYNC_EVERY: u64 = 10;
pub const DEFAULT_WRITE_LIMIT_MB: u64 = 10;
pub const DEFAULT_PROCS: usize = 1;

/// Segment size and per-message cap of both queues.
pub const MAX_BYTES_PER_FILE: u64 = 100 * logship_queue::MB;
pub const QUEUE_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Where accepted batches go first.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Strategy {
    /// Deliver inline; only failures are spilled to the backup queue.
    BackupOnly,
    /// Persist every batch to the stream queue before delivery.
    #[default]
    AlwaysSave,
}

/// Fault-tolerant sender configuration.
///
/// Keys keep the `ft_` prefix used by pipeline configuration files.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, SmartDefault, Builder)]
#[serde(default)]
pub struct FtConfig {
    /// Directory holding both disk queues. Required.
    #[serde(rename = "ft_save_log_path")]
    #[builder(into)]
    pub save_log_path: PathBuf,

    /// Queue operations between fsyncs; also the sync interval in seconds.
    #[serde(rename = "ft_sync_every")]
    #[default(DEFAULT_SYNC_EVERY)]
    #[builder(default = DEFAULT_SYNC_EVERY)]
    pub sync_every: u64,

    /// Queue write throughput limit in MiB per second.
    #[serde(rename = "ft_write_limit")]
    #[default(DEFAULT_WRITE_LIMIT_MB)]
    #[builder(default = DEFAULT_WRITE_LIMIT_MB)]
    pub write_limit_mb: u64,

    #[serde(rename = "ft_strategy")]
    #[builder(default)]
    pub strategy: Strategy,

    /// Stream workers draining the stream queue under `always_save`.
    #[serde(rename = "ft_procs")]
    #[default(DEFAULT_PROCS)]
    #[builder(default = DEFAULT_PROCS)]
    pub procs: usize,
}

impl FtConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.save_log_path.as_os_str().is_empty(),
            ConfigSnafu {
                reason: "ft_save_log_path is required",
            }
        );
        ensure!(
            self.sync_every > 0,
            ConfigSnafu {
                reason: "ft_sync_every must be positive",
            }
        );
        ensure!(
            self.procs > 0,
            ConfigSnafu {
                reason: "ft_procs must be positive",
            }
        );
        Ok(())
    }

    /// Bytes per second handed to the queue rate limiter.
    pub const fn write_rate_limit(&self) -> u64 {
        self.write_limit_mb.saturating_mul(logship_queue::MB)
    }
}
