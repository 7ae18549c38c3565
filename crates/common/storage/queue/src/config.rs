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

use snafu::ensure;

use crate::{Result, error::InvalidConfigSnafu};

pub const MB: u64 = 1024 * 1024;

/// Construction parameters of a [`DiskQueue`](crate::DiskQueue).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue name, used as the file name prefix.
    pub name:               String,
    /// Directory holding segment and metadata files.
    pub data_path:          PathBuf,
    /// A new segment is started once the next frame would cross this size.
    pub max_bytes_per_file: u64,
    /// Smallest accepted payload.
    pub min_msg_size:       usize,
    /// Largest accepted payload.
    pub max_msg_size:       usize,
    /// Fsync and persist metadata after this many reads plus writes.
    pub sync_every:         u64,
    /// Fsync and persist metadata at least this often while dirty.
    pub sync_timeout:       Duration,
    /// Upper bound an idle consumer waits before re-checking for data.
    pub read_timeout:       Duration,
    /// Write throughput limit in bytes per second, `0` disables throttling.
    pub write_rate_limit:   u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name:               "queue".to_string(),
            data_path:          PathBuf::from("./queue_data"),
            max_bytes_per_file: 100 * MB,
            min_msg_size:       0,
            max_msg_size:       (100 * MB) as usize,
            sync_every:         10,
            sync_timeout:       Duration::from_secs(10),
            read_timeout:       Duration::from_secs(2),
            write_rate_limit:   10 * MB,
        }
    }
}

impl QueueConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(
            !self.name.is_empty(),
            InvalidConfigSnafu {
                reason: "queue name must not be empty",
            }
        );
        ensure!(
            self.min_msg_size <= self.max_msg_size,
            InvalidConfigSnafu {
                reason: format!(
                    "min_msg_size {} exceeds max_msg_size {}",
                    self.min_msg_size, self.max_msg_size
                ),
            }
        );
        ensure!(
            self.max_bytes_per_file > 0,
            InvalidConfigSnafu {
                reason: "max_bytes_per_file must be positive",
            }
        );
        ensure!(
            self.sync_every > 0,
            InvalidConfigSnafu {
                reason: "sync_every must be positive",
            }
        );
        ensure!(
            !self.sync_timeout.is_zero() && !self.read_timeout.is_zero(),
            InvalidConfigSnafu {
                reason: "sync_timeout and read_timeout must be positive",
            }
        );
        Ok(())
    }
}
