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

use crate::{DiskQueue, QueueConfig, Result};

pub struct QueueBuilder {
    config: QueueConfig,
}

impl QueueBuilder {
    pub fn new<N: Into<String>, P: Into<PathBuf>>(name: N, data_path: P) -> Self {
        Self {
            config: QueueConfig {
                name: name.into(),
                data_path: data_path.into(),
                ..Default::default()
            },
        }
    }

    #[must_use]
    pub fn max_bytes_per_file(mut self, size: u64) -> Self {
        self.config.max_bytes_per_file = size;
        self
    }

    #[must_use]
    pub fn min_msg_size(mut self, size: usize) -> Self {
        self.config.min_msg_size = size;
        self
    }

    #[must_use]
    pub fn max_msg_size(mut self, size: usize) -> Self {
        self.config.max_msg_size = size;
        self
    }

    #[must_use]
    pub fn sync_every(mut self, count: u64) -> Self {
        self.config.sync_every = count;
        self
    }

    #[must_use]
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.config.sync_timeout = timeout;
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    #[must_use]
    pub fn write_rate_limit(mut self, bytes_per_sec: u64) -> Self {
        self.config.write_rate_limit = bytes_per_sec;
        self
    }

    pub fn build(self) -> Result<DiskQueue> { DiskQueue::open(self.config) }

    /// Depth the queue would report if opened now. See
    /// [`DiskQueue::peek_depth`].
    pub fn peek_depth(self) -> Result<i64> { DiskQueue::peek_depth(&self.config) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default_config() {
        let builder = QueueBuilder::new("stream", "/tmp/test_queue");
        assert_eq!(builder.config.name, "stream");
        assert_eq!(builder.config.data_path, PathBuf::from("/tmp/test_queue"));
        assert_eq!(builder.config.max_bytes_per_file, 100 * 1024 * 1024);
        assert_eq!(builder.config.min_msg_size, 0);
    }

    #[test]
    fn test_builder_custom_config() {
        let builder = QueueBuilder::new("backup", "/tmp/test_queue")
            .max_bytes_per_file(4096)
            .min_msg_size(1)
            .max_msg_size(1024)
            .sync_every(3)
            .sync_timeout(Duration::from_secs(3))
            .read_timeout(Duration::from_millis(50))
            .write_rate_limit(0);

        assert_eq!(builder.config.max_bytes_per_file, 4096);
        assert_eq!(builder.config.min_msg_size, 1);
        assert_eq!(builder.config.max_msg_size, 1024);
        assert_eq!(builder.config.sync_every, 3);
        assert_eq!(builder.config.sync_timeout, Duration::from_secs(3));
        assert_eq!(builder.config.read_timeout, Duration::from_millis(50));
        assert_eq!(builder.config.write_rate_limit, 0);
    }
}
