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

use std::{fs, path::Path};

use logship_common_telemetry::{LoggingOptions, logging::DEFAULT_LOGGING_DIR};
use logship_sender::FtConfig;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;
use snafu::{ResultExt, Whatever, ensure_whatever};

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Configuration file of `logship ship`.
///
/// ```toml
/// batch_size = 500
///
/// [logging]
/// dir = "/var/log/logship"
///
/// [sender]
/// ft_save_log_path = "/var/lib/logship"
/// ft_strategy = "backup_only"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SmartDefault)]
#[serde(default)]
pub struct ShipConfig {
    /// Stdout carries the shipped records, so logs go to files by default.
    #[default(_code = "default_logging()")]
    pub logging:    LoggingOptions,
    pub sender:     FtConfig,
    /// Records per submitted batch.
    #[default(DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

fn default_logging() -> LoggingOptions {
    LoggingOptions::builder()
        .dir(DEFAULT_LOGGING_DIR)
        .append_stdout(false)
        .build()
}

impl ShipConfig {
    pub fn load(path: &Path) -> Result<Self, Whatever> {
        let text = fs::read_to_string(path)
            .with_whatever_context(|_| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&text)
            .with_whatever_context(|_| format!("Failed to parse config {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), Whatever> {
        ensure_whatever!(self.batch_size > 0, "batch_size must be positive");
        Ok(())
    }
}
