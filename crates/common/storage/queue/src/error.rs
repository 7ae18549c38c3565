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

use std::{io, path::PathBuf};

use snafu::Snafu;

/// Queue operation errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueError {
    /// Filesystem I/O failure.
    #[snafu(display("IO error on {}: {source}", path.display()))]
    Io {
        path:   PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// Payload is outside the configured `[min_msg_size, max_msg_size]`.
    #[snafu(display("Invalid message size {size}, expected {min}..={max} bytes"))]
    InvalidMessageSize { size: usize, min: usize, max: usize },

    /// The queue has been closed and no longer accepts writes.
    #[snafu(display("Queue {name} is closed"))]
    Closed { name: String },

    /// A frame failed length or CRC validation.
    #[snafu(display("Corrupted frame in segment {segment} at offset {offset}: {reason}"))]
    Corrupted {
        segment: u64,
        offset:  u64,
        reason:  String,
    },

    /// The metadata file could not be decoded.
    #[snafu(display("Metadata corrupted: {reason}"))]
    MetadataCorrupted { reason: String },

    /// Invalid construction parameter.
    #[snafu(display("Invalid queue config: {reason}"))]
    InvalidConfig { reason: String },

    /// Unexpected internal failure, such as a panicked I/O thread.
    #[snafu(display("Internal error: {message}"))]
    Internal { message: String },
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
