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

use crate::{codec::Batch, sink::DeliveryError};

/// Errors of the fault-tolerant sender.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum FtError {
    #[snafu(display("Invalid fault-tolerance config: {reason}"))]
    Config {
        reason: String,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to create save directory {}", path.display()))]
    CreateDir {
        path:   PathBuf,
        source: io::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Failed to open queue {name}"))]
    OpenQueue {
        name:   String,
        source: logship_queue::QueueError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The batch could not be encoded; it was not accepted.
    #[snafu(display("Cannot serialize batch of {} records", batch.len()))]
    Serialization {
        batch:  Batch,
        source: serde_json::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The batch could not be written to the stream queue; it was not
    /// accepted.
    #[snafu(display("Cannot put batch of {} records into queue {queue}", batch.len()))]
    Persistence {
        queue:  String,
        batch:  Batch,
        source: logship_queue::QueueError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    /// The sender was closed; the batch was not accepted.
    #[snafu(display("Sender {sender} is closed"))]
    Closed {
        sender: String,
        batch:  Batch,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Delivery through {sink} failed"))]
    Delivery {
        sink:   String,
        source: DeliveryError,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },

    #[snafu(display("Cannot decode queued batch"))]
    Decode {
        source: serde_json::Error,
        #[snafu(implicit)]
        loc:    snafu::Location,
    },
}

impl FtError {
    /// The batch a rejected submission carried, if any.
    #[must_use]
    pub fn into_batch(self) -> Option<Batch> {
        match self {
            Self::Serialization { batch, .. }
            | Self::Persistence { batch, .. }
            | Self::Closed { batch, .. } => Some(batch),
            _ => None,
        }
    }

    /// Appends `more` to the batch carried by a staging failure.
    pub(crate) fn extend_batch(mut self, more: Batch) -> Self {
        if let Self::Serialization { batch, .. } | Self::Persistence { batch, .. } = &mut self {
            batch.extend(more);
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, FtError>;
