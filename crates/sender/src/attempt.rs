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

//! One delivery attempt and the re-staging of whatever it failed to deliver.
//!
//! ```text
//!   deliver(batch) ──ok──► done
//!        │
//!        └─err──► failed records (sink report, else whole batch)
//!                    │
//!                    ├─ oversized && n >= 2 ──► put(first half), put(second half)
//!                    └─ otherwise ────────────► put(failed)
//!                    │
//!                    └─► sleep(fail_sleep) ──► Err(staging error, else delivery error)
//! ```

use std::{sync::Arc, time::Duration};

use logship_queue::BackendQueue;
use snafu::{IntoError, ResultExt};
use tracing::{debug, error, info};

use crate::{
    codec::{self, Batch, Record},
    error::{DecodeSnafu, DeliverySnafu, PersistenceSnafu, Result, SerializationSnafu},
    metrics::{BACKUP_STAGE_ERRORS, BACKUP_STAGED, BATCHES_DELIVERED, BATCHES_SPLIT, DELIVERY_FAILURES},
    sink::{FailureKind, Sink},
};

/// Delivers batches through the wrapped sink and spills failures to the
/// backup queue.
pub(crate) struct DeliveryAttempt {
    sink:      Arc<dyn Sink>,
    sink_name: String,
    backup:    Arc<dyn BackendQueue>,
}

impl DeliveryAttempt {
    pub fn new(sink: Arc<dyn Sink>, backup: Arc<dyn BackendQueue>) -> Self {
        let sink_name = sink.name();
        Self {
            sink,
            sink_name,
            backup,
        }
    }

    /// Decodes a queue entry and delivers it.
    ///
    /// An entry that does not decode is reported without staging.
    pub async fn attempt_from_bytes(&self, raw: &[u8], fail_sleep: Duration) -> Result<()> {
        let batch = codec::decode(raw).context(DecodeSnafu)?;
        self.attempt(batch, fail_sleep).await
    }

    /// Delivers `batch`; on failure stages the failed records into the backup
    /// queue and sleeps `fail_sleep` before returning the error.
    ///
    /// When staging fails too, the staging error is returned in place of the
    /// delivery error. It carries every failed record that did not reach the
    /// backup queue.
    pub async fn attempt(&self, batch: Batch, fail_sleep: Duration) -> Result<()> {
        let mut err = match self.sink.deliver(&batch).await {
            Ok(()) => {
                BATCHES_DELIVERED.with_label_values(&[self.sink_name.as_str()]).inc();
                return Ok(());
            }
            Err(err) => err,
        };

        DELIVERY_FAILURES.with_label_values(&[self.sink_name.as_str()]).inc();
        error!(
            sink = %self.sink_name,
            records = batch.len(),
            kind = %err.kind,
            error = %err,
            "Cannot deliver batch"
        );

        let failed = err.failed.take().unwrap_or_else(|| {
            info!(
                sink = %self.sink_name,
                "Sink did not report failed records, re-staging the whole batch"
            );
            batch
        });

        let staged = if err.kind == FailureKind::Oversized && failed.len() >= 2 {
            // Only the two halves are staged, never the whole failed set again.
            let mut first = failed;
            let second = first.split_off(first.len() / 2);
            BATCHES_SPLIT.with_label_values(&[self.sink_name.as_str()]).inc();
            info!(
                sink = %self.sink_name,
                first = first.len(),
                second = second.len(),
                "Splitting oversized batch"
            );
            match self.stage(first).await {
                Ok(()) => self.stage(second).await,
                Err(e) => Err(e.extend_batch(second)),
            }
        } else {
            self.stage(failed).await
        };

        tokio::time::sleep(fail_sleep).await;
        staged?;
        Err(err).context(DeliverySnafu {
            sink: self.sink_name.clone(),
        })
    }

    /// Puts `records` into the backup queue as one entry.
    async fn stage(&self, records: Batch) -> Result<()> {
        if records.is_empty() {
            debug!(sink = %self.sink_name, "Nothing to stage");
            return Ok(());
        }

        let result = match codec::encode(&records) {
            Ok(data) => self.backup.put(data).await.map_err(|source| {
                PersistenceSnafu {
                    queue: self.backup.name(),
                    batch: Batch::new(),
                }
                .into_error(source)
            }),
            Err(source) => Err(SerializationSnafu { batch: Batch::new() }.into_error(source)),
        };

        match result {
            Ok(()) => {
                BACKUP_STAGED.with_label_values(&[self.sink_name.as_str()]).inc();
                debug!(
                    sink = %self.sink_name,
                    queue = %self.backup.name(),
                    records = records.len(),
                    "Staged records for retry"
                );
                Ok(())
            }
            Err(e) => {
                BACKUP_STAGE_ERRORS.with_label_values(&[self.sink_name.as_str()]).inc();
                error!(
                    sink = %self.sink_name,
                    queue = %self.backup.name(),
                    records = records.len(),
                    error = %e,
                    "Cannot stage records into backup queue"
                );
                Err(e.extend_batch(records))
            }
        }
    }
}
