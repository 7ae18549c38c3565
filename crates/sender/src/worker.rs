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

//! Queue draining loops.
//!
//! Both loops wait for either the next entry or cancellation. Cancellation
//! is only observed between entries: an attempt, including its failure
//! sleep, always runs to completion.

use std::{sync::Arc, time::Duration};

use logship_queue::BackendQueue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{attempt::DeliveryAttempt, backoff::Backoff, stats::DeliveryStats};

/// Failure sleep of stream workers and inline delivery.
pub(crate) const STREAM_FAIL_SLEEP: Duration = Duration::from_secs(1);

/// Shared state handed to every worker.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub attempt: Arc<DeliveryAttempt>,
    pub stats:   Arc<DeliveryStats>,
    pub cancel:  CancellationToken,
}

/// Waits for the next entry of `queue`, `None` once cancelled.
async fn next_entry(queue: &dyn BackendQueue, cancel: &CancellationToken) -> Option<bytes::Bytes> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        entry = queue.recv() => {
            if entry.is_none() {
                // Only shutdown closes the queues.
                cancel.cancelled().await;
            }
            entry
        }
    }
}

/// Drains the stream queue with a fixed one second failure sleep.
pub(crate) async fn run_stream_worker(id: usize, queue: Arc<dyn BackendQueue>, ctx: WorkerContext) {
    info!(worker = id, queue = %queue.name(), "Stream worker starting");

    while let Some(raw) = next_entry(queue.as_ref(), &ctx.cancel).await {
        match ctx.attempt.attempt_from_bytes(&raw, STREAM_FAIL_SLEEP).await {
            Ok(()) => ctx.stats.record_success(),
            Err(e) => {
                error!(worker = id, queue = %queue.name(), error = %e, "Cannot send entry from queue");
                ctx.stats.record_failure(&e);
            }
        }
    }

    info!(worker = id, queue = %queue.name(), "Stream worker stopped");
}

/// Drains the backup queue, waiting longer after each consecutive failure.
pub(crate) async fn run_backup_worker(queue: Arc<dyn BackendQueue>, ctx: WorkerContext) {
    info!(queue = %queue.name(), "Backup worker starting");
    let mut backoff = Backoff::new();

    while let Some(raw) = next_entry(queue.as_ref(), &ctx.cancel).await {
        match ctx.attempt.attempt_from_bytes(&raw, backoff.delay()).await {
            Ok(()) => {
                backoff.on_success();
                ctx.stats.record_success();
            }
            Err(e) => {
                error!(queue = %queue.name(), wait = backoff.secs(), error = %e, "Cannot send entry from queue");
                ctx.stats.record_failure(&e);
                backoff.on_failure();
                debug!(queue = %queue.name(), next_wait = backoff.secs(), "Backup retry backoff");
            }
        }
    }

    info!(queue = %queue.name(), "Backup worker stopped");
}
