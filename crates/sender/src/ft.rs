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

//! Fault-tolerant sender.
//!
//! ## Architecture
//!
//! ```text
//!               always_save                     N stream workers
//! submit ──────► stream_local_save ──recv──► attempt ──ok──► sink
//!    │                                         │
//!    │ backup_only                             └─fail─┐
//!    └──► attempt (inline) ──fail──┐                  │
//!                                  ▼                  ▼
//!                            backup_local_save ◄──────┘
//!                                  │
//!                                  └──recv──► backup worker (1..10s backoff)
//! ```
//!
//! Every delivery failure ends up in the backup queue, which is retried
//! until the sink accepts it.

use std::{fs, sync::Arc};

use logship_queue::{BackendQueue, QueueBuilder};
use parking_lot::Mutex;
use snafu::ResultExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    attempt::DeliveryAttempt,
    codec::{self, Batch},
    config::{
        BACKUP_QUEUE_NAME, FtConfig, MAX_BYTES_PER_FILE, QUEUE_READ_TIMEOUT, STREAM_QUEUE_NAME,
        Strategy,
    },
    error::{
        ClosedSnafu, CreateDirSnafu, DeliverySnafu, FtError, OpenQueueSnafu, PersistenceSnafu,
        Result, SerializationSnafu,
    },
    metrics::BACKLOG,
    sink::Sink,
    stats::{DeliveryStats, StatsSnapshot},
    worker::{STREAM_FAIL_SLEEP, WorkerContext, run_backup_worker, run_stream_worker},
};

/// Wraps a [`Sink`] with disk-backed retry.
///
/// Must be created inside a tokio runtime; the workers are spawned on it.
pub struct FtSender {
    name:      String,
    sink:      Arc<dyn Sink>,
    strategy:  Strategy,
    stream:    Arc<dyn BackendQueue>,
    backup:    Arc<dyn BackendQueue>,
    attempt:   Arc<DeliveryAttempt>,
    stats:     Arc<DeliveryStats>,
    cancel:    CancellationToken,
    /// `None` once closed.
    workers:   Mutex<Option<JoinSet<()>>>,
}

impl FtSender {
    /// Opens both disk queues under `config.save_log_path` and starts the
    /// workers.
    pub fn new(sink: Arc<dyn Sink>, config: FtConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.save_log_path).context(CreateDirSnafu {
            path: &config.save_log_path,
        })?;

        let stream = open_queue(STREAM_QUEUE_NAME, &config)?;
        let backup = open_queue(BACKUP_QUEUE_NAME, &config)?;
        Ok(Self::with_queues(sink, &config, stream, backup))
    }

    /// Starts a sender on caller-provided queues.
    pub fn with_queues(
        sink: Arc<dyn Sink>,
        config: &FtConfig,
        stream: Arc<dyn BackendQueue>,
        backup: Arc<dyn BackendQueue>,
    ) -> Self {
        let name = format!("{}(ft)", sink.name());
        let attempt = Arc::new(DeliveryAttempt::new(sink.clone(), backup.clone()));
        let stats = Arc::new(DeliveryStats::fault_tolerant());
        let cancel = CancellationToken::new();

        let ctx = WorkerContext {
            attempt: attempt.clone(),
            stats:   stats.clone(),
            cancel:  cancel.clone(),
        };
        let mut workers = JoinSet::new();
        // Under backup_only nothing is ever put into the stream queue.
        if config.strategy == Strategy::AlwaysSave {
            for id in 0..config.procs {
                workers.spawn(run_stream_worker(id, stream.clone(), ctx.clone()));
            }
        }
        workers.spawn(run_backup_worker(backup.clone(), ctx));

        info!(
            sender = %name,
            strategy = %config.strategy,
            procs = config.procs,
            stream_depth = stream.depth(),
            backup_depth = backup.depth(),
            "Fault-tolerant sender started"
        );

        Self {
            name,
            sink,
            strategy: config.strategy,
            stream,
            backup,
            attempt,
            stats,
            cancel,
            workers: Mutex::new(Some(workers)),
        }
    }

    /// The wrapped sink's name with an `(ft)` suffix.
    pub fn name(&self) -> &str { &self.name }

    /// Accepts `batch` for delivery.
    ///
    /// Under `always_save` the batch is durable in the stream queue once this
    /// returns `Ok`. Under `backup_only` the batch is delivered inline and
    /// delivery failures are absorbed by the backup queue; `Ok` means the
    /// batch was delivered or staged there. An `Err` means the batch was not
    /// accepted and carries it back, or for a partial staging failure the
    /// records that were lost to the backup queue. A closed sender rejects
    /// every batch.
    pub async fn submit(&self, batch: Batch) -> Result<StatsSnapshot> {
        if self.workers.lock().is_none() {
            return ClosedSnafu {
                sender: &self.name,
                batch,
            }
            .fail();
        }

        match self.strategy {
            Strategy::BackupOnly => {
                let outcome = self.attempt.attempt(batch, STREAM_FAIL_SLEEP).await;
                self.set_backlog(self.backup.depth());
                match outcome {
                    Ok(()) => self.stats.record_success(),
                    Err(e @ FtError::Delivery { .. }) => {
                        warn!(sender = %self.name, error = %e, "Inline delivery failed, retrying from backup queue");
                        self.stats.record_failure(&e);
                    }
                    Err(e) => {
                        error!(sender = %self.name, error = %e, "Inline delivery failed and the batch could not be staged");
                        self.stats.record_failure(&e);
                        return Err(e);
                    }
                }
                self.stats.clear_last_error();
            }
            Strategy::AlwaysSave => {
                let data = match codec::encode(&batch) {
                    Ok(data) => data,
                    Err(source) => return Err(source).context(SerializationSnafu { batch }),
                };
                if let Err(source) = self.stream.put(data).await {
                    return Err(source).context(PersistenceSnafu {
                        queue: self.stream.name(),
                        batch,
                    });
                }
                self.set_backlog(self.stream.depth() + self.backup.depth());
                self.stats.clear_last_error();
            }
        }
        Ok(self.stats.snapshot())
    }

    /// Current statistics without submitting anything.
    pub fn stats(&self) -> StatsSnapshot { self.stats.snapshot() }

    /// Stops the workers, closes both queues, then closes the sink.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        let Some(mut workers) = self.workers.lock().take() else {
            warn!(sender = %self.name, "Sender already closed");
            return Ok(());
        };

        warn!(sender = %self.name, "Waiting for workers to exit");
        self.cancel.cancel();

        let mut stopped = 0usize;
        while let Some(result) = workers.join_next().await {
            stopped += 1;
            if let Err(e) = result {
                error!(sender = %self.name, error = ?e, "Worker panicked");
            }
        }
        warn!(sender = %self.name, stopped, "All workers exited");

        for queue in [&self.stream, &self.backup] {
            if let Err(e) = queue.close() {
                error!(sender = %self.name, queue = %queue.name(), error = %e, "Failed to close queue");
            }
        }

        self.sink.close().await.context(DeliverySnafu {
            sink: self.sink.name(),
        })
    }

    fn set_backlog(&self, backlog: i64) {
        self.stats.set_backlog(backlog);
        BACKLOG.with_label_values(&[self.name.as_str()]).set(backlog);
    }
}

impl Drop for FtSender {
    fn drop(&mut self) {
        if self.workers.get_mut().is_some() {
            warn!(sender = %self.name, "Sender dropped without close, stopping workers");
            self.cancel.cancel();
        }
    }
}

/// Opens the disk queue `name` under `config.save_log_path` with the limits
/// the sender itself uses.
pub fn open_queue(name: &str, config: &FtConfig) -> Result<Arc<dyn BackendQueue>> {
    let queue = queue_builder(name, config)
        .build()
        .context(OpenQueueSnafu { name })?;
    Ok(Arc::new(queue))
}

/// Depth of the disk queue `name` under `config.save_log_path`, read
/// without opening the queue for writing. Safe while a sender is running on
/// the same directory.
pub fn peek_queue_depth(name: &str, config: &FtConfig) -> Result<i64> {
    queue_builder(name, config)
        .peek_depth()
        .context(OpenQueueSnafu { name })
}

fn queue_builder(name: &str, config: &FtConfig) -> QueueBuilder {
    QueueBuilder::new(name, &config.save_log_path)
        .max_bytes_per_file(MAX_BYTES_PER_FILE)
        .min_msg_size(0)
        .max_msg_size(usize::try_from(MAX_BYTES_PER_FILE).unwrap_or(usize::MAX))
        .sync_every(config.sync_every)
        .sync_timeout(std::time::Duration::from_secs(config.sync_every))
        .read_timeout(QUEUE_READ_TIMEOUT)
        .write_rate_limit(config.write_rate_limit())
}
