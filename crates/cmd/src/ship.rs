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

//! Stdin to sink pump.

use std::future::Future;

use logship_sender::{Batch, FtSender, Record};
use snafu::{ResultExt, Whatever};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

/// Counters of one pump run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpSummary {
    /// Batches accepted by the sender.
    pub batches:  usize,
    pub records:  usize,
    /// Input lines that were not JSON objects.
    pub skipped:  usize,
    /// Records in batches the sender refused.
    pub rejected: usize,
}

/// Reads newline-delimited JSON objects from `reader` and submits them in
/// batches of `batch_size` until EOF or `shutdown` resolves.
///
/// Records read before shutdown are still submitted.
pub async fn pump<R, F>(
    reader: R,
    sender: &FtSender,
    batch_size: usize,
    shutdown: F,
) -> Result<PumpSummary, Whatever>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let mut lines = reader.lines();
    let mut summary = PumpSummary::default();
    let mut batch: Batch = Vec::with_capacity(batch_size);
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            biased;
            () = &mut shutdown => {
                info!(pending = batch.len(), "Shutdown requested, flushing pending records");
                break;
            }
            line = lines.next_line() => line.whatever_context("Failed to read input")?,
        };
        let Some(line) = line else {
            debug!("Input exhausted");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Record>(&line) {
            Ok(record) => batch.push(record),
            Err(e) => {
                summary.skipped += 1;
                warn!(error = %e, "Skipping input line that is not a JSON object");
                continue;
            }
        }

        if batch.len() >= batch_size {
            submit(sender, std::mem::take(&mut batch), &mut summary).await;
        }
    }

    if !batch.is_empty() {
        submit(sender, batch, &mut summary).await;
    }
    Ok(summary)
}

async fn submit(sender: &FtSender, batch: Batch, summary: &mut PumpSummary) {
    let records = batch.len();
    match sender.submit(batch).await {
        Ok(stats) => {
            summary.batches += 1;
            summary.records += records;
            debug!(records, backlog = stats.backlog, "Batch accepted");
        }
        Err(e) => {
            summary.rejected += records;
            error!(sender = %sender.name(), records, error = %e, "Batch rejected");
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C signal"); },
        () = terminate => { info!("Received terminate signal"); },
    }
}
