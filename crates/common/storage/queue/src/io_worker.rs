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

//! Background I/O worker for persisting payloads to disk.
//!
//! ## Architecture
//!
//! The IoWorker runs on a dedicated thread and receives [`Command`]s from
//! the [`DiskQueue`](crate::DiskQueue) handle via a crossbeam channel. Each
//! write is acknowledged through a oneshot once the frame is in the active
//! segment.
//!
//! ```text
//! ┌──────────────┐     crossbeam      ┌──────────────┐     write     ┌──────────────┐
//! │  put(data)   │ ──── channel ────► │   IoWorker   │ ──────────►  │   Segment    │
//! │  (task)      │ ◄─── oneshot ───── │  (bg thread) │              │   (.dat)     │
//! └──────────────┘                    └──────────────┘              └──────────────┘
//! ```
//!
//! ## Responsibilities
//!
//! - **Throttling**: Apply the configured byte rate before each write
//! - **Segment rolling**: Start a new segment once the next frame would
//!   cross `max_bytes_per_file`
//! - **Sync management**: Fsync data and persist metadata every
//!   `sync_every` operations or after `sync_timeout` while dirty
//! - **Publishing**: Advance the shared write cursor and wake a consumer

use std::{
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::PathBuf,
    sync::{Arc, atomic::Ordering},
    time::Instant,
};

use bytes::Bytes;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use snafu::{OptionExt, ResultExt};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::{
    Result,
    error::{InternalSnafu, IoSnafu},
    frame,
    meta::{self, Cursor},
    queue::Shared,
    rate::RateLimiter,
};

/// Requests handled by the [`IoWorker`].
#[derive(Debug)]
pub(crate) enum Command {
    /// Append one payload and report the outcome on `ack`.
    Write {
        data: Bytes,
        ack:  oneshot::Sender<Result<()>>,
    },
    /// Fsync and persist metadata now.
    Sync,
}

struct ActiveSegment {
    segment: u64,
    path:    PathBuf,
    file:    File,
}

/// Background worker owning the write side of the queue.
pub(crate) struct IoWorker {
    rx:        Receiver<Command>,
    shared:    Arc<Shared>,
    active:    Option<ActiveSegment>,
    limiter:   RateLimiter,
    last_sync: Instant,
}

impl IoWorker {
    /// Creates the worker positioned at the recovered write cursor.
    pub fn new(rx: Receiver<Command>, shared: Arc<Shared>, write: Cursor) -> Result<Self> {
        let limiter = RateLimiter::new(shared.config.write_rate_limit);
        let mut worker = Self {
            rx,
            shared,
            active: None,
            limiter,
            last_sync: Instant::now(),
        };
        worker.open_segment(write)?;
        Ok(worker)
    }

    /// Main run loop.
    ///
    /// Processes commands until every sender is gone, checking on each
    /// iteration whether a periodic sync is due.
    pub fn run(&mut self) {
        let name = self.shared.config.name.clone();
        info!(queue = %name, "IoWorker starting");

        loop {
            match self.rx.recv_timeout(self.shared.config.sync_timeout) {
                Ok(Command::Write { data, ack }) => {
                    let result = self.write(&data);
                    if let Err(e) = &result {
                        error!(queue = %name, error = %e, "Failed to write payload");
                    }
                    let _ = ack.send(result);
                }
                Ok(Command::Sync) => self.sync_logged(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!(queue = %name, "IoWorker channel disconnected");
                    break;
                }
            }

            if self.sync_due() {
                self.sync_logged();
            }
        }

        self.sync_logged();
        info!(queue = %name, "IoWorker stopped");
    }

    /// Opens the segment at `cursor` for writing, discarding any bytes past
    /// the cursor.
    fn open_segment(&mut self, cursor: Cursor) -> Result<()> {
        let path = self.shared.segment_path(cursor.segment);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .context(IoSnafu { path: &path })?;
        file.set_len(cursor.offset)
            .context(IoSnafu { path: &path })?;
        file.seek(SeekFrom::Start(cursor.offset))
            .context(IoSnafu { path: &path })?;

        debug!(queue = %self.shared.config.name, path = ?path, offset = cursor.offset, "Opened segment for writing");
        self.active = Some(ActiveSegment {
            segment: cursor.segment,
            path,
            file,
        });
        Ok(())
    }

    fn write(&mut self, data: &Bytes) -> Result<()> {
        let frame = frame::encode(data);
        let frame_len = frame.len() as u64;
        self.limiter.acquire(frame.len());

        let shared = self.shared.clone();
        let mut rolled = false;
        {
            let mut state = shared.state.lock();

            let active_segment = self.active.as_ref().map(|a| a.segment);
            if active_segment != Some(state.write.segment) {
                // A consumer moved past a corrupt active segment.
                warn!(
                    queue = %shared.config.name,
                    segment = state.write.segment,
                    "Write cursor moved, switching segment"
                );
                self.open_segment(state.write)?;
            }

            if state.write.offset > 0
                && state.write.offset + frame_len > shared.config.max_bytes_per_file
            {
                self.sync_file()?;
                state.write = Cursor::new(state.write.segment + 1, 0);
                self.open_segment(state.write)?;
                rolled = true;
            }

            let active = self.active.as_mut().context(InternalSnafu {
                message: "no active segment",
            })?;
            if let Err(e) = active.file.write_all(&frame) {
                // Drop whatever part of the frame reached the file.
                let _ = active.file.set_len(state.write.offset);
                let _ = active.file.seek(SeekFrom::Start(state.write.offset));
                return Err(e).context(IoSnafu { path: &active.path });
            }

            state.write.offset += frame_len;
            let depth = state.depth + 1;
            shared.set_depth(&mut state, depth);
            state.ops_since_sync += 1;
            state.dirty = true;
        }
        shared.data_ready.notify_one();

        if rolled {
            info!(
                queue = %shared.config.name,
                segment = self.active.as_ref().map_or(0, |a| a.segment),
                "Rolled to new segment"
            );
            self.sync()?;
        }
        Ok(())
    }

    fn sync_due(&self) -> bool {
        let state = self.shared.state.lock();
        state.ops_since_sync >= self.shared.config.sync_every
            || (state.dirty && self.last_sync.elapsed() >= self.shared.config.sync_timeout)
    }

    fn sync_file(&self) -> Result<()> {
        if let Some(active) = &self.active {
            active
                .file
                .sync_data()
                .context(IoSnafu { path: &active.path })?;
        }
        Ok(())
    }

    /// Fsyncs the active segment, then persists the current cursors.
    fn sync(&mut self) -> Result<()> {
        self.sync_file()?;

        let metadata = {
            let mut state = self.shared.state.lock();
            state.ops_since_sync = 0;
            state.dirty = false;
            state.sync_requested = false;
            Shared::metadata(&state)
        };
        meta::store(&self.shared.meta_path, &metadata)?;
        self.last_sync = Instant::now();
        Ok(())
    }

    fn sync_logged(&mut self) {
        match self.sync() {
            Ok(()) => debug!(
                queue = %self.shared.config.name,
                depth = self.shared.depth.load(Ordering::Acquire),
                "Queue synced"
            ),
            Err(e) => {
                error!(queue = %self.shared.config.name, error = %e, "Failed to sync queue");
                self.last_sync = Instant::now();
                self.shared.state.lock().sync_requested = false;
            }
        }
    }
}
