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

//! Main queue struct and lifecycle management.
//!
//! [`DiskQueue`] is a durable FIFO of byte payloads:
//! - `put` hands the payload to a dedicated I/O thread and waits until the
//!   frame is written to the active segment
//! - `recv` reads the next frame on the caller's task, under the state lock,
//!   and waits on a notification when the queue is empty
//! - `close` stops the I/O thread, fsyncs data and persists metadata
//!
//! ## Usage
//!
//! ```ignore
//! let queue = QueueBuilder::new("stream", "/path/to/dir").build()?;
//!
//! queue.put(Bytes::from_static(b"hello")).await?;
//! let payload = queue.recv().await;
//!
//! queue.close()?;
//! ```

use std::{
    fs::{self, File},
    io::{BufReader, ErrorKind, Seek, SeekFrom},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, Ordering},
    },
    thread::{self, JoinHandle},
};

use async_trait::async_trait;
use bytes::Bytes;
use crossbeam::channel::{Sender, unbounded};
use parking_lot::Mutex;
use snafu::{OptionExt, ResultExt, ensure};
use tokio::sync::{Notify, oneshot};
use tracing::{debug, error, info, warn};

use crate::{
    QueueConfig, Result,
    error::{ClosedSnafu, CorruptedSnafu, InternalSnafu, InvalidMessageSizeSnafu, IoSnafu},
    frame::{self, Decoded},
    io_worker::{Command, IoWorker},
    meta::{self, Cursor, Metadata},
    path::{bad_file_path, metadata_file_path, segment_file_path},
    recovery,
};

/// Capability contract of a persistent queue.
///
/// Any number of producers may call [`put`](Self::put) concurrently while a
/// set of consumers drains the queue through [`recv`](Self::recv).
#[async_trait]
pub trait BackendQueue: Send + Sync {
    /// Queue name, unique within its data directory.
    fn name(&self) -> &str;

    /// Durably appends one payload.
    async fn put(&self, data: Bytes) -> Result<()>;

    /// Waits for the next payload; `None` once the queue is closed.
    ///
    /// Cancel safe: a payload is only removed from the queue when this
    /// future resolves with it.
    async fn recv(&self) -> Option<Bytes>;

    /// Approximate number of unread payloads.
    fn depth(&self) -> i64;

    /// Stops accepting writes and persists metadata.
    fn close(&self) -> Result<()>;
}

/// Mutable queue state guarded by [`Shared::state`].
#[derive(Debug)]
pub(crate) struct QueueState {
    pub read:           Cursor,
    pub write:          Cursor,
    pub depth:          i64,
    pub ops_since_sync: u64,
    pub dirty:          bool,
    pub sync_requested: bool,
    reader:             Option<SegmentReader>,
}

#[derive(Debug)]
struct SegmentReader {
    segment:  u64,
    position: u64,
    file:     BufReader<File>,
}

/// State shared between the queue handle and its I/O thread.
pub(crate) struct Shared {
    pub config:     QueueConfig,
    pub meta_path:  PathBuf,
    pub state:      Mutex<QueueState>,
    pub depth:      AtomicI64,
    pub data_ready: Notify,
    pub closed:     AtomicBool,
}

impl Shared {
    pub fn segment_path(&self, segment: u64) -> PathBuf {
        segment_file_path(&self.config.data_path, &self.config.name, segment)
    }

    pub fn metadata(state: &QueueState) -> Metadata {
        Metadata {
            depth: state.depth,
            read:  state.read,
            write: state.write,
        }
    }

    pub fn set_depth(&self, state: &mut QueueState, depth: i64) {
        state.depth = depth.max(0);
        self.depth.store(state.depth, Ordering::Release);
    }

    /// Reads the next frame, skipping over exhausted and corrupt segments.
    ///
    /// Returns the payload, if any, and whether a metadata sync is due.
    fn try_read(&self) -> Result<(Option<Bytes>, bool)> {
        let mut state = self.state.lock();

        loop {
            if self.closed.load(Ordering::Acquire) || state.read == state.write {
                return Ok((None, false));
            }

            let cursor = state.read;
            let max_len = self.config.max_msg_size;
            if let Err(e) = self.position_reader(&mut state, cursor) {
                if cursor.segment < state.write.segment && is_not_found(&e) {
                    warn!(
                        queue = %self.config.name,
                        segment = cursor.segment,
                        "Segment file missing, skipping to next segment"
                    );
                    self.advance_segment(&mut state, false);
                    continue;
                }
                return Err(e);
            }

            let reader = state.reader.as_mut().context(InternalSnafu {
                message: "segment reader vanished",
            })?;
            let decoded = match frame::decode(&mut reader.file, max_len) {
                Ok(decoded) => decoded,
                Err(source) => {
                    state.reader = None;
                    return Err(source).context(IoSnafu {
                        path: self.segment_path(cursor.segment),
                    });
                }
            };

            match decoded {
                Decoded::Frame { payload, size } => {
                    state.read.offset += size;
                    if let Some(reader) = state.reader.as_mut() {
                        reader.position += size;
                    }
                    let depth = state.depth - 1;
                    self.set_depth(&mut state, depth);
                    state.ops_since_sync += 1;
                    state.dirty = true;

                    let sync_due =
                        state.ops_since_sync >= self.config.sync_every && !state.sync_requested;
                    if sync_due {
                        state.sync_requested = true;
                    }
                    return Ok((Some(payload), sync_due));
                }
                Decoded::Truncated if cursor.segment < state.write.segment => {
                    self.advance_segment(&mut state, true);
                }
                Decoded::Truncated => {
                    self.skip_corrupt(&mut state, "segment ends before the write cursor");
                }
                Decoded::Invalid(reason) => {
                    self.skip_corrupt(&mut state, &reason);
                }
            }
        }
    }

    /// Makes the cached reader point at `cursor`, opening the segment file
    /// when the cached one belongs to another segment.
    fn position_reader(&self, state: &mut QueueState, cursor: Cursor) -> Result<()> {
        let reusable = state
            .reader
            .as_ref()
            .is_some_and(|r| r.segment == cursor.segment);

        if !reusable {
            let path = self.segment_path(cursor.segment);
            let file = File::open(&path).context(IoSnafu { path: &path })?;
            debug!(queue = %self.config.name, path = ?path, "Opened segment for reading");
            state.reader = Some(SegmentReader {
                segment:  cursor.segment,
                position: u64::MAX,
                file:     BufReader::new(file),
            });
        }

        if let Some(reader) = state.reader.as_mut()
            && reader.position != cursor.offset
        {
            reader
                .file
                .seek(SeekFrom::Start(cursor.offset))
                .context(IoSnafu {
                    path: self.segment_path(cursor.segment),
                })?;
            reader.position = cursor.offset;
        }
        Ok(())
    }

    /// Moves the read cursor to the start of the next segment, deleting the
    /// consumed one when `remove` is set.
    fn advance_segment(&self, state: &mut QueueState, remove: bool) {
        let finished = state.read.segment;
        state.reader = None;
        state.read = Cursor::new(finished + 1, 0);
        state.dirty = true;

        if remove {
            let path = self.segment_path(finished);
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != ErrorKind::NotFound
            {
                warn!(queue = %self.config.name, path = ?path, error = %e, "Failed to remove consumed segment");
            }
            debug!(queue = %self.config.name, segment = finished, "Segment fully consumed");
        }
    }

    fn skip_corrupt(&self, state: &mut QueueState, reason: &str) {
        let segment = state.read.segment;
        let path = self.segment_path(segment);
        let bad_path = bad_file_path(&path);

        let err = CorruptedSnafu {
            segment,
            offset: state.read.offset,
            reason,
        }
        .build();
        error!(queue = %self.config.name, error = %err, "Moving corrupt segment aside");
        if let Err(e) = fs::rename(&path, &bad_path) {
            error!(queue = %self.config.name, path = ?path, error = %e, "Failed to rename corrupt segment");
        }

        if segment == state.write.segment {
            // The writer follows the shared write cursor on its next append.
            state.write = Cursor::new(segment + 1, 0);
        }
        self.advance_segment(state, false);
        if state.read == state.write {
            self.set_depth(state, 0);
        }
    }
}

fn is_not_found(err: &crate::QueueError) -> bool {
    matches!(err, crate::QueueError::Io { source, .. } if source.kind() == ErrorKind::NotFound)
}

/// A persistent FIFO queue backed by segment files.
pub struct DiskQueue {
    shared:           Arc<Shared>,
    /// Sender side of the channel to the `IoWorker`. `None` after close.
    io_tx:            Mutex<Option<Sender<Command>>>,
    /// Handle to the background `IoWorker` thread.
    io_worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DiskQueue {
    /// Opens the queue, recovering any state left by a previous process.
    pub fn open(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_path).context(IoSnafu {
            path: &config.data_path,
        })?;

        let metadata = recovery::recover(&config)?;
        let meta_path = metadata_file_path(&config.data_path, &config.name);
        meta::store(&meta_path, &metadata)?;

        let shared = Arc::new(Shared {
            meta_path,
            state: Mutex::new(QueueState {
                read:           metadata.read,
                write:          metadata.write,
                depth:          metadata.depth,
                ops_since_sync: 0,
                dirty:          false,
                sync_requested: false,
                reader:         None,
            }),
            depth: AtomicI64::new(metadata.depth),
            data_ready: Notify::new(),
            closed: AtomicBool::new(false),
            config,
        });

        let (io_tx, io_rx) = unbounded();
        let mut io_worker = IoWorker::new(io_rx, shared.clone(), metadata.write)?;
        let io_worker_handle = thread::Builder::new()
            .name(format!("{}-io", shared.config.name))
            .spawn(move || io_worker.run())
            .context(IoSnafu {
                path: &shared.config.data_path,
            })?;

        info!(
            queue = %shared.config.name,
            path = ?shared.config.data_path,
            depth = metadata.depth,
            read_segment = metadata.read.segment,
            write_segment = metadata.write.segment,
            "Queue opened"
        );

        Ok(Self {
            shared,
            io_tx: Mutex::new(Some(io_tx)),
            io_worker_handle: Mutex::new(Some(io_worker_handle)),
        })
    }

    /// Computes the depth the queue would have after recovery, reading the
    /// metadata and segment files without modifying them. Safe to call while
    /// another handle has the queue open; unsynced frames of that handle are
    /// counted.
    pub fn peek_depth(config: &QueueConfig) -> Result<i64> {
        config.validate()?;
        Ok(recovery::recover(config)?.depth)
    }

    /// Get the queue configuration.
    #[must_use]
    pub fn config(&self) -> &QueueConfig { &self.shared.config }

    /// Reads the next payload without waiting.
    pub fn try_recv(&self) -> Result<Option<Bytes>> {
        let (payload, sync_due) = self.shared.try_read()?;
        if sync_due {
            self.request_sync();
        }
        Ok(payload)
    }

    fn request_sync(&self) {
        if let Some(tx) = self.io_tx.lock().as_ref() {
            let _ = tx.send(Command::Sync);
        }
    }

    fn closed_error(&self) -> crate::QueueError {
        ClosedSnafu {
            name: self.shared.config.name.clone(),
        }
        .build()
    }
}

#[async_trait]
impl BackendQueue for DiskQueue {
    fn name(&self) -> &str { &self.shared.config.name }

    async fn put(&self, data: Bytes) -> Result<()> {
        let config = &self.shared.config;
        ensure!(
            (config.min_msg_size..=config.max_msg_size).contains(&data.len()),
            InvalidMessageSizeSnafu {
                size: data.len(),
                min:  config.min_msg_size,
                max:  config.max_msg_size,
            }
        );

        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let guard = self.io_tx.lock();
            let tx = guard.as_ref().context(ClosedSnafu {
                name: config.name.clone(),
            })?;
            tx.send(Command::Write { data, ack: ack_tx })
                .map_err(|_| self.closed_error())?;
        }

        ack_rx.await.map_err(|_| self.closed_error())?
    }

    async fn recv(&self) -> Option<Bytes> {
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return None;
            }

            let notified = self.shared.data_ready.notified();
            match self.try_recv() {
                Ok(Some(payload)) => return Some(payload),
                Ok(None) => {}
                Err(e) => {
                    error!(queue = %self.shared.config.name, error = %e, "Failed to read from queue");
                }
            }

            tokio::select! {
                () = notified => {}
                () = tokio::time::sleep(self.shared.config.read_timeout) => {}
            }
        }
    }

    fn depth(&self) -> i64 { self.shared.depth.load(Ordering::Acquire) }

    fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(queue = %self.shared.config.name, "Closing queue");

        self.io_tx.lock().take();
        self.shared.data_ready.notify_waiters();

        if let Some(handle) = self.io_worker_handle.lock().take() {
            handle.join().map_err(|_| {
                InternalSnafu {
                    message: "IO worker thread panicked".to_string(),
                }
                .build()
            })?;
        }

        let metadata = {
            let mut state = self.shared.state.lock();
            state.reader = None;
            state.dirty = false;
            Shared::metadata(&state)
        };
        meta::store(&self.shared.meta_path, &metadata)?;

        info!(
            queue = %self.shared.config.name,
            depth = metadata.depth,
            "Queue closed"
        );
        Ok(())
    }
}

impl Drop for DiskQueue {
    fn drop(&mut self) {
        if !self.shared.closed.load(Ordering::Acquire)
            && let Err(e) = BackendQueue::close(self)
        {
            error!(queue = %self.shared.config.name, error = %e, "Failed to close queue on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::QueueBuilder;

    fn open(dir: &TempDir) -> DiskQueue {
        QueueBuilder::new("unit", dir.path())
            .sync_every(1)
            .read_timeout(Duration::from_millis(20))
            .write_rate_limit(0)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_then_try_recv() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);

        queue.put(Bytes::from_static(b"a")).await.unwrap();
        queue.put(Bytes::from_static(b"b")).await.unwrap();
        assert_eq!(queue.depth(), 2);

        assert_eq!(queue.try_recv().unwrap(), Some(Bytes::from_static(b"a")));
        assert_eq!(queue.try_recv().unwrap(), Some(Bytes::from_static(b"b")));
        assert_eq!(queue.try_recv().unwrap(), None);
        assert_eq!(queue.depth(), 0);

        queue.close().unwrap();
    }

    #[tokio::test]
    async fn test_put_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        queue.close().unwrap();

        let err = queue.put(Bytes::from_static(b"late")).await.unwrap_err();
        assert!(matches!(err, crate::QueueError::Closed { .. }));
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir);
        queue.close().unwrap();
        queue.close().unwrap();
    }

    #[tokio::test]
    async fn test_rejects_out_of_range_payload() {
        let dir = TempDir::new().unwrap();
        let queue = QueueBuilder::new("sized", dir.path())
            .min_msg_size(2)
            .max_msg_size(4)
            .build()
            .unwrap();

        assert!(queue.put(Bytes::from_static(b"x")).await.is_err());
        assert!(queue.put(Bytes::from_static(b"xxxxx")).await.is_err());
        queue.put(Bytes::from_static(b"xxx")).await.unwrap();
        assert_eq!(queue.depth(), 1);
        queue.close().unwrap();
    }
}
