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

//! Crash recovery for the persistent queue.
//!
//! Recovery starts from the metadata file:
//! 1. Load the persisted cursors, or rebuild them from the segment files
//!    when the metadata is missing or unreadable
//! 2. Scan forward from the recorded write cursor, counting frames written
//!    after the last sync, following any segments rolled since then
//! 3. Stop at the first truncated or invalid frame; the I/O worker discards
//!    everything after that point when it reopens the segment

use std::{
    fs::{self, File},
    io::{BufReader, ErrorKind, Seek, SeekFrom},
    path::Path,
};

use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    QueueConfig, QueueError, Result,
    error::IoSnafu,
    frame::{self, Decoded},
    meta::{self, Cursor, Metadata},
    path::{metadata_file_path, segment_file_path},
};

/// Restores the queue state left by a previous process.
pub(crate) fn recover(config: &QueueConfig) -> Result<Metadata> {
    let meta_path = metadata_file_path(&config.data_path, &config.name);

    let metadata = match meta::load(&meta_path) {
        Ok(Some(metadata)) => {
            debug!(queue = %config.name, ?metadata, "Loaded queue metadata");
            metadata
        }
        Ok(None) => {
            info!(queue = %config.name, "No metadata found, scanning segments");
            rebuild_from_segments(config)?
        }
        Err(QueueError::MetadataCorrupted { reason }) => {
            warn!(queue = %config.name, reason = %reason, "Metadata corrupted, rebuilding from segments");
            rebuild_from_segments(config)?
        }
        Err(e) => return Err(e),
    };

    let recovered = recover_tail(config, metadata)?;
    info!(
        queue = %config.name,
        depth = recovered.depth,
        read = ?recovered.read,
        write = ?recovered.write,
        "Queue recovery complete"
    );
    Ok(recovered)
}

/// Counts frames written after the persisted write cursor and moves the
/// cursor past them.
fn recover_tail(config: &QueueConfig, mut metadata: Metadata) -> Result<Metadata> {
    loop {
        let path = segment_file_path(&config.data_path, &config.name, metadata.write.segment);
        match scan_segment_from(&path, metadata.write.offset, config.max_msg_size) {
            Ok(scan) => {
                if scan.frames > 0 {
                    info!(
                        queue = %config.name,
                        segment = metadata.write.segment,
                        frames = scan.frames,
                        "Recovered frames written after last sync"
                    );
                }
                if scan.file_len > scan.end {
                    warn!(
                        queue = %config.name,
                        segment = metadata.write.segment,
                        discarded = scan.file_len - scan.end,
                        "Discarding incomplete tail of segment"
                    );
                }
                metadata.depth += i64::try_from(scan.frames).unwrap_or(i64::MAX);
                metadata.write.offset = scan.end;
            }
            Err(QueueError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                if metadata.write.offset > 0 {
                    warn!(
                        queue = %config.name,
                        segment = metadata.write.segment,
                        "Active segment missing, restarting it empty"
                    );
                    metadata.write.offset = 0;
                }
            }
            Err(e) => return Err(e),
        }

        let next = segment_file_path(&config.data_path, &config.name, metadata.write.segment + 1);
        if !next.exists() {
            break;
        }
        metadata.write = Cursor::new(metadata.write.segment + 1, 0);
    }

    if metadata.read > metadata.write {
        warn!(queue = %config.name, read = ?metadata.read, write = ?metadata.write, "Read cursor ahead of write cursor, resetting");
        metadata.read = metadata.write;
    }
    if metadata.read == metadata.write || metadata.depth < 0 {
        metadata.depth = 0;
    }
    Ok(metadata)
}

/// Derives cursors and depth from the segment files alone.
fn rebuild_from_segments(config: &QueueConfig) -> Result<Metadata> {
    let segments = list_segments(config)?;
    let (Some(&first), Some(&last)) = (segments.first(), segments.last()) else {
        return Ok(Metadata::default());
    };

    // The last segment is counted by the tail scan.
    let mut depth = 0i64;
    for &segment in &segments[..segments.len() - 1] {
        let path = segment_file_path(&config.data_path, &config.name, segment);
        let scan = scan_segment_from(&path, 0, config.max_msg_size)?;
        depth += i64::try_from(scan.frames).unwrap_or(i64::MAX);
    }

    Ok(Metadata {
        depth,
        read: Cursor::new(first, 0),
        write: Cursor::new(last, 0),
    })
}

/// Returns the segment numbers present in the data directory, ascending.
fn list_segments(config: &QueueConfig) -> Result<Vec<u64>> {
    let prefix = format!("{}.diskqueue.", config.name);
    let entries = fs::read_dir(&config.data_path).context(IoSnafu {
        path: &config.data_path,
    })?;

    let mut segments: Vec<u64> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| {
            let file_name = entry.file_name();
            let file_name = file_name.to_str()?;
            file_name
                .strip_prefix(&prefix)?
                .strip_suffix(".dat")?
                .parse()
                .ok()
        })
        .collect();
    segments.sort_unstable();
    Ok(segments)
}

#[derive(Debug, PartialEq, Eq)]
struct SegmentScan {
    frames:   u64,
    end:      u64,
    file_len: u64,
}

/// Validates frames from `start` until the first truncated or invalid one.
fn scan_segment_from(path: &Path, start: u64, max_len: usize) -> Result<SegmentScan> {
    let file = File::open(path).context(IoSnafu { path })?;
    let file_len = file.metadata().context(IoSnafu { path })?.len();
    if start >= file_len {
        return Ok(SegmentScan {
            frames: 0,
            end: start.min(file_len),
            file_len,
        });
    }

    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(start))
        .context(IoSnafu { path })?;

    let mut end = start;
    let mut frames = 0u64;
    loop {
        match frame::decode(&mut reader, max_len).context(IoSnafu { path })? {
            Decoded::Frame { size, .. } => {
                end += size;
                frames += 1;
            }
            Decoded::Truncated => break,
            Decoded::Invalid(reason) => {
                warn!(path = ?path, offset = end, reason = %reason, "Invalid frame found during recovery");
                break;
            }
        }
    }

    debug!(path = ?path, frames, end, "Segment scan complete");
    Ok(SegmentScan {
        frames,
        end,
        file_len,
    })
}

#[cfg(test)]
mod tests {
    use std::{fs::OpenOptions, io::Write, path::PathBuf};

    use tempfile::TempDir;

    use super::*;

    struct TestFixture {
        _temp_dir: TempDir,
        config:    QueueConfig,
    }

    impl TestFixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let config = QueueConfig {
                name: "recovery".to_string(),
                data_path: temp_dir.path().to_path_buf(),
                ..QueueConfig::default()
            };
            Self {
                _temp_dir: temp_dir,
                config,
            }
        }

        fn segment(&self, segment: u64) -> PathBuf {
            segment_file_path(&self.config.data_path, &self.config.name, segment)
        }

        fn append(&self, segment: u64, payloads: &[&[u8]]) -> u64 {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.segment(segment))
                .unwrap();
            for payload in payloads {
                file.write_all(&frame::encode(payload)).unwrap();
            }
            file.metadata().unwrap().len()
        }

        fn store(&self, metadata: &Metadata) {
            let path = metadata_file_path(&self.config.data_path, &self.config.name);
            meta::store(&path, metadata).unwrap();
        }
    }

    #[test]
    fn test_fresh_directory() {
        let fixture = TestFixture::new();
        assert_eq!(recover(&fixture.config).unwrap(), Metadata::default());
    }

    #[test]
    fn test_counts_frames_after_persisted_cursor() {
        let fixture = TestFixture::new();
        let synced = fixture.append(0, &[b"one", b"two"]);
        fixture.store(&Metadata {
            depth: 2,
            read:  Cursor::new(0, 0),
            write: Cursor::new(0, synced),
        });
        let end = fixture.append(0, &[b"three"]);

        let metadata = recover(&fixture.config).unwrap();
        assert_eq!(metadata.depth, 3);
        assert_eq!(metadata.write, Cursor::new(0, end));
    }

    #[test]
    fn test_stops_at_torn_tail() {
        let fixture = TestFixture::new();
        let valid = fixture.append(0, &[b"intact"]);
        let mut file = OpenOptions::new()
            .append(true)
            .open(fixture.segment(0))
            .unwrap();
        file.write_all(&frame::encode(b"torn")[..5]).unwrap();

        let metadata = recover(&fixture.config).unwrap();
        assert_eq!(metadata.depth, 1);
        assert_eq!(metadata.write, Cursor::new(0, valid));
    }

    #[test]
    fn test_follows_segments_rolled_after_sync() {
        let fixture = TestFixture::new();
        let first = fixture.append(0, &[b"a"]);
        fixture.store(&Metadata {
            depth: 1,
            read:  Cursor::new(0, 0),
            write: Cursor::new(0, first),
        });
        let second = fixture.append(1, &[b"b", b"c"]);

        let metadata = recover(&fixture.config).unwrap();
        assert_eq!(metadata.depth, 3);
        assert_eq!(metadata.read, Cursor::new(0, 0));
        assert_eq!(metadata.write, Cursor::new(1, second));
    }

    #[test]
    fn test_rebuilds_without_metadata() {
        let fixture = TestFixture::new();
        fixture.append(2, &[b"x", b"y"]);
        let end = fixture.append(3, &[b"z"]);

        let metadata = recover(&fixture.config).unwrap();
        assert_eq!(metadata.depth, 3);
        assert_eq!(metadata.read, Cursor::new(2, 0));
        assert_eq!(metadata.write, Cursor::new(3, end));
    }

    #[test]
    fn test_rebuilds_from_corrupted_metadata() {
        let fixture = TestFixture::new();
        let end = fixture.append(0, &[b"kept"]);
        let meta_path = metadata_file_path(&fixture.config.data_path, &fixture.config.name);
        fs::write(&meta_path, b"garbage").unwrap();

        let metadata = recover(&fixture.config).unwrap();
        assert_eq!(metadata.depth, 1);
        assert_eq!(metadata.write, Cursor::new(0, end));
    }

    #[test]
    fn test_drained_queue_has_zero_depth() {
        let fixture = TestFixture::new();
        let end = fixture.append(0, &[b"gone"]);
        fixture.store(&Metadata {
            depth: 5,
            read:  Cursor::new(0, end),
            write: Cursor::new(0, end),
        });

        assert_eq!(recover(&fixture.config).unwrap().depth, 0);
    }

    #[test]
    fn test_list_segments_ignores_other_files() {
        let fixture = TestFixture::new();
        fixture.append(1, &[b"a"]);
        fixture.append(0, &[b"b"]);
        fs::write(fixture.config.data_path.join("recovery.diskqueue.meta.dat"), b"").unwrap();
        fs::write(fixture.config.data_path.join("other.diskqueue.000005.dat"), b"").unwrap();
        fs::write(
            fixture.config.data_path.join("recovery.diskqueue.000007.dat.bad"),
            b"",
        )
        .unwrap();

        assert_eq!(list_segments(&fixture.config).unwrap(), vec![0, 1]);
    }
}
