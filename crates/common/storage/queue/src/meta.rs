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

//! Queue metadata: depth plus the read and write cursors.
//!
//! ## Binary Format
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────────────┐
//! │ magic: [u8; 4]   │ "LSQM"                               │
//! │ version: u32     │ Format version, currently 1          │
//! │ depth: i64       │ Unread message count                 │
//! │ read_seg: u64    │ Segment of the next read             │
//! │ read_off: u64    │ Offset of the next read              │
//! │ write_seg: u64   │ Segment of the next write            │
//! │ write_off: u64   │ Offset of the next write             │
//! │ checksum: u32    │ CRC32 of depth..write_off            │
//! └──────────────────┴──────────────────────────────────────┘
//! ```
//!
//! The file is replaced atomically: the new content goes to a temporary
//! sibling which is fsynced and then renamed over the old one.

use std::{
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write},
    path::Path,
};

use crc32fast::Hasher;
use snafu::{ResultExt, ensure};
use tracing::debug;

use crate::{
    Result,
    error::{IoSnafu, MetadataCorruptedSnafu},
};

pub const METADATA_MAGIC: [u8; 4] = *b"LSQM";
pub const METADATA_VERSION: u32 = 1;
const BODY_SIZE: usize = 40;
pub const METADATA_SIZE: usize = 8 + BODY_SIZE + 4;

/// A position inside the segment sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub segment: u64,
    pub offset:  u64,
}

impl Cursor {
    pub const fn new(segment: u64, offset: u64) -> Self { Self { segment, offset } }
}

/// Persisted queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    pub depth: i64,
    pub read:  Cursor,
    pub write: Cursor,
}

impl Metadata {
    pub fn serialize(&self) -> [u8; METADATA_SIZE] {
        let mut body = [0u8; BODY_SIZE];
        body[0..8].copy_from_slice(&self.depth.to_le_bytes());
        body[8..16].copy_from_slice(&self.read.segment.to_le_bytes());
        body[16..24].copy_from_slice(&self.read.offset.to_le_bytes());
        body[24..32].copy_from_slice(&self.write.segment.to_le_bytes());
        body[32..40].copy_from_slice(&self.write.offset.to_le_bytes());

        let mut out = [0u8; METADATA_SIZE];
        out[0..4].copy_from_slice(&METADATA_MAGIC);
        out[4..8].copy_from_slice(&METADATA_VERSION.to_le_bytes());
        out[8..8 + BODY_SIZE].copy_from_slice(&body);
        out[8 + BODY_SIZE..].copy_from_slice(&body_checksum(&body).to_le_bytes());
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() == METADATA_SIZE,
            MetadataCorruptedSnafu {
                reason: format!("expected {METADATA_SIZE} bytes, got {}", data.len()),
            }
        );
        ensure!(
            data[0..4] == METADATA_MAGIC,
            MetadataCorruptedSnafu {
                reason: format!("invalid magic: {:?}", &data[0..4]),
            }
        );
        let version = u32::from_le_bytes(read_array(&data[4..8]));
        ensure!(
            version == METADATA_VERSION,
            MetadataCorruptedSnafu {
                reason: format!("unsupported version {version}"),
            }
        );

        let body = &data[8..8 + BODY_SIZE];
        let stored = u32::from_le_bytes(read_array(&data[8 + BODY_SIZE..]));
        let computed = body_checksum(body);
        ensure!(
            stored == computed,
            MetadataCorruptedSnafu {
                reason: format!("checksum mismatch: stored={stored:#x}, computed={computed:#x}"),
            }
        );

        Ok(Self {
            depth: i64::from_le_bytes(read_array(&body[0..8])),
            read:  Cursor::new(
                u64::from_le_bytes(read_array(&body[8..16])),
                u64::from_le_bytes(read_array(&body[16..24])),
            ),
            write: Cursor::new(
                u64::from_le_bytes(read_array(&body[24..32])),
                u64::from_le_bytes(read_array(&body[32..40])),
            ),
        })
    }
}

fn body_checksum(body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

fn read_array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

/// Loads metadata from `path`, `None` if the queue has never persisted any.
pub fn load(path: &Path) -> Result<Option<Metadata>> {
    match fs::read(path) {
        Ok(data) => Metadata::deserialize(&data).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context(IoSnafu { path }),
    }
}

/// Atomically replaces the metadata file at `path`.
pub fn store(path: &Path, metadata: &Metadata) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp_path)
        .context(IoSnafu { path: tmp_path })?;
    file.write_all(&metadata.serialize())
        .context(IoSnafu { path: tmp_path })?;
    file.sync_all().context(IoSnafu { path: tmp_path })?;
    drop(file);

    fs::rename(tmp_path, path).context(IoSnafu { path })?;
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    debug!(path = ?path, depth = metadata.depth, "Metadata persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;
    use test_case::test_case;

    use super::*;

    fn sample() -> Metadata {
        Metadata {
            depth: 42,
            read:  Cursor::new(3, 1024),
            write: Cursor::new(5, 77),
        }
    }

    #[test]
    fn test_metadata_survives_serialization() {
        let bytes = sample().serialize();
        assert_eq!(Metadata::deserialize(&bytes).unwrap(), sample());
    }

    fn corrupt_magic(bytes: &mut Vec<u8>) { bytes[0] = 0xFF; }

    fn corrupt_body(bytes: &mut Vec<u8>) { bytes[12] ^= 0xFF; }

    fn truncate(bytes: &mut Vec<u8>) { bytes.truncate(10); }

    #[test_case(corrupt_magic ; "invalid magic")]
    #[test_case(corrupt_body ; "invalid checksum")]
    #[test_case(truncate ; "too short")]
    fn test_metadata_deserialize_corrupted(corrupt_fn: fn(&mut Vec<u8>)) {
        let mut bytes = sample().serialize().to_vec();
        corrupt_fn(&mut bytes);
        assert!(Metadata::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_store_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("q.diskqueue.meta.dat");

        assert!(load(&path).unwrap().is_none());

        store(&path, &sample()).unwrap();
        assert_eq!(load(&path).unwrap(), Some(sample()));

        let updated = Metadata {
            depth: 0,
            ..sample()
        };
        store(&path, &updated).unwrap();
        assert_eq!(load(&path).unwrap(), Some(updated));
    }

    #[test]
    fn test_cursor_ordering() {
        assert!(Cursor::new(1, 500) < Cursor::new(2, 0));
        assert!(Cursor::new(2, 10) < Cursor::new(2, 11));
    }
}
