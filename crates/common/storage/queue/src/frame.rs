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

//! On-disk frame format.
//!
//! Payloads are stored back to back in segment files:
//!
//! ```text
//! ┌─────────────────┬──────────────────────┬─────────────────┐
//! │  Length (4B)    │   Payload (variable) │   CRC32 (4B)    │
//! │  little-endian  │   raw bytes          │   little-endian │
//! └─────────────────┴──────────────────────┴─────────────────┘
//! ```
//!
//! The CRC covers the length prefix and the payload, so a torn write is
//! detected whether it cut the header or the body.

use std::io::{self, Read};

use bytes::{BufMut, Bytes, BytesMut};
use crc32fast::Hasher;

pub(crate) const FRAME_LENGTH_SIZE: usize = 4;
pub(crate) const FRAME_CRC_SIZE: usize = 4;

/// Total on-disk size of a frame carrying `payload_len` bytes.
#[inline]
pub(crate) const fn frame_size(payload_len: usize) -> usize {
    FRAME_LENGTH_SIZE + payload_len + FRAME_CRC_SIZE
}

#[inline]
pub(crate) fn checksum(length: u32, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&length.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Encodes `payload` into a complete frame.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn encode(payload: &[u8]) -> Bytes {
    let length = payload.len() as u32;
    let mut buf = BytesMut::with_capacity(frame_size(payload.len()));
    buf.put_u32_le(length);
    buf.put_slice(payload);
    buf.put_u32_le(checksum(length, payload));
    buf.freeze()
}

/// Outcome of reading one frame from a segment.
#[derive(Debug)]
pub(crate) enum Decoded {
    /// A valid frame; `size` is its full on-disk size.
    Frame { payload: Bytes, size: u64 },
    /// The segment ends before a complete frame.
    Truncated,
    /// The frame is malformed.
    Invalid(String),
}

/// Reads the next frame from `reader`, rejecting payloads longer than
/// `max_len`.
pub(crate) fn decode<R: Read>(reader: &mut R, max_len: usize) -> io::Result<Decoded> {
    let mut len_buf = [0u8; FRAME_LENGTH_SIZE];
    if !read_full(reader, &mut len_buf)? {
        return Ok(Decoded::Truncated);
    }
    let length = u32::from_le_bytes(len_buf);
    if length as usize > max_len {
        return Ok(Decoded::Invalid(format!(
            "frame length {length} exceeds limit {max_len}"
        )));
    }

    let mut payload = vec![0u8; length as usize];
    if !read_full(reader, &mut payload)? {
        return Ok(Decoded::Truncated);
    }
    let mut crc_buf = [0u8; FRAME_CRC_SIZE];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(Decoded::Truncated);
    }

    let stored = u32::from_le_bytes(crc_buf);
    let computed = checksum(length, &payload);
    if stored != computed {
        return Ok(Decoded::Invalid(format!(
            "checksum mismatch: stored={stored:#x}, computed={computed:#x}"
        )));
    }

    Ok(Decoded::Frame {
        size:    frame_size(payload.len()) as u64,
        payload: Bytes::from(payload),
    })
}

/// Fills `buf` completely; returns `false` on a clean or partial EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(false),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
