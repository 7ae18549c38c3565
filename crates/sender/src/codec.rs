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

//! Batch envelope stored in the disk queues.
//!
//! A batch is persisted as `{"datas": [record, ...]}`. Numbers keep their
//! decimal text through a decode/encode cycle, so integers wider than an
//! `f64` mantissa are never rounded.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One schema-less record.
pub type Record = Map<String, Value>;

/// An ordered group of records delivered together.
pub type Batch = Vec<Record>;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    #[serde(rename = "datas")]
    records: &'a [Record],
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "datas")]
    records: Batch,
}

/// Serializes `batch` into a queue entry.
pub fn encode(batch: &[Record]) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(&EnvelopeRef { records: batch }).map(Bytes::from)
}

/// Parses a queue entry back into its batch.
pub fn decode(raw: &[u8]) -> Result<Batch, serde_json::Error> {
    serde_json::from_slice::<Envelope>(raw).map(|envelope| envelope.records)
}
