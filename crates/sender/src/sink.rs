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

//! Downstream delivery contract.

use std::io::{self, Write};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::codec::{Batch, Record};

/// Classification of a failed delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    #[default]
    Default,
    /// The batch is too large or unparseable for the sink as a whole; it is
    /// retried in two halves.
    Oversized,
}

/// Failure reported by [`Sink::deliver`].
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("{message}")]
pub struct DeliveryError {
    pub message: String,
    /// Records that were not delivered. `None` means the sink cannot tell,
    /// and the whole batch counts as failed.
    pub failed:  Option<Batch>,
    pub kind:    FailureKind,
}

impl DeliveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            failed:  None,
            kind:    FailureKind::Default,
        }
    }

    #[must_use]
    pub fn with_failed(mut self, failed: Batch) -> Self {
        self.failed = Some(failed);
        self
    }

    #[must_use]
    pub fn oversized(mut self) -> Self {
        self.kind = FailureKind::Oversized;
        self
    }
}

/// A destination for record batches.
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> String;

    /// Delivers `batch`; on partial failure the error lists what was lost.
    async fn deliver(&self, batch: &[Record]) -> Result<(), DeliveryError>;

    async fn close(&self) -> Result<(), DeliveryError>;
}

/// Writes every record as one JSON line.
pub struct JsonLinesSink<W> {
    name:   String,
    writer: Mutex<W>,
}

/// [`JsonLinesSink`] on the process stdout.
pub type StdoutSink = JsonLinesSink<io::Stdout>;

impl StdoutSink {
    pub fn stdout() -> Self { Self::new("stdout", io::stdout()) }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name:   name.into(),
            writer: Mutex::new(writer),
        }
    }

    /// Consumes the sink, returning the underlying writer.
    pub fn into_inner(self) -> W { self.writer.into_inner() }

    fn write_batch(&self, batch: &[Record]) -> io::Result<()> {
        let mut writer = self.writer.lock();
        for record in batch {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}

#[async_trait]
impl<W: Write + Send> Sink for JsonLinesSink<W> {
    fn name(&self) -> String { self.name.clone() }

    async fn deliver(&self, batch: &[Record]) -> Result<(), DeliveryError> {
        self.write_batch(batch).map_err(|e| {
            DeliveryError::new(format!("{} write failed: {e}", self.name)).with_failed(batch.to_vec())
        })
    }

    async fn close(&self) -> Result<(), DeliveryError> {
        self.writer
            .lock()
            .flush()
            .map_err(|e| DeliveryError::new(format!("{} flush failed: {e}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_json_lines_sink_writes_one_line_per_record() {
        let sink = JsonLinesSink::new("memory", Vec::new());
        let batch: Batch = vec![
            json!({"msg": "a", "n": 1}).as_object().unwrap().clone(),
            json!({"msg": "b"}).as_object().unwrap().clone(),
        ];

        sink.deliver(&batch).await.unwrap();
        sink.close().await.unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "{\"msg\":\"a\",\"n\":1}\n{\"msg\":\"b\"}\n");
    }

    #[test]
    fn test_delivery_error_builders() {
        let err = DeliveryError::new("too big").with_failed(Vec::new()).oversized();
        assert_eq!(err.to_string(), "too big");
        assert_eq!(err.kind, FailureKind::Oversized);
        assert_eq!(err.failed, Some(Vec::new()));
        assert_eq!(FailureKind::Oversized.to_string(), "oversized");
    }
}
