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

use std::{collections::HashSet, fs, path::Path, sync::Arc, time::Duration};

use bytes::Bytes;
use logship_queue::{BackendQueue, DiskQueue, QueueBuilder, QueueError, path::segment_file_path};
use tempfile::TempDir;

fn open(path: &Path) -> DiskQueue {
    QueueBuilder::new("stream_local_save", path)
        .sync_every(1)
        .read_timeout(Duration::from_millis(20))
        .write_rate_limit(0)
        .build()
        .unwrap()
}

async fn drain(queue: &DiskQueue) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(payload) = queue.try_recv().unwrap() {
        out.push(String::from_utf8(payload.to_vec()).unwrap());
    }
    out
}

#[tokio::test]
async fn test_queue_write_and_read() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(temp_dir.path());

    for i in 0..100 {
        queue.put(Bytes::from(format!("message-{i:04}"))).await.unwrap();
    }
    assert_eq!(queue.depth(), 100);

    for i in 0..100 {
        let payload = queue.recv().await.unwrap();
        assert_eq!(payload, Bytes::from(format!("message-{i:04}")));
    }
    assert_eq!(queue.depth(), 0);

    queue.close().unwrap();
}

#[tokio::test]
async fn test_queue_recovery() {
    let temp_dir = TempDir::new().unwrap();

    {
        let queue = open(temp_dir.path());
        for i in 0..50 {
            queue.put(Bytes::from(format!("msg-{i}"))).await.unwrap();
        }
        for _ in 0..10 {
            queue.recv().await.unwrap();
        }
        queue.close().unwrap();
    }

    let queue = open(temp_dir.path());
    assert_eq!(queue.depth(), 40);
    let expected: Vec<String> = (10..50).map(|i| format!("msg-{i}")).collect();
    assert_eq!(drain(&queue).await, expected);
    queue.close().unwrap();
}

#[tokio::test]
async fn test_queue_recovers_unsynced_writes() {
    let temp_dir = TempDir::new().unwrap();

    {
        let queue = QueueBuilder::new("stream_local_save", temp_dir.path())
            .sync_every(1_000)
            .sync_timeout(Duration::from_secs(3_600))
            .write_rate_limit(0)
            .build()
            .unwrap();
        for i in 0..5 {
            queue.put(Bytes::from(format!("unsynced-{i}"))).await.unwrap();
        }
        // Leak the queue so no final sync runs.
        std::mem::forget(queue);
    }

    let queue = open(temp_dir.path());
    assert_eq!(queue.depth(), 5);
    assert_eq!(drain(&queue).await.len(), 5);
    queue.close().unwrap();
}

#[tokio::test]
async fn test_queue_file_rolling() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new("roll", temp_dir.path())
        .max_bytes_per_file(64)
        .sync_every(1)
        .write_rate_limit(0)
        .build()
        .unwrap();

    for i in 0..25 {
        queue.put(Bytes::from(format!("roll-msg-{i:04}"))).await.unwrap();
    }
    assert!(segment_file_path(temp_dir.path(), "roll", 5).exists());

    let expected: Vec<String> = (0..25).map(|i| format!("roll-msg-{i:04}")).collect();
    assert_eq!(drain(&queue).await, expected);

    // Fully consumed segments are removed.
    assert!(!segment_file_path(temp_dir.path(), "roll", 0).exists());
    queue.close().unwrap();
}

#[tokio::test]
async fn test_oversized_frame_gets_its_own_segment() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new("big", temp_dir.path())
        .max_bytes_per_file(32)
        .write_rate_limit(0)
        .build()
        .unwrap();

    queue.put(Bytes::from(vec![b'x'; 100])).await.unwrap();
    queue.put(Bytes::from_static(b"small")).await.unwrap();

    assert_eq!(queue.try_recv().unwrap().unwrap().len(), 100);
    assert_eq!(queue.try_recv().unwrap().unwrap(), Bytes::from_static(b"small"));
    queue.close().unwrap();
}

#[tokio::test]
async fn test_corrupt_segment_is_skipped() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new("corrupt", temp_dir.path())
        .max_bytes_per_file(32)
        .sync_every(1)
        .write_rate_limit(0)
        .build()
        .unwrap();

    // One 27-byte frame per segment.
    for i in 0..3 {
        queue.put(Bytes::from(format!("payload-{i:011}"))).await.unwrap();
    }

    let first = segment_file_path(temp_dir.path(), "corrupt", 0);
    let mut bytes = fs::read(&first).unwrap();
    bytes[6] ^= 0xFF;
    fs::write(&first, bytes).unwrap();

    let remaining = drain(&queue).await;
    assert_eq!(
        remaining,
        vec!["payload-00000000001", "payload-00000000002"]
    );

    let mut bad = first.into_os_string();
    bad.push(".bad");
    assert!(Path::new(&bad).exists());

    queue.put(Bytes::from_static(b"after")).await.unwrap();
    assert_eq!(queue.try_recv().unwrap(), Some(Bytes::from_static(b"after")));
    queue.close().unwrap();
}

#[tokio::test]
async fn test_corrupt_active_segment_moves_writer() {
    let temp_dir = TempDir::new().unwrap();
    let queue = open(temp_dir.path());

    queue.put(Bytes::from_static(b"doomed")).await.unwrap();
    let active = segment_file_path(temp_dir.path(), "stream_local_save", 0);
    let mut bytes = fs::read(&active).unwrap();
    bytes[5] ^= 0xFF;
    fs::write(&active, bytes).unwrap();

    assert_eq!(queue.try_recv().unwrap(), None);
    assert_eq!(queue.depth(), 0);

    queue.put(Bytes::from_static(b"fresh")).await.unwrap();
    assert!(segment_file_path(temp_dir.path(), "stream_local_save", 1).exists());
    assert_eq!(queue.recv().await, Some(Bytes::from_static(b"fresh")));
    queue.close().unwrap();
}

#[tokio::test]
async fn test_message_size_validation() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new("sized", temp_dir.path())
        .min_msg_size(1)
        .max_msg_size(8)
        .build()
        .unwrap();

    let err = queue.put(Bytes::new()).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidMessageSize { size: 0, .. }));
    let err = queue.put(Bytes::from_static(b"123456789")).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidMessageSize { size: 9, .. }));
    assert_eq!(queue.depth(), 0);
    queue.close().unwrap();
}

#[tokio::test]
async fn test_recv_wakes_on_put() {
    let temp_dir = TempDir::new().unwrap();
    let queue = Arc::new(
        QueueBuilder::new("wake", temp_dir.path())
            .read_timeout(Duration::from_secs(60))
            .write_rate_limit(0)
            .build()
            .unwrap(),
    );

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.recv().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.put(Bytes::from_static(b"ping")).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, Some(Bytes::from_static(b"ping")));
    queue.close().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumers_receive_each_payload_once() {
    let temp_dir = TempDir::new().unwrap();
    let queue = Arc::new(open(temp_dir.path()));

    for i in 0..200 {
        queue.put(Bytes::from(format!("{i}"))).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(payload) = queue.try_recv().unwrap() {
                seen.push(String::from_utf8(payload.to_vec()).unwrap());
            }
            seen
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    assert_eq!(all.len(), 200);
    let unique: HashSet<_> = all.into_iter().collect();
    assert_eq!(unique.len(), 200);
    queue.close().unwrap();
}

#[tokio::test]
async fn test_close_unblocks_consumer() {
    let temp_dir = TempDir::new().unwrap();
    let queue = Arc::new(
        QueueBuilder::new("closing", temp_dir.path())
            .read_timeout(Duration::from_millis(50))
            .build()
            .unwrap(),
    );

    let consumer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.recv().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close().unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .unwrap()
        .unwrap();
    assert!(received.is_none());
}

#[tokio::test]
async fn test_peek_depth_leaves_open_queue_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let queue = QueueBuilder::new("stream_local_save", temp_dir.path())
        .sync_every(1_000)
        .sync_timeout(Duration::from_secs(3_600))
        .write_rate_limit(0)
        .build()
        .unwrap();
    for i in 0..3 {
        queue.put(Bytes::from(format!("pending-{i}"))).await.unwrap();
    }

    let meta_path = temp_dir.path().join("stream_local_save.diskqueue.meta.dat");
    let segment = segment_file_path(temp_dir.path(), "stream_local_save", 0);
    let meta_before = fs::read(&meta_path).unwrap();
    let segment_before = fs::read(&segment).unwrap();

    let depth = QueueBuilder::new("stream_local_save", temp_dir.path())
        .peek_depth()
        .unwrap();
    assert_eq!(depth, 3);
    assert_eq!(fs::read(&meta_path).unwrap(), meta_before);
    assert_eq!(fs::read(&segment).unwrap(), segment_before);

    // The open handle keeps appending where it left off.
    queue.put(Bytes::from_static(b"pending-3")).await.unwrap();
    assert_eq!(
        drain(&queue).await,
        vec!["pending-0", "pending-1", "pending-2", "pending-3"]
    );
    queue.close().unwrap();
}

#[tokio::test]
async fn test_peek_depth_does_not_truncate_torn_tail() {
    let temp_dir = TempDir::new().unwrap();
    {
        let queue = open(temp_dir.path());
        queue.put(Bytes::from_static(b"whole")).await.unwrap();
        queue.close().unwrap();
    }

    let segment = segment_file_path(temp_dir.path(), "stream_local_save", 0);
    let mut bytes = fs::read(&segment).unwrap();
    bytes.extend_from_slice(&[0xAB, 0xCD]);
    fs::write(&segment, &bytes).unwrap();

    let depth = QueueBuilder::new("stream_local_save", temp_dir.path())
        .peek_depth()
        .unwrap();
    assert_eq!(depth, 1);
    assert_eq!(fs::read(&segment).unwrap().len(), bytes.len());
}
