//! Dedicated writer task draining a shared outbound buffer.
//!
//! Dispatchers append fully encoded requests to one shared byte buffer and
//! signal the writer. The writer swaps the whole buffer out and writes it
//! in a single call, so requests enqueued by different callers are coalesced
//! and reach the socket in the order they were appended.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► BytesMut (append) + Notify ─► Writer Task ─► TCP
//! Caller N ─┘
//! ```
//!
//! Only one write is ever in flight: the next swap happens after the
//! previous `write_all` + `flush` completed.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Default initial capacity of the outbound buffer.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 16 * 1024;

struct Outbound {
    buffer: Mutex<BytesMut>,
    ready: Notify,
}

/// Handle for enqueuing bytes to the writer task.
///
/// Cheaply cloneable; every clone appends to the same buffer.
#[derive(Clone)]
pub struct WriterHandle {
    shared: Arc<Outbound>,
}

impl WriterHandle {
    fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Outbound {
                buffer: Mutex::new(BytesMut::with_capacity(capacity)),
                ready: Notify::new(),
            }),
        }
    }

    /// Append encoded bytes and signal the writer.
    pub fn enqueue(&self, bytes: &[u8]) {
        self.shared.buffer.lock().extend_from_slice(bytes);
        self.shared.ready.notify_one();
    }

    /// Number of bytes waiting for the next write.
    #[cfg(test)]
    fn pending_bytes(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    /// Swap out everything enqueued so far.
    fn take(&self) -> Option<Bytes> {
        let mut buffer = self.shared.buffer.lock();
        if buffer.is_empty() {
            None
        } else {
            Some(buffer.split().freeze())
        }
    }
}

/// Spawn the writer task and return a handle for enqueuing bytes.
///
/// The task runs until a write fails or it is aborted.
pub fn spawn_writer_task<W>(writer: W, capacity: usize) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let handle = WriterHandle::new(capacity);
    let task = tokio::spawn(writer_loop(handle.clone(), writer));
    (handle, task)
}

async fn writer_loop<W>(handle: WriterHandle, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        handle.shared.ready.notified().await;

        let chunk = match handle.take() {
            Some(chunk) => chunk,
            None => continue,
        };

        if let Err(e) = write_chunk(&mut writer, &chunk).await {
            tracing::error!("Write of {} bytes failed: {}", chunk.len(), e);
            return Err(e);
        }
    }
}

async fn write_chunk<W>(writer: &mut W, chunk: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(chunk).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_enqueue_accumulates() {
        let handle = WriterHandle::new(64);
        handle.enqueue(b"abc");
        handle.enqueue(b"de");

        assert_eq!(handle.pending_bytes(), 5);
        assert_eq!(handle.take().unwrap(), Bytes::from_static(b"abcde"));
        assert_eq!(handle.pending_bytes(), 0);
        assert!(handle.take().is_none());
    }

    #[tokio::test]
    async fn test_writer_sends_enqueued_bytes() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, 64);

        handle.enqueue(b"hello");

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn test_writer_preserves_enqueue_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task(client, 64);

        let mut expected = Vec::new();
        for i in 0..100u32 {
            let bytes = i.to_be_bytes();
            expected.extend_from_slice(&bytes);
            handle.enqueue(&bytes);
        }

        let mut received = vec![0u8; expected.len()];
        server.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_signal_before_writer_waits_is_not_lost() {
        let (client, mut server) = duplex(4096);
        let handle = WriterHandle::new(64);

        // enqueue before the task even started
        handle.enqueue(b"early");
        let _task = tokio::spawn(writer_loop(handle.clone(), client));

        let mut buf = [0u8; 5];
        tokio::time::timeout(Duration::from_secs(1), server.read_exact(&mut buf))
            .await
            .expect("writer never woke up")
            .unwrap();
        assert_eq!(&buf, b"early");
    }

    #[tokio::test]
    async fn test_write_chunk() {
        let mut buf = Cursor::new(Vec::new());
        write_chunk(&mut buf, b"chunk").await.unwrap();
        assert_eq!(buf.into_inner(), b"chunk");
    }

    #[tokio::test]
    async fn test_writer_stops_when_peer_gone() {
        let (client, server) = duplex(16);
        drop(server);

        let (handle, task) = spawn_writer_task(client, 64);
        handle.enqueue(b"lost");

        let result = task.await.unwrap();
        assert!(result.is_err());
    }
}
