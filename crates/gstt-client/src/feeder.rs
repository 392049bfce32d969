//! Bounded single-producer/single-consumer conduit between an audio source and
//! the chunked request body.

use crate::error::{Result, SpeechError};
use bytes::Bytes;
use futures_util::Stream;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

/// Upper bound on the size of one queued chunk.
pub const CHUNK_SIZE: usize = 1024;
/// Default number of chunks the conduit holds before the producer waits.
pub const DEFAULT_CAPACITY: usize = 16;

type Item = std::result::Result<Bytes, io::Error>;

/// How the producer side of a conduit ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedEnd {
    Closed,
    Failed(String),
}

/// Creates a conduit holding at most `capacity` chunks of [`CHUNK_SIZE`] bytes.
pub fn channel(capacity: usize) -> (FeedWriter, FeedReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (closed_tx, closed_rx) = watch::channel(false);
    (
        FeedWriter {
            tx,
            closed: closed_rx,
            written: 0,
        },
        FeedReader {
            rx,
            closed: Arc::new(closed_tx),
            on_end: None,
            ended: false,
        },
    )
}

#[derive(Debug)]
pub struct FeedWriter {
    tx: mpsc::Sender<Item>,
    closed: watch::Receiver<bool>,
    written: u64,
}

impl FeedWriter {
    /// Queues `data`, waiting while the conduit is full.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(CHUNK_SIZE) {
            self.send(Bytes::copy_from_slice(chunk)).await?;
        }
        Ok(())
    }

    /// Like [`FeedWriter::write`] without copying `data`.
    pub async fn write_bytes(&mut self, mut data: Bytes) -> Result<()> {
        while !data.is_empty() {
            let chunk = data.split_to(data.len().min(CHUNK_SIZE));
            self.send(chunk).await?;
        }
        Ok(())
    }

    async fn send(&mut self, chunk: Bytes) -> Result<()> {
        let len = chunk.len() as u64;
        self.send_item(Ok(chunk)).await?;
        self.written += len;
        Ok(())
    }

    async fn send_item(&mut self, item: Item) -> Result<()> {
        if *self.closed.borrow() {
            return Err(SpeechError::ConduitClosed);
        }
        tokio::select! {
            sent = self.tx.send(item) => sent.map_err(|_| SpeechError::ConduitClosed),
            _ = self.closed.wait_for(|closed| *closed) => Err(SpeechError::ConduitClosed),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Chunks queued but not yet taken by the transport.
    pub fn buffered(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || *self.closed.borrow()
    }

    /// Ends the body normally.
    pub fn close(self) {
        debug!(bytes = self.written, "upload source closed");
    }

    /// Ends the body with a source failure; the transport aborts the request.
    pub async fn fail(mut self, err: io::Error) {
        warn!(error = %err, bytes = self.written, "upload source failed");
        let _ = self.send_item(Err(err)).await;
    }

    /// Copies `reader` into the conduit in [`CHUNK_SIZE`] reads until EOF.
    ///
    /// Returns the number of bytes forwarded. A read failure is forwarded to
    /// the transport and returned as [`SpeechError::SourceRead`].
    pub async fn pump<R>(mut self, mut reader: R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(err) => {
                    let forwarded = io::Error::new(err.kind(), err.to_string());
                    self.fail(forwarded).await;
                    return Err(SpeechError::SourceRead(err));
                }
            };
            if n == 0 {
                let total = self.written;
                self.close();
                return Ok(total);
            }
            trace!(n, "read from source");
            self.send(Bytes::copy_from_slice(&buf[..n])).await?;
        }
    }
}

/// Consumer end, used directly as the streaming request body.
#[derive(Debug)]
pub struct FeedReader {
    rx: mpsc::Receiver<Item>,
    closed: Arc<watch::Sender<bool>>,
    on_end: Option<oneshot::Sender<FeedEnd>>,
    ended: bool,
}

/// Closes the producer side of a conduit when dropped, wherever the
/// [`FeedReader`] itself ended up.
#[derive(Debug)]
pub struct FeedGuard {
    closed: Arc<watch::Sender<bool>>,
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

impl FeedReader {
    pub fn guard(&self) -> FeedGuard {
        FeedGuard {
            closed: Arc::clone(&self.closed),
        }
    }

    /// Resolves once the producer closed or failed. Dropping the reader
    /// before that resolves the receiver with an error.
    pub fn watch_end(&mut self) -> oneshot::Receiver<FeedEnd> {
        let (tx, rx) = oneshot::channel();
        self.on_end = Some(tx);
        rx
    }

    fn finish(&mut self, end: FeedEnd) {
        self.ended = true;
        if let Some(tx) = self.on_end.take() {
            let _ = tx.send(end);
        }
    }
}

impl Stream for FeedReader {
    type Item = std::result::Result<Bytes, SpeechError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.ended {
            return Poll::Ready(None);
        }

        match ready!(self.rx.poll_recv(cx)) {
            Some(Ok(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Some(Err(err)) => {
                self.rx.close();
                self.finish(FeedEnd::Failed(err.to_string()));
                Poll::Ready(Some(Err(SpeechError::SourceRead(err))))
            }
            None => {
                self.finish(FeedEnd::Closed);
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use futures_util::StreamExt;
    use proptest::prelude::*;
    use std::time::Duration;

    async fn drain(mut reader: FeedReader) -> (Vec<u8>, Option<SpeechError>) {
        let mut out = Vec::new();
        while let Some(item) = reader.next().await {
            match item {
                Ok(chunk) => {
                    assert!(chunk.len() <= CHUNK_SIZE);
                    out.extend_from_slice(&chunk);
                }
                Err(err) => return (out, Some(err)),
            }
        }
        (out, None)
    }

    struct FailingReader {
        remaining: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.remaining == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "mic gone")));
            }
            let n = self.remaining.min(buf.remaining()).min(100);
            buf.put_slice(&vec![7u8; n]);
            self.remaining -= n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn close_before_any_write_yields_empty_body() {
        let (writer, mut reader) = channel(4);
        let end = reader.watch_end();
        writer.close();

        let (bytes, err) = drain(reader).await;
        assert!(bytes.is_empty());
        assert!(err.is_none());
        assert_eq!(end.await.unwrap(), FeedEnd::Closed);
    }

    #[tokio::test]
    async fn producer_blocks_when_consumer_never_drains() {
        let (mut writer, _reader) = channel(2);

        writer.write(&[1u8; 2 * CHUNK_SIZE]).await.unwrap();
        assert_eq!(writer.buffered(), 2);

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), writer.write(&[2u8; 10])).await;
        assert!(blocked.is_err(), "write should wait for the consumer");
        assert_eq!(writer.buffered(), 2);
    }

    #[tokio::test]
    async fn dropped_consumer_closes_conduit() {
        let (mut writer, reader) = channel(2);
        drop(reader);

        let err = writer.write(b"abc").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConduitClosed);
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn dropping_guard_releases_blocked_producer() {
        let (mut writer, reader) = channel(1);
        let guard = reader.guard();
        writer.write(b"first").await.unwrap();

        let blocked = tokio::spawn(async move {
            let res = writer.write(b"second").await;
            (res, writer)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        let (res, writer) = blocked.await.unwrap();
        assert_eq!(res.unwrap_err().kind(), ErrorKind::ConduitClosed);
        assert!(writer.is_closed());
        drop(reader);
    }

    #[tokio::test]
    async fn source_failure_reaches_consumer_and_closes_both_ends() {
        let (writer, mut reader) = channel(64);
        let end = reader.watch_end();

        let err = writer
            .pump(FailingReader { remaining: 250 })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceRead);

        let (bytes, err) = drain(reader).await;
        assert_eq!(bytes, vec![7u8; 250]);
        assert_eq!(err.unwrap().kind(), ErrorKind::SourceRead);
        assert!(matches!(end.await.unwrap(), FeedEnd::Failed(msg) if msg.contains("mic gone")));
    }

    #[tokio::test]
    async fn pump_forwards_reader_until_eof() {
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let (writer, reader) = channel(2);

        let (pumped, (bytes, err)) = tokio::join!(writer.pump(data.as_slice()), drain(reader));

        assert_eq!(pumped.unwrap(), data.len() as u64);
        assert!(err.is_none());
        assert_eq!(bytes, data);
    }

    proptest! {
        #[test]
        fn bytes_arrive_in_write_order(
            writes in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..3000),
                0..12,
            ),
            capacity in 1usize..6,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let expected: Vec<u8> = writes.concat();

            let (received, err) = rt.block_on(async move {
                let (mut writer, reader) = channel(capacity);
                let producer = async move {
                    for w in &writes {
                        if w.len() % 2 == 0 {
                            writer.write(w).await.unwrap();
                        } else {
                            writer.write_bytes(Bytes::from(w.clone())).await.unwrap();
                        }
                    }
                    writer.close();
                };
                let ((), drained) = tokio::join!(producer, drain(reader));
                drained
            });

            prop_assert!(err.is_none());
            prop_assert_eq!(received, expected);
        }
    }
}
