//! Line-delimited frame reader.
//!
//! [`LineReader`] turns an arbitrarily chunked byte stream into discrete frames.
//! It sits on top of any `AsyncRead`, so it behaves the same on a plaintext
//! socket and on a TLS session (it only ever sees decrypted bytes).
//!
//! ## Notification model
//! [`LineReader::ready`] resolves once per socket read that completed at least
//! one new frame, returning how many frames that read completed. One
//! notification may therefore cover several frames; callers drain with
//! [`LineReader::read_line`] until it returns `None`:
//!
//! ```ignore
//! let mut reader = LineReader::new(connection);
//! while reader.ready().await.is_ok() {
//!     while let Some(frame) = reader.read_line() {
//!         if !frame.is_empty() {
//!             handle(frame);
//!         }
//!     }
//! }
//! ```
//!
//! ## Closing
//! When the stream ends, complete frames already buffered stay readable but the
//! unterminated tail is dropped. [`LineReader::close`] drops everything.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

use crate::config::FrameConfig;
use crate::core::codec::{LineCodec, DELIMITER};
use crate::error::{is_disconnect, ProtocolError, Result};
use crate::utils::metrics::global_metrics;

/// Frame reader over a byte stream.
pub struct LineReader<S> {
    stream: S,
    buffer: BytesMut,
    codec: LineCodec,
    /// Complete frames sitting at the front of `buffer`
    complete: usize,
    /// Bytes after the last delimiter in `buffer`
    tail_len: usize,
    closed: bool,
    max_buffered_bytes: usize,
    read_chunk_size: usize,
}

impl<S> LineReader<S> {
    /// Number of raw buffered bytes not yet consumed, partial frame included.
    pub fn bytes_available(&self) -> usize {
        self.buffer.len()
    }

    /// Number of complete frames ready for [`read_line`](Self::read_line).
    pub fn frames_available(&self) -> usize {
        self.complete
    }

    /// Remove and return the next complete frame, without its delimiter.
    ///
    /// Returns `None` when no delimited frame is buffered. An empty frame is
    /// returned as-is.
    pub fn read_line(&mut self) -> Option<Bytes> {
        if self.complete == 0 {
            return None;
        }
        match self.codec.decode(&mut self.buffer) {
            Ok(Some(frame)) => {
                self.complete -= 1;
                global_metrics().frame_received(frame.len() as u64);
                Some(frame)
            }
            Ok(None) => {
                // The buffer holds no delimiter, so the count is stale
                warn!(
                    counted = self.complete,
                    buffered = self.buffer.len(),
                    "Frame count out of step with buffer; resetting"
                );
                self.complete = 0;
                None
            }
            Err(e) => {
                warn!(error = %e, "Frame buffer unreadable; discarding");
                global_metrics().oversized_frame();
                self.discard_all();
                None
            }
        }
    }

    /// Whether the underlying stream has ended or the reader was closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Shared access to the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutable access to the wrapped stream, e.g. to write replies.
    ///
    /// Reading from it directly bypasses the frame buffer.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Unwrap the stream, dropping any buffered bytes.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Drop the unterminated tail and mark the stream as ended.
    fn finish(&mut self) {
        if self.tail_len > 0 {
            debug!(discarded = self.tail_len, "Discarding unterminated tail");
            let keep = self.buffer.len() - self.tail_len;
            self.buffer.truncate(keep);
            self.tail_len = 0;
        }
        self.closed = true;
    }

    fn discard_all(&mut self) {
        self.buffer.clear();
        self.codec = LineCodec::with_max_length(self.max_buffered_bytes);
        self.complete = 0;
        self.tail_len = 0;
        self.closed = true;
    }
}

impl<S: AsyncRead + Unpin> LineReader<S> {
    /// Create a reader with the default frame configuration
    pub fn new(stream: S) -> Self {
        Self::with_config(stream, &FrameConfig::default())
    }

    /// Create a reader with a custom frame configuration
    pub fn with_config(stream: S, config: &FrameConfig) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(config.read_chunk_size),
            codec: LineCodec::with_max_length(config.max_buffered_bytes),
            complete: 0,
            tail_len: 0,
            closed: false,
            max_buffered_bytes: config.max_buffered_bytes,
            read_chunk_size: config.read_chunk_size.max(1),
        }
    }

    /// Wait until a read completes at least one new frame.
    ///
    /// Returns the number of frames that read completed. Frames left unread
    /// from earlier notifications do not satisfy the wait.
    ///
    /// Fails with [`ProtocolError::ConnectionClosed`] once the stream ends, and
    /// with [`ProtocolError::OversizedFrame`] if an unterminated frame outgrows
    /// the configured limit (the reader then discards its buffer and stops).
    pub async fn ready(&mut self) -> Result<usize> {
        loop {
            if self.closed {
                return Err(ProtocolError::ConnectionClosed);
            }

            self.buffer.reserve(self.read_chunk_size);
            let start = self.buffer.len();
            let read = match self.stream.read_buf(&mut self.buffer).await {
                Ok(read) => read,
                Err(e) => {
                    self.finish();
                    if is_disconnect(&e) {
                        return Err(ProtocolError::ConnectionClosed);
                    }
                    global_metrics().connection_error();
                    return Err(ProtocolError::Io(e));
                }
            };

            if read == 0 {
                trace!("Stream ended");
                self.finish();
                return Err(ProtocolError::ConnectionClosed);
            }

            let chunk = &self.buffer[start..];
            let added = chunk.iter().filter(|b| **b == DELIMITER).count();
            match chunk.iter().rposition(|b| *b == DELIMITER) {
                Some(last) => self.tail_len = chunk.len() - last - 1,
                None => self.tail_len += chunk.len(),
            }

            if self.tail_len > self.max_buffered_bytes {
                let buffered = self.tail_len;
                warn!(
                    buffered,
                    limit = self.max_buffered_bytes,
                    "Unterminated frame exceeds buffer limit"
                );
                global_metrics().oversized_frame();
                self.discard_all();
                return Err(ProtocolError::OversizedFrame(buffered));
            }

            if added > 0 {
                self.complete += added;
                trace!(
                    added,
                    pending = self.complete,
                    buffered = self.buffer.len(),
                    "Frames ready"
                );
                return Ok(added);
            }
        }
    }

    /// Read the next frame, waiting for more data as needed.
    ///
    /// Returns `Ok(None)` once the stream has ended and no complete frame is
    /// left.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.read_line() {
                return Ok(Some(frame));
            }
            match self.ready().await {
                Ok(_) => continue,
                Err(ProtocolError::ConnectionClosed) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }
}

impl<S: AsyncWrite + Unpin> LineReader<S> {
    /// Close the reader and shut down the stream.
    ///
    /// Buffered frames are discarded; nothing pending is delivered afterwards.
    pub async fn close(&mut self) -> Result<()> {
        self.discard_all();
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(&e) => Ok(()),
            Err(e) => Err(ProtocolError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_single_read_with_many_frames_is_one_notification() {
        let (mut tx, rx) = duplex(1024);
        let mut reader = LineReader::new(rx);

        tx.write_all(b"foobar\nbarfoo\nfoobar?\n").await.unwrap();
        assert_eq!(reader.ready().await.unwrap(), 3);
        assert_eq!(reader.frames_available(), 3);

        assert_eq!(reader.read_line(), Some(Bytes::from("foobar")));
        assert_eq!(reader.read_line(), Some(Bytes::from("barfoo")));
        assert_eq!(reader.read_line(), Some(Bytes::from("foobar?")));
        assert_eq!(reader.read_line(), None);
        assert_eq!(reader.bytes_available(), 0);
    }

    #[tokio::test]
    async fn test_lone_delimiter_yields_one_empty_frame() {
        let (mut tx, rx) = duplex(64);
        let mut reader = LineReader::new(rx);

        tx.write_all(b"\n").await.unwrap();
        assert_eq!(reader.ready().await.unwrap(), 1);
        assert_eq!(reader.read_line(), Some(Bytes::new()));
        assert_eq!(reader.bytes_available(), 0);
    }

    #[tokio::test]
    async fn test_partial_frame_counts_as_available_bytes() {
        let (mut tx, rx) = duplex(64);
        let mut reader = LineReader::new(rx);

        tx.write_all(b"one\ntw").await.unwrap();
        assert_eq!(reader.ready().await.unwrap(), 1);
        assert_eq!(reader.bytes_available(), 6);
        assert_eq!(reader.read_line(), Some(Bytes::from("one")));
        assert_eq!(reader.bytes_available(), 2);
        assert_eq!(reader.read_line(), None);

        tx.write_all(b"o\n").await.unwrap();
        assert_eq!(reader.ready().await.unwrap(), 1);
        assert_eq!(reader.read_line(), Some(Bytes::from("two")));
    }

    #[tokio::test]
    async fn test_stream_end_discards_tail_but_keeps_complete_frames() {
        let (mut tx, rx) = duplex(64);
        let mut reader = LineReader::new(rx);

        tx.write_all(b"kept\ndropped").await.unwrap();
        drop(tx);

        assert_eq!(reader.ready().await.unwrap(), 1);
        assert!(matches!(
            reader.ready().await,
            Err(ProtocolError::ConnectionClosed)
        ));
        assert!(reader.is_closed());
        assert_eq!(reader.bytes_available(), 5);
        assert_eq!(reader.read_line(), Some(Bytes::from("kept")));
        assert_eq!(reader.read_line(), None);
        assert_eq!(reader.bytes_available(), 0);
    }

    #[tokio::test]
    async fn test_close_drops_pending_frames() {
        let (mut tx, rx) = duplex(64);
        let mut reader = LineReader::new(rx);

        tx.write_all(b"pending\n").await.unwrap();
        assert_eq!(reader.ready().await.unwrap(), 1);

        reader.close().await.unwrap();
        assert_eq!(reader.read_line(), None);
        assert_eq!(reader.bytes_available(), 0);
        assert!(matches!(
            reader.ready().await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_tail_fails_reader() {
        let (mut tx, rx) = duplex(8192);
        let config = FrameConfig {
            max_buffered_bytes: 1024,
            read_chunk_size: 256,
        };
        let mut reader = LineReader::with_config(rx, &config);

        tx.write_all(&[b'a'; 2048]).await.unwrap();
        let mut result = reader.ready().await;
        assert!(matches!(result, Err(ProtocolError::OversizedFrame(n)) if n > 1024));
        result = reader.ready().await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_stale_frame_count_is_reset() {
        let (_tx, rx) = duplex(64);
        let mut reader = LineReader::new(rx);
        reader.buffer.extend_from_slice(b"only\npart");
        reader.tail_len = 4;
        reader.complete = 2;

        assert_eq!(reader.read_line(), Some(Bytes::from("only")));
        assert_eq!(reader.read_line(), None);
        assert_eq!(reader.frames_available(), 0);
        assert_eq!(reader.bytes_available(), 4);
        assert!(!reader.is_closed());
    }

    #[tokio::test]
    async fn test_undecodable_buffer_is_discarded() {
        let (_tx, rx) = duplex(64);
        let config = FrameConfig {
            max_buffered_bytes: 16,
            read_chunk_size: 8,
        };
        let mut reader = LineReader::with_config(rx, &config);
        reader.buffer.extend_from_slice(&[b'x'; 32]);
        reader.complete = 1;

        assert_eq!(reader.read_line(), None);
        assert_eq!(reader.frames_available(), 0);
        assert_eq!(reader.bytes_available(), 0);
        assert!(reader.is_closed());
    }

    #[tokio::test]
    async fn test_next_frame_returns_none_after_end() {
        let (mut tx, rx) = duplex(64);
        let mut reader = LineReader::new(rx);

        tx.write_all(b"a\nb\n").await.unwrap();
        drop(tx);

        assert_eq!(reader.next_frame().await.unwrap(), Some(Bytes::from("a")));
        assert_eq!(reader.next_frame().await.unwrap(), Some(Bytes::from("b")));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }
}
