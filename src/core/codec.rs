//! Newline-delimited frame codec.
//!
//! Frames are the bytes between two `\n` delimiters. No escaping is performed,
//! so a payload containing `\n` is written as two frames.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::config::{FRAME_DELIMITER, MAX_BUFFERED_BYTES};
use crate::error::{ProtocolError, Result};

/// Frame delimiter byte
pub const DELIMITER: u8 = FRAME_DELIMITER;

/// Codec splitting a byte stream on [`DELIMITER`].
///
/// Decoded frames exclude the delimiter. Empty frames are yielded as empty
/// `Bytes`; filtering them is left to the application. On end of stream an
/// unterminated tail is discarded rather than emitted.
#[derive(Debug, Clone)]
pub struct LineCodec {
    /// Index up to which the buffer is known to hold no delimiter
    next_index: usize,
    max_length: usize,
}

impl LineCodec {
    /// Codec with the default unterminated-frame limit
    pub fn new() -> Self {
        Self::with_max_length(MAX_BUFFERED_BYTES)
    }

    /// Codec failing with [`ProtocolError::OversizedFrame`] once more than
    /// `max_length` bytes are buffered without a delimiter
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
        }
    }

    /// The configured unterminated-frame limit
    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        let start = self.next_index.min(src.len());
        match src[start..].iter().position(|b| *b == DELIMITER) {
            Some(offset) => {
                let end = start + offset;
                self.next_index = 0;
                let mut frame = src.split_to(end + 1);
                frame.truncate(end);
                Ok(Some(frame.freeze()))
            }
            None => {
                if src.len() > self.max_length {
                    return Err(ProtocolError::OversizedFrame(src.len()));
                }
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            debug!(discarded = src.len(), "Discarding unterminated tail at end of stream");
            src.clear();
        }
        self.next_index = 0;
        Ok(None)
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let frame = item.as_ref();
        dst.reserve(frame.len() + 1);
        dst.put_slice(frame);
        dst.put_u8(DELIMITER);
        Ok(())
    }
}
