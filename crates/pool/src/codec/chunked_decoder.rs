//! Incremental decoder for the `chunked` transfer coding.
//!
//! A chunked body is a sequence of `<hex size>[;ext]\r\n<data>\r\n` segments
//! closed by a zero sized chunk and an optional trailer section:
//!
//! ```text
//! 4\r\nWiki\r\n0\r\n\r\n
//! ```
//!
//! The size line is parsed with [`httparse::parse_chunk_size`], so chunk
//! extensions are skipped and anything that is not a valid size line is
//! rejected with [`ParseError::InvalidChunk`].

use bytes::{Buf, Bytes, BytesMut};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::PayloadItem;
use crate::protocol::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Waiting for a complete size line
    Size,
    /// Inside chunk data, `remaining` bytes left
    Data,
    /// Expecting the CRLF that closes a chunk
    DataEnd,
    /// After the zero sized chunk, skipping trailer fields
    Trailer,
    /// The terminating empty line has been consumed
    End,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: ChunkedState::Size, remaining: 0 }
    }

    /// Returns true once the zero sized chunk has been read.
    ///
    /// A body that stops inside the trailer section is still complete as far
    /// as its data is concerned.
    pub fn seen_last_chunk(&self) -> bool {
        matches!(self.state, ChunkedState::Trailer | ChunkedState::End)
    }

    /// Decodes a complete chunked body held in memory.
    ///
    /// Fails when a size line is malformed, a chunk is not followed by CRLF,
    /// or the input ends before the zero sized chunk.
    pub fn decode_all(body: &[u8]) -> Result<Bytes, ParseError> {
        let mut src = BytesMut::from(body);
        let mut out = BytesMut::with_capacity(body.len());
        let mut decoder = Self::new();

        loop {
            match decoder.decode(&mut src)? {
                Some(PayloadItem::Chunk(bytes)) => out.extend_from_slice(&bytes),
                Some(PayloadItem::Eof) => break,
                None if decoder.seen_last_chunk() => break,
                None => return Err(ParseError::invalid_chunk("chunked body ended before the last chunk")),
            }
        }

        Ok(out.freeze())
    }

    fn read_size(&mut self, src: &mut BytesMut) -> Result<Option<ChunkedState>, ParseError> {
        match httparse::parse_chunk_size(&src[..]) {
            Ok(Status::Complete((consumed, size))) => {
                src.advance(consumed);
                self.remaining = size;
                trace!(size, "read chunk size");
                Ok(Some(if size == 0 { ChunkedState::Trailer } else { ChunkedState::Data }))
            }
            Ok(Status::Partial) => Ok(None),
            Err(_) => {
                let line_end = src.iter().position(|&b| b == b'\n').unwrap_or(src.len());
                let line = String::from_utf8_lossy(&src[..line_end]).trim_end().to_string();
                Err(ParseError::invalid_chunk(format!("invalid chunk size line {line:?}")))
            }
        }
    }

    fn read_data(&mut self, src: &mut BytesMut) -> (ChunkedState, Bytes) {
        let available = u64::try_from(src.len()).unwrap_or(u64::MAX);
        let take = self.remaining.min(available);
        self.remaining -= take;

        // take <= src.len(), which is a usize
        let bytes = src.split_to(usize::try_from(take).unwrap_or(src.len())).freeze();
        let next = if self.remaining == 0 { ChunkedState::DataEnd } else { ChunkedState::Data };
        (next, bytes)
    }

    fn read_data_end(src: &mut BytesMut) -> Result<Option<ChunkedState>, ParseError> {
        if src.len() < 2 {
            return Ok(None);
        }
        if &src[..2] != b"\r\n" {
            return Err(ParseError::invalid_chunk("chunk data is not followed by CRLF"));
        }
        src.advance(2);
        Ok(Some(ChunkedState::Size))
    }

    fn read_trailer(src: &mut BytesMut) -> Option<ChunkedState> {
        let line_end = src.windows(2).position(|w| w == b"\r\n")?;
        src.advance(line_end + 2);
        if line_end == 0 {
            Some(ChunkedState::End)
        } else {
            // trailer fields carry nothing we surface
            Some(ChunkedState::Trailer)
        }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    /// Returns the next decoded chunk, `PayloadItem::Eof` after the final
    /// empty line, or `None` when `src` holds no complete item yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let next = match self.state {
                ChunkedState::End => return Ok(Some(PayloadItem::Eof)),
                ChunkedState::Size => self.read_size(src)?,
                ChunkedState::Data => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let (next, bytes) = self.read_data(src);
                    self.state = next;
                    trace!(len = bytes.len(), "read chunked bytes");
                    return Ok(Some(PayloadItem::Chunk(bytes)));
                }
                ChunkedState::DataEnd => Self::read_data_end(src)?,
                ChunkedState::Trailer => Self::read_trailer(src),
            };

            match next {
                Some(state) => self.state = state,
                None => return Ok(None),
            }
        }
    }
}
