//! Body decoding applied to a response's raw content.
//!
//! - [`ChunkedDecoder`]: the `chunked` transfer coding, usable incrementally
//!   through [`tokio_util::codec::Decoder`] or over a whole body
//! - [`decode_content`]: `gzip` / `deflate` content codings

mod chunked_decoder;
mod content_decoder;

pub use chunked_decoder::ChunkedDecoder;
pub use content_decoder::{ContentCoding, decode_content};

use bytes::Bytes;

/// An item produced by an incremental body decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// A run of decoded body bytes
    Chunk(Bytes),
    /// The body is complete
    Eof,
}

impl PayloadItem {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}
