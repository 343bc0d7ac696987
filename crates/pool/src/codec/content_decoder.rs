//! Inflation of `gzip` and `deflate` content codings.

use std::io::Read;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use tracing::{debug, trace};

use crate::protocol::ParseError;
use crate::ensure;

/// Upper bound on the inflated size of a single content coding.
pub const MAX_DECODED_SIZE: usize = 32 * 1024 * 1024;

/// A content coding named by a `Content-Encoding` header value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Identity,
    Gzip,
    Deflate,
}

impl ContentCoding {
    /// Maps a single coding token, returning `None` for codings we cannot undo.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.eq_ignore_ascii_case("gzip") || token.eq_ignore_ascii_case("x-gzip") {
            Some(Self::Gzip)
        } else if token.eq_ignore_ascii_case("deflate") {
            Some(Self::Deflate)
        } else if token.is_empty() || token.eq_ignore_ascii_case("identity") {
            Some(Self::Identity)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }

    /// Undoes this coding over a complete body, inflating at most
    /// [`MAX_DECODED_SIZE`] bytes.
    ///
    /// `deflate` is accepted both zlib wrapped and as a raw deflate stream,
    /// since servers disagree on which one the name means.
    pub fn decode(&self, body: &[u8]) -> Result<Bytes, ParseError> {
        self.decode_with_limit(body, MAX_DECODED_SIZE)
    }

    /// Like [`ContentCoding::decode`] with a caller supplied output limit.
    pub fn decode_with_limit(&self, body: &[u8], limit: usize) -> Result<Bytes, ParseError> {
        let out = match self {
            Self::Identity => return Ok(Bytes::copy_from_slice(body)),
            Self::Gzip => inflate(GzDecoder::new(body), self.name(), limit)?,
            Self::Deflate => match inflate(ZlibDecoder::new(body), self.name(), limit) {
                Err(ParseError::ContentCoding { source, .. }) => {
                    debug!(cause = %source, "zlib header missing, retrying as raw deflate");
                    inflate(DeflateDecoder::new(body), self.name(), limit)?
                }
                result => result?,
            },
        };
        trace!(coding = self.name(), encoded = body.len(), decoded = out.len(), "inflated content");
        Ok(Bytes::from(out))
    }
}

/// Reads `decoder` to the end, failing once more than `limit` bytes come out.
fn inflate<R: Read>(decoder: R, coding: &'static str, limit: usize) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::new();
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    decoder.take(cap).read_to_end(&mut out).map_err(|e| ParseError::content_coding(coding, e))?;
    ensure!(out.len() <= limit, ParseError::too_large_content(coding, limit));
    Ok(out)
}

/// Undoes every coding listed in a `Content-Encoding` value, last applied first.
///
/// Returns the body unchanged when the list names a coding we do not
/// understand.
pub fn decode_content(content_encoding: &str, body: &[u8]) -> Result<Bytes, ParseError> {
    let codings: Option<Vec<ContentCoding>> = content_encoding.split(',').map(ContentCoding::from_token).collect();
    let Some(codings) = codings else {
        debug!(content_encoding, "unsupported content coding, leaving content untouched");
        return Ok(Bytes::copy_from_slice(body));
    };

    let mut decoded = Bytes::copy_from_slice(body);
    for coding in codings.iter().rev() {
        decoded = coding.decode(&decoded)?;
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
    use std::io::Write;

    const TEXT: &[u8] = b"the quick brown fox jumps over the lazy dog, twice: the quick brown fox";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn inflates_gzip() {
        assert_eq!(decode_content("gzip", &gzip(TEXT)).unwrap(), Bytes::from_static(TEXT));
    }

    #[test]
    fn inflates_zlib_and_raw_deflate() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::best());
        zlib.write_all(TEXT).unwrap();
        assert_eq!(decode_content("deflate", &zlib.finish().unwrap()).unwrap(), Bytes::from_static(TEXT));

        let mut raw = DeflateEncoder::new(Vec::new(), Compression::best());
        raw.write_all(TEXT).unwrap();
        assert_eq!(decode_content("Deflate", &raw.finish().unwrap()).unwrap(), Bytes::from_static(TEXT));
    }

    #[test]
    fn unknown_coding_is_left_alone() {
        assert_eq!(decode_content("br", b"opaque").unwrap(), Bytes::from_static(b"opaque"));
        assert_eq!(decode_content("identity", b"plain").unwrap(), Bytes::from_static(b"plain"));
    }

    #[test]
    fn stacked_codings_are_undone_in_reverse() {
        let twice = gzip(&gzip(TEXT));
        assert_eq!(decode_content("gzip, gzip", &twice).unwrap(), Bytes::from_static(TEXT));
    }

    #[test]
    fn corrupt_gzip_is_an_error() {
        let err = decode_content("gzip", b"definitely not gzip").unwrap_err();
        assert!(matches!(err, ParseError::ContentCoding { coding: "gzip", .. }));
    }

    #[test]
    fn inflation_stops_at_the_limit() {
        let bomb = gzip(&vec![0u8; 1024 * 1024]);
        assert!(bomb.len() < 8 * 1024);

        let err = ContentCoding::Gzip.decode_with_limit(&bomb, 64 * 1024).unwrap_err();
        assert!(matches!(err, ParseError::TooLargeContent { coding: "gzip", max: 65536 }));

        let exact = ContentCoding::Gzip.decode_with_limit(&gzip(TEXT), TEXT.len()).unwrap();
        assert_eq!(exact, Bytes::from_static(TEXT));
    }
}
