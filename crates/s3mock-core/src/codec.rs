//! AWS chunked transfer encoding decoder.
//!
//! Clients that stream uploads with `Content-Encoding: aws-chunked` frame the
//! body like this:
//!
//! ```text
//! <hex-size>;chunk-signature=<sig>\r\n      (signed)
//! <hex-size>\r\n                            (unsigned)
//! <data>\r\n
//! ...
//! 0;chunk-signature=<sig>\r\n
//! x-amz-checksum-crc32:<base64>\r\n         (optional trailer)
//! \r\n
//! ```
//!
//! [`ChunkedDecoder`] strips that envelope on the fly. It is an
//! [`AsyncRead`] adapter that only ever holds a fixed-size lookahead buffer,
//! so arbitrarily large bodies stream through in constant memory. Once the
//! terminal chunk has been read, the trailing checksum (if any) is available
//! through [`ChunkedDecoder::trailing_checksum`].
//!
//! A stream that ends early (no terminal chunk) simply ends; only a length
//! line that is not hexadecimal is reported as an error.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use http::header::HeaderMap;
use pin_project_lite::pin_project;
use tokio::io::{AsyncBufRead, AsyncRead, BufReader, ReadBuf};
use tracing::debug;

use crate::checksums::ChecksumAlgorithm;

/// Capacity of the lookahead buffer wrapped around the raw body.
const LOOKAHEAD_CAPACITY: usize = 8 * 1024;

/// Longest length or trailer line accepted before the body is rejected.
const MAX_LINE_LEN: usize = 4 * 1024;

/// Marker that introduces a checksum trailer line.
const CHECKSUM_TRAILER_MARKER: &[u8] = b"x-amz-checksum-";

// ---------------------------------------------------------------------------
// Mode detection
// ---------------------------------------------------------------------------

/// Which framing variant the body uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkedMode {
    /// `<hex>;chunk-signature=<sig>\r\n` length lines.
    Signed,
    /// Bare `<hex>\r\n` length lines.
    Unsigned,
}

impl ChunkedMode {
    /// Derive the mode from an `x-amz-content-sha256` header value.
    ///
    /// # Examples
    ///
    /// ```
    /// use s3mock_core::codec::ChunkedMode;
    ///
    /// assert_eq!(
    ///     ChunkedMode::from_content_sha256("STREAMING-UNSIGNED-PAYLOAD-TRAILER"),
    ///     Some(ChunkedMode::Unsigned)
    /// );
    /// assert_eq!(ChunkedMode::from_content_sha256("UNSIGNED-PAYLOAD"), None);
    /// ```
    #[must_use]
    pub fn from_content_sha256(value: &str) -> Option<Self> {
        match value {
            "STREAMING-UNSIGNED-PAYLOAD-TRAILER" => Some(Self::Unsigned),
            v if v.starts_with("STREAMING-") => Some(Self::Signed),
            _ => None,
        }
    }

    /// Detect chunked framing from request headers.
    ///
    /// `x-amz-content-sha256` decides the variant. A bare
    /// `Content-Encoding: aws-chunked` without it is treated as signed.
    #[must_use]
    pub fn detect(headers: &HeaderMap) -> Option<Self> {
        if let Some(mode) = headers
            .get("x-amz-content-sha256")
            .and_then(|v| v.to_str().ok())
            .and_then(Self::from_content_sha256)
        {
            return Some(mode);
        }

        let aws_chunked = headers
            .get_all(http::header::CONTENT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("aws-chunked"))
            });
        aws_chunked.then_some(Self::Signed)
    }
}

/// Remove the `aws-chunked` token from a `Content-Encoding` value.
///
/// Returns `None` when nothing else remains, so the header is not stored.
///
/// # Examples
///
/// ```
/// use s3mock_core::codec::strip_aws_chunked;
///
/// assert_eq!(strip_aws_chunked("aws-chunked, gzip").as_deref(), Some("gzip"));
/// assert_eq!(strip_aws_chunked("aws-chunked"), None);
/// ```
#[must_use]
pub fn strip_aws_chunked(content_encoding: &str) -> Option<String> {
    let remaining: Vec<&str> = content_encoding
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("aws-chunked"))
        .collect();
    (!remaining.is_empty()).then(|| remaining.join(", "))
}

// ---------------------------------------------------------------------------
// Errors and trailer
// ---------------------------------------------------------------------------

/// Framing errors found while decoding a chunked body.
///
/// They are delivered to readers as [`io::ErrorKind::InvalidData`] errors
/// wrapping this type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkedDecodeError {
    /// The chunk length is not a hexadecimal number.
    #[error("Malformed aws-chunked body: invalid chunk size '{0}'")]
    InvalidChunkLength(String),
    /// A length or trailer line exceeds the lookahead bound.
    #[error("Malformed aws-chunked body: line longer than {0} bytes")]
    LineTooLong(usize),
}

impl From<ChunkedDecodeError> for io::Error {
    fn from(err: ChunkedDecodeError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// The checksum carried in the trailer after the terminal chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailingChecksum {
    /// Lower-case algorithm name as sent (`crc32`, `sha256`, ...).
    pub algorithm: String,
    /// Base64 checksum value.
    pub value: String,
}

impl TrailingChecksum {
    /// The algorithm, if it is one the store understands.
    #[must_use]
    pub fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.algorithm.parse().ok()
    }
}

// ---------------------------------------------------------------------------
// ChunkedDecoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    AwaitHeader,
    InPayload { remaining: u64 },
    AwaitTrailer,
    TrailerValue,
    Done,
}

pin_project! {
    /// Streaming decoder for AWS chunked bodies.
    #[derive(Debug)]
    pub struct ChunkedDecoder<R> {
        #[pin]
        inner: BufReader<R>,
        mode: ChunkedMode,
        state: DecoderState,
        line: Vec<u8>,
        in_extension: bool,
        marker_pos: usize,
        decoded: u64,
        checksum: Option<TrailingChecksum>,
    }
}

impl<R: AsyncRead> ChunkedDecoder<R> {
    /// Wrap a raw chunk-encoded body.
    pub fn new(inner: R, mode: ChunkedMode) -> Self {
        Self {
            inner: BufReader::with_capacity(LOOKAHEAD_CAPACITY, inner),
            mode,
            state: DecoderState::AwaitHeader,
            line: Vec::with_capacity(128),
            in_extension: false,
            marker_pos: 0,
            decoded: 0,
            checksum: None,
        }
    }
}

impl<R> ChunkedDecoder<R> {
    /// The framing variant this decoder expects.
    pub fn mode(&self) -> ChunkedMode {
        self.mode
    }

    /// Number of payload bytes produced so far.
    pub fn decoded_len(&self) -> u64 {
        self.decoded
    }

    /// Whether the decoder has reached the end of the body.
    pub fn is_done(&self) -> bool {
        self.state == DecoderState::Done
    }

    /// The trailing checksum, available once the body is fully read.
    pub fn trailing_checksum(&self) -> Option<&TrailingChecksum> {
        self.checksum.as_ref()
    }
}

impl<R: AsyncRead> AsyncRead for ChunkedDecoder<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut this = self.project();

        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            match *this.state {
                DecoderState::Done => return Poll::Ready(Ok(())),

                DecoderState::AwaitHeader => {
                    let available = ready!(this.inner.as_mut().poll_fill_buf(cx))?;
                    if available.is_empty() {
                        debug!(decoded = *this.decoded, "chunked body ended without terminal chunk");
                        *this.state = DecoderState::Done;
                        continue;
                    }

                    let mut consumed = 0;
                    let mut line_done = false;
                    for &b in available {
                        consumed += 1;
                        if b == b'\n' {
                            line_done = true;
                            break;
                        }
                        if *this.in_extension || b == b'\r' {
                            continue;
                        }
                        if b == b';' && *this.mode == ChunkedMode::Signed {
                            *this.in_extension = true;
                            continue;
                        }
                        if this.line.len() >= MAX_LINE_LEN {
                            return Poll::Ready(Err(
                                ChunkedDecodeError::LineTooLong(MAX_LINE_LEN).into()
                            ));
                        }
                        this.line.push(b);
                    }
                    this.inner.as_mut().consume(consumed);

                    if !line_done {
                        continue;
                    }

                    *this.in_extension = false;
                    let digits = String::from_utf8_lossy(this.line.as_slice()).trim().to_owned();
                    this.line.clear();
                    if digits.is_empty() {
                        // blank line between chunks
                        continue;
                    }

                    // from_str_radix alone would also accept a leading sign
                    let len = digits
                        .bytes()
                        .all(|b| b.is_ascii_hexdigit())
                        .then(|| u64::from_str_radix(&digits, 16).ok())
                        .flatten()
                        .ok_or_else(|| ChunkedDecodeError::InvalidChunkLength(digits.clone()))?;
                    *this.state = if len == 0 {
                        DecoderState::AwaitTrailer
                    } else {
                        DecoderState::InPayload { remaining: len }
                    };
                }

                DecoderState::InPayload { remaining } => {
                    let available = ready!(this.inner.as_mut().poll_fill_buf(cx))?;
                    if available.is_empty() {
                        debug!(remaining, "chunked body truncated inside a chunk");
                        *this.state = DecoderState::Done;
                        continue;
                    }

                    let n = usize::try_from(remaining)
                        .unwrap_or(usize::MAX)
                        .min(available.len())
                        .min(buf.remaining());
                    buf.put_slice(&available[..n]);
                    this.inner.as_mut().consume(n);

                    let left = remaining - n as u64;
                    *this.decoded += n as u64;
                    *this.state = if left == 0 {
                        DecoderState::AwaitHeader
                    } else {
                        DecoderState::InPayload { remaining: left }
                    };
                    return Poll::Ready(Ok(()));
                }

                DecoderState::AwaitTrailer => {
                    let available = ready!(this.inner.as_mut().poll_fill_buf(cx))?;
                    if available.is_empty() {
                        *this.state = DecoderState::Done;
                        continue;
                    }

                    let mut consumed = 0;
                    for &b in available {
                        consumed += 1;
                        let b = b.to_ascii_lowercase();
                        if b == CHECKSUM_TRAILER_MARKER[*this.marker_pos] {
                            *this.marker_pos += 1;
                        } else {
                            *this.marker_pos = usize::from(b == CHECKSUM_TRAILER_MARKER[0]);
                        }
                        if *this.marker_pos == CHECKSUM_TRAILER_MARKER.len() {
                            *this.state = DecoderState::TrailerValue;
                            break;
                        }
                    }
                    this.inner.as_mut().consume(consumed);
                }

                DecoderState::TrailerValue => {
                    let available = ready!(this.inner.as_mut().poll_fill_buf(cx))?;
                    let at_eof = available.is_empty();

                    let mut consumed = 0;
                    let mut line_done = at_eof;
                    for &b in available {
                        consumed += 1;
                        if b == b'\n' {
                            line_done = true;
                            break;
                        }
                        if b == b'\r' {
                            continue;
                        }
                        if this.line.len() >= MAX_LINE_LEN {
                            return Poll::Ready(Err(
                                ChunkedDecodeError::LineTooLong(MAX_LINE_LEN).into()
                            ));
                        }
                        this.line.push(b);
                    }
                    this.inner.as_mut().consume(consumed);

                    if line_done {
                        let line = String::from_utf8_lossy(this.line.as_slice()).into_owned();
                        this.line.clear();
                        if let Some((algorithm, value)) = line.split_once(':') {
                            debug!(algorithm, "decoded checksum trailer");
                            *this.checksum = Some(TrailingChecksum {
                                algorithm: algorithm.trim().to_ascii_lowercase(),
                                value: value.trim().to_owned(),
                            });
                        }
                        *this.state = DecoderState::Done;
                    }
                }
            }
        }
    }
}
