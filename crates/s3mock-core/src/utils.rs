//! Shared helpers: ids, byte ranges, continuation tokens and URL encoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use rand::RngExt;

use crate::error::{S3MockError, S3MockResult};

/// Characters left untouched by `encoding-type=url`: the RFC 3986
/// unreserved set plus `/`.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

// ---------------------------------------------------------------------------
// ID generation
// ---------------------------------------------------------------------------

/// Generate a random upload ID for multipart uploads (64 hex characters).
///
/// # Examples
///
/// ```
/// use s3mock_core::utils::generate_upload_id;
///
/// let id = generate_upload_id();
/// assert_eq!(id.len(), 64);
/// assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
/// ```
#[must_use]
pub fn generate_upload_id() -> String {
    let mut rng = rand::rng();
    let mut buf = [0u8; 32];
    rng.fill(&mut buf);
    hex::encode(buf)
}

// ---------------------------------------------------------------------------
// Byte ranges
// ---------------------------------------------------------------------------

/// A requested byte range with an inclusive, optional end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte.
    pub start: u64,
    /// Last byte (inclusive); `None` reads to the end.
    pub end: Option<u64>,
}

impl ByteRange {
    /// Range from `start` to `end`, both inclusive.
    #[must_use]
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Resolve against an object of `size` bytes into an inclusive
    /// `(start, end)` pair, clamping `end` to the last byte.
    ///
    /// # Examples
    ///
    /// ```
    /// use s3mock_core::utils::ByteRange;
    ///
    /// assert_eq!(ByteRange::new(2, Some(99)).resolve(10).ok(), Some((2, 9)));
    /// assert!(ByteRange::new(10, None).resolve(10).is_err());
    /// ```
    pub fn resolve(&self, size: u64) -> S3MockResult<(u64, u64)> {
        if self.start >= size {
            return Err(S3MockError::InvalidRange);
        }
        let last = size - 1;
        let end = self.end.map_or(last, |end| end.min(last));
        if end < self.start {
            return Err(S3MockError::InvalidRange);
        }
        Ok((self.start, end))
    }
}

/// Parse an HTTP `Range` header value against an object of `size` bytes.
///
/// Supports `bytes=a-b`, `bytes=a-` and the suffix form `bytes=-n`.
///
/// # Examples
///
/// ```
/// use s3mock_core::utils::{ByteRange, parse_range_header};
///
/// assert_eq!(parse_range_header("bytes=-3", 10).ok(), Some(ByteRange::new(7, Some(9))));
/// assert_eq!(parse_range_header("bytes=4-", 10).ok(), Some(ByteRange::new(4, None)));
/// ```
pub fn parse_range_header(value: &str, size: u64) -> S3MockResult<ByteRange> {
    let range = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or(S3MockError::InvalidRange)?;
    let (first, last) = range.split_once('-').ok_or(S3MockError::InvalidRange)?;
    let number = |s: &str| s.trim().parse::<u64>().map_err(|_| S3MockError::InvalidRange);

    if first.trim().is_empty() {
        let suffix = number(last)?;
        if suffix == 0 || size == 0 {
            return Err(S3MockError::InvalidRange);
        }
        let start = size.saturating_sub(suffix);
        return Ok(ByteRange::new(start, Some(size - 1)));
    }

    let start = number(first)?;
    let end = if last.trim().is_empty() {
        None
    } else {
        Some(number(last)?)
    };
    Ok(ByteRange::new(start, end))
}

// ---------------------------------------------------------------------------
// Listing helpers
// ---------------------------------------------------------------------------

/// Encode a key or prefix as an opaque continuation token.
#[must_use]
pub fn encode_continuation_token(key: &str) -> String {
    BASE64_STANDARD.encode(key.as_bytes())
}

/// Decode a continuation token produced by [`encode_continuation_token`].
pub fn decode_continuation_token(token: &str) -> S3MockResult<String> {
    let bytes = BASE64_STANDARD
        .decode(token)
        .map_err(|_| S3MockError::invalid_argument("The continuation token provided is incorrect"))?;
    String::from_utf8(bytes)
        .map_err(|_| S3MockError::invalid_argument("The continuation token provided is incorrect"))
}

/// Percent-encode a key for `encoding-type=url` responses.
///
/// # Examples
///
/// ```
/// use s3mock_core::utils::url_encode_key;
///
/// assert_eq!(url_encode_key("a b*c~d/e"), "a%20b%2Ac~d/e");
/// ```
#[must_use]
pub fn url_encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}
