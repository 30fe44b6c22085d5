//! Digests and checksums for objects and parts.
//!
//! MD5 is always computed because it backs every ETag. The additional
//! `x-amz-checksum-*` algorithms (CRC32, CRC32C, CRC64NVME, SHA1, SHA256)
//! are computed on request.
//!
//! # Streaming Hashing
//!
//! Bodies are never buffered whole. [`HashingReader`] wraps any
//! [`AsyncRead`] and feeds every byte that passes through it into a
//! [`StreamingHasher`], so digests are ready the moment the repository has
//! finished writing the data.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll, ready};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use digest::Digest;
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, ReadBuf};

// ---------------------------------------------------------------------------
// ChecksumAlgorithm
// ---------------------------------------------------------------------------

/// Additional checksum algorithms (MD5 is always computed for the ETag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChecksumAlgorithm {
    /// CRC-32 (IEEE 802.3).
    Crc32,
    /// CRC-32C (Castagnoli).
    Crc32c,
    /// CRC-64/NVME.
    Crc64Nvme,
    /// SHA-1.
    Sha1,
    /// SHA-256.
    Sha256,
}

impl ChecksumAlgorithm {
    /// Return the canonical string representation used in S3 headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crc32 => "CRC32",
            Self::Crc32c => "CRC32C",
            Self::Crc64Nvme => "CRC64NVME",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`ChecksumAlgorithm`] from a string fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown checksum algorithm: {0}")]
pub struct ParseChecksumAlgorithmError(String);

impl FromStr for ChecksumAlgorithm {
    type Err = ParseChecksumAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRC32" => Ok(Self::Crc32),
            "CRC32C" => Ok(Self::Crc32c),
            "CRC64NVME" => Ok(Self::Crc64Nvme),
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            _ => Err(ParseChecksumAlgorithmError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// ChecksumValue
// ---------------------------------------------------------------------------

/// A base64-encoded checksum value paired with its algorithm.
///
/// This is what object and part metadata persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumValue {
    /// The algorithm used to compute this checksum.
    pub algorithm: ChecksumAlgorithm,
    /// The base64-encoded checksum.
    pub value: String,
}

// ---------------------------------------------------------------------------
// Standalone functions
// ---------------------------------------------------------------------------

/// Compute the hex-encoded MD5 digest of `data`.
///
/// # Examples
///
/// ```
/// use s3mock_core::checksums::compute_md5;
///
/// assert_eq!(compute_md5(b"hello"), "5d41402abc4b2a76b9719d911017c592");
/// ```
#[must_use]
pub fn compute_md5(data: &[u8]) -> String {
    hex::encode(md5::Md5::digest(data))
}

/// Quote a hex digest the way ETags are rendered (`"<hex>"`).
#[must_use]
pub fn quote_etag(hex_digest: &str) -> String {
    format!("\"{hex_digest}\"")
}

/// Normalize an ETag by stripping surrounding double quotes.
///
/// # Examples
///
/// ```
/// use s3mock_core::checksums::normalize_etag;
///
/// assert_eq!(normalize_etag("\"abc\""), "abc");
/// assert_eq!(normalize_etag("abc"), "abc");
/// ```
#[must_use]
pub fn normalize_etag(etag: &str) -> &str {
    etag.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(etag)
}

/// Compute the ETag of data stored under simulated server-side encryption.
///
/// The plain MD5 of the data is re-digested together with the key reference,
/// so the same plaintext stored under different keys yields different
/// ETags, the way real SSE does.
#[must_use]
pub fn compute_salted_etag(md5_hex: &str, salt: &str) -> String {
    let mut hasher = md5::Md5::new();
    Digest::update(&mut hasher, md5_hex.as_bytes());
    Digest::update(&mut hasher, salt.as_bytes());
    quote_etag(&hex::encode(hasher.finalize()))
}

/// Compute a composite ETag for a completed multipart upload.
///
/// The result is the MD5 of the concatenated *binary* MD5 digests of each
/// part, formatted as `"<hex>-<part_count>"`. Each entry in `part_md5_hexes`
/// is a (possibly quoted) hex MD5 of one part.
///
/// # Examples
///
/// ```
/// use s3mock_core::checksums::compute_multipart_etag;
///
/// let etag = compute_multipart_etag(&["5d41402abc4b2a76b9719d911017c592"]);
/// assert!(etag.ends_with("-1\""));
/// ```
#[must_use]
pub fn compute_multipart_etag(part_md5_hexes: &[impl AsRef<str>]) -> String {
    let mut combined = Vec::with_capacity(part_md5_hexes.len() * 16);
    for hex_str in part_md5_hexes {
        if let Ok(bytes) = hex::decode(normalize_etag(hex_str.as_ref())) {
            combined.extend_from_slice(&bytes);
        }
    }
    let final_md5 = hex::encode(md5::Md5::digest(&combined));
    format!("\"{final_md5}-{}\"", part_md5_hexes.len())
}

/// Compute a base64-encoded checksum for the given algorithm.
///
/// # Examples
///
/// ```
/// use s3mock_core::checksums::{ChecksumAlgorithm, compute_checksum};
///
/// assert_eq!(compute_checksum(ChecksumAlgorithm::Crc32, b"hello"), "NhCmhg==");
/// ```
#[must_use]
pub fn compute_checksum(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
    let mut hasher = StreamingHasher::new(&[algorithm]);
    hasher.update(data);
    hasher
        .finish()
        .checksums
        .into_iter()
        .next()
        .map(|c| c.value)
        .unwrap_or_default()
}

/// Decode a base64 `Content-MD5` value into the raw 16 byte digest.
///
/// Returns `None` if the value is not base64 or not 16 bytes long.
#[must_use]
pub fn decode_content_md5(content_md5: &str) -> Option<Vec<u8>> {
    BASE64_STANDARD
        .decode(content_md5.trim())
        .ok()
        .filter(|bytes| bytes.len() == 16)
}

// ---------------------------------------------------------------------------
// StreamingHasher
// ---------------------------------------------------------------------------

/// Result produced by [`StreamingHasher::finish`].
#[derive(Debug, Clone)]
pub struct HasherResult {
    /// Hex-encoded MD5 digest.
    pub md5_hex: String,
    /// Base64-encoded checksums, one per requested algorithm.
    pub checksums: Vec<ChecksumValue>,
}

impl HasherResult {
    /// The checksum computed for `algorithm`, if it was requested.
    #[must_use]
    pub fn checksum(&self, algorithm: ChecksumAlgorithm) -> Option<&ChecksumValue> {
        self.checksums.iter().find(|c| c.algorithm == algorithm)
    }
}

/// Incremental hasher that computes MD5 and optionally additional checksums
/// over a stream of data chunks.
///
/// # Examples
///
/// ```
/// use s3mock_core::checksums::{ChecksumAlgorithm, StreamingHasher};
///
/// let mut hasher = StreamingHasher::new(&[ChecksumAlgorithm::Sha256]);
/// hasher.update(b"hello ");
/// hasher.update(b"world");
/// let result = hasher.finish();
/// assert_eq!(result.md5_hex, "5eb63bbbe01eeed093cb22bb8f5acdc3");
/// assert_eq!(result.checksums.len(), 1);
/// ```
pub struct StreamingHasher {
    md5: md5::Md5,
    sha1: Option<sha1::Sha1>,
    sha256: Option<sha2::Sha256>,
    crc32: Option<crc32fast::Hasher>,
    crc32c: Option<u32>,
    crc64nvme: Option<crc64fast_nvme::Digest>,
    algorithms: Vec<ChecksumAlgorithm>,
}

impl fmt::Debug for StreamingHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingHasher")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

impl StreamingHasher {
    /// Create a new streaming hasher computing MD5 plus `algorithms`.
    #[must_use]
    pub fn new(algorithms: &[ChecksumAlgorithm]) -> Self {
        let mut hasher = Self {
            md5: <md5::Md5 as Digest>::new(),
            sha1: None,
            sha256: None,
            crc32: None,
            crc32c: None,
            crc64nvme: None,
            algorithms: Vec::with_capacity(algorithms.len()),
        };

        for &algo in algorithms {
            if hasher.algorithms.contains(&algo) {
                continue;
            }
            match algo {
                ChecksumAlgorithm::Sha1 => hasher.sha1 = Some(<sha1::Sha1 as Digest>::new()),
                ChecksumAlgorithm::Sha256 => {
                    hasher.sha256 = Some(<sha2::Sha256 as Digest>::new());
                }
                ChecksumAlgorithm::Crc32 => hasher.crc32 = Some(crc32fast::Hasher::new()),
                ChecksumAlgorithm::Crc32c => hasher.crc32c = Some(0),
                ChecksumAlgorithm::Crc64Nvme => {
                    hasher.crc64nvme = Some(crc64fast_nvme::Digest::new());
                }
            }
            hasher.algorithms.push(algo);
        }

        hasher
    }

    /// Feed more data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        Digest::update(&mut self.md5, data);

        if let Some(ref mut h) = self.sha1 {
            Digest::update(h, data);
        }
        if let Some(ref mut h) = self.sha256 {
            Digest::update(h, data);
        }
        if let Some(ref mut h) = self.crc32 {
            h.update(data);
        }
        if let Some(ref mut val) = self.crc32c {
            *val = crc32c::crc32c_append(*val, data);
        }
        if let Some(ref mut h) = self.crc64nvme {
            h.write(data);
        }
    }

    /// Finalize the hasher and return the results.
    #[must_use]
    pub fn finish(self) -> HasherResult {
        let Self {
            md5,
            sha1,
            sha256,
            crc32,
            crc32c,
            crc64nvme,
            algorithms,
        } = self;

        let md5_hex = hex::encode(Digest::finalize(md5));
        let mut sha1 = sha1;
        let mut sha256 = sha256;
        let mut crc32 = crc32;

        let checksums = algorithms
            .iter()
            .map(|&algorithm| {
                let value = match algorithm {
                    ChecksumAlgorithm::Sha1 => sha1
                        .take()
                        .map(|h| BASE64_STANDARD.encode(Digest::finalize(h)))
                        .unwrap_or_default(),
                    ChecksumAlgorithm::Sha256 => sha256
                        .take()
                        .map(|h| BASE64_STANDARD.encode(Digest::finalize(h)))
                        .unwrap_or_default(),
                    ChecksumAlgorithm::Crc32 => {
                        let val = crc32.take().map_or(0, crc32fast::Hasher::finalize);
                        BASE64_STANDARD.encode(val.to_be_bytes())
                    }
                    ChecksumAlgorithm::Crc32c => {
                        BASE64_STANDARD.encode(crc32c.unwrap_or(0).to_be_bytes())
                    }
                    ChecksumAlgorithm::Crc64Nvme => {
                        let val = crc64nvme.as_ref().map_or(0, crc64fast_nvme::Digest::sum64);
                        BASE64_STANDARD.encode(val.to_be_bytes())
                    }
                };
                ChecksumValue { algorithm, value }
            })
            .collect();

        HasherResult { md5_hex, checksums }
    }
}

// ---------------------------------------------------------------------------
// HashingReader
// ---------------------------------------------------------------------------

pin_project! {
    /// An [`AsyncRead`] adapter that hashes everything read through it.
    #[derive(Debug)]
    pub struct HashingReader<R> {
        #[pin]
        inner: R,
        hasher: StreamingHasher,
        bytes_read: u64,
    }
}

impl<R> HashingReader<R> {
    /// Wrap `inner`, computing MD5 plus `algorithms` over its bytes.
    pub fn new(inner: R, algorithms: &[ChecksumAlgorithm]) -> Self {
        Self {
            inner,
            hasher: StreamingHasher::new(algorithms),
            bytes_read: 0,
        }
    }

    /// Number of bytes that have passed through so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Borrow the wrapped reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Finish hashing and hand back the wrapped reader with the digests.
    pub fn finish(self) -> (R, HasherResult) {
        (self.inner, self.hasher.finish())
    }
}

impl<R: AsyncRead> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        let fresh = &buf.filled()[before..];
        this.hasher.update(fresh);
        *this.bytes_read += fresh.len() as u64;
        Poll::Ready(Ok(()))
    }
}
