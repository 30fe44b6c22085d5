//! Object and multipart persistence.
//!
//! Both stores write through the same primitives defined here:
//!
//! - [`ingest`] streams a request body (optionally through the
//!   [`ChunkedDecoder`]) and a [`HashingReader`] into a fresh blob.
//! - [`verify_checksum`] reconciles requested, supplied and trailing
//!   checksums with what was actually stored.
//! - [`ConcatReader`] stitches the parts of a multipart upload into one
//!   stream without holding more than one part open at a time.
//!
//! Every object lives in its own directory named by its surrogate id:
//!
//! ```text
//! <bucket>/<id>/objectMetadata.json
//! <bucket>/<id>/binaryData
//! <bucket>/<id>/<uploadId>/uploadMetadata.json   (multipart staging)
//! <bucket>/<id>/<uploadId>/<n>.part[.json]
//! ```

pub mod multipart;
pub mod object;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, ReadBuf};
use uuid::Uuid;

use crate::checksums::{
    ChecksumAlgorithm, ChecksumValue, HasherResult, HashingReader, compute_salted_etag,
    decode_content_md5, quote_etag,
};
use crate::codec::{ChunkedDecoder, ChunkedMode, TrailingChecksum, strip_aws_chunked};
use crate::error::{S3MockError, S3MockResult};
use crate::kms;
use crate::repository::{BlobRepository, ByteStream, join_path};

pub use multipart::{
    CompletedPart, CopyPartRequest, ListPartsResult, MultipartStore, PrepareUploadRequest,
    PutPartRequest,
};
pub use object::{
    CopyObjectRequest, DeleteOutcome, MetadataDirective, ObjectBody, ObjectRange, ObjectStore,
    PutObjectRequest,
};

/// File name of an object's metadata document.
pub const OBJECT_METADATA_FILE: &str = "objectMetadata.json";

/// File name of an object's data.
pub const OBJECT_DATA_FILE: &str = "binaryData";

/// File name of a multipart upload's metadata document.
pub const UPLOAD_METADATA_FILE: &str = "uploadMetadata.json";

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

pub(crate) fn object_dir(bucket: &str, id: Uuid) -> String {
    join_path(&[bucket, &id.to_string()])
}

pub(crate) fn object_data_path(bucket: &str, id: Uuid) -> String {
    join_path(&[bucket, &id.to_string(), OBJECT_DATA_FILE])
}

pub(crate) fn object_metadata_path(bucket: &str, id: Uuid) -> String {
    join_path(&[bucket, &id.to_string(), OBJECT_METADATA_FILE])
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

/// What [`ingest`] learned while storing a body.
#[derive(Debug)]
pub(crate) struct Ingested {
    pub size: u64,
    pub hashes: HasherResult,
    pub trailer: Option<TrailingChecksum>,
}

/// Stream `body` into the blob at `path`, decoding chunked framing if
/// `chunked` is set and hashing the decoded bytes on the way.
pub(crate) async fn ingest(
    repo: &dyn BlobRepository,
    path: &str,
    body: ByteStream,
    chunked: Option<ChunkedMode>,
    algorithms: &[ChecksumAlgorithm],
) -> S3MockResult<Ingested> {
    match chunked {
        Some(mode) => {
            let mut reader = HashingReader::new(ChunkedDecoder::new(body, mode), algorithms);
            let size = repo.put(path, &mut reader).await?;
            let (decoder, hashes) = reader.finish();
            Ok(Ingested {
                size,
                hashes,
                trailer: decoder.trailing_checksum().cloned(),
            })
        }
        None => {
            let mut reader = HashingReader::new(body, algorithms);
            let size = repo.put(path, &mut reader).await?;
            let (_, hashes) = reader.finish();
            Ok(Ingested {
                size,
                hashes,
                trailer: None,
            })
        }
    }
}

/// Fail with `BadDigest` unless the MD5 of the stored bytes matches a
/// supplied base64 `Content-MD5`. A malformed value is `InvalidDigest`.
pub(crate) fn verify_content_md5(content_md5: Option<&str>, md5_hex: &str) -> S3MockResult<()> {
    let Some(content_md5) = content_md5 else {
        return Ok(());
    };
    let expected = decode_content_md5(content_md5).ok_or(S3MockError::InvalidDigest)?;
    if hex::encode(expected) == md5_hex {
        Ok(())
    } else {
        Err(S3MockError::BadDigest {
            what: "Content-MD5".to_owned(),
        })
    }
}

/// Determine the checksum to record for a stored blob.
///
/// A trailing checksum wins over the requested algorithm. Supplied values
/// must match the computed ones, else the write fails with `BadDigest`.
/// When the trailer names an algorithm that was not hashed while streaming,
/// the stored blob is read back once to compute it.
pub(crate) async fn verify_checksum(
    repo: &dyn BlobRepository,
    path: &str,
    ingested: &Ingested,
    requested: Option<ChecksumAlgorithm>,
    supplied: Option<&str>,
) -> S3MockResult<Option<ChecksumValue>> {
    let (algorithm, expected) = match ingested.trailer.as_ref() {
        Some(trailer) => {
            let algorithm = trailer.checksum_algorithm().ok_or_else(|| {
                S3MockError::invalid_request(format!(
                    "Unsupported trailing checksum algorithm: {}",
                    trailer.algorithm
                ))
            })?;
            (algorithm, Some(trailer.value.as_str()))
        }
        None => match requested {
            Some(algorithm) => (algorithm, supplied),
            None => return Ok(None),
        },
    };

    let computed = match ingested.hashes.checksum(algorithm) {
        Some(value) => value.clone(),
        None => checksum_blob(repo, path, algorithm).await?,
    };

    if let Some(expected) = expected {
        if expected.trim() != computed.value {
            return Err(S3MockError::BadDigest {
                what: format!("x-amz-checksum-{}", algorithm.as_str().to_ascii_lowercase()),
            });
        }
    }
    Ok(Some(computed))
}

async fn checksum_blob(
    repo: &dyn BlobRepository,
    path: &str,
    algorithm: ChecksumAlgorithm,
) -> S3MockResult<ChecksumValue> {
    let stream = repo
        .open(path)
        .await?
        .ok_or_else(|| anyhow::anyhow!("blob {path} vanished before its checksum was computed"))?;
    let mut reader = HashingReader::new(stream, &[algorithm]);
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    let (_, result) = reader.finish();
    result
        .checksum(algorithm)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("checksum {algorithm} was not computed").into())
}

/// The ETag of freshly written data: the quoted MD5, salted when the data
/// is stored under (simulated) server-side encryption.
pub(crate) fn object_etag(md5_hex: &str, encryption_headers: &HashMap<String, String>) -> String {
    match kms::etag_salt(encryption_headers) {
        Some(salt) => compute_salted_etag(md5_hex, salt),
        None => quote_etag(md5_hex),
    }
}

/// Drop the `aws-chunked` token from a stored `Content-Encoding` header.
pub(crate) fn sanitize_store_headers(headers: &mut BTreeMap<String, String>) {
    let Some(name) = headers
        .keys()
        .find(|k| k.eq_ignore_ascii_case("content-encoding"))
        .cloned()
    else {
        return;
    };
    match headers.get(&name).and_then(|v| strip_aws_chunked(v)) {
        Some(value) => {
            headers.insert(name, value);
        }
        None => {
            headers.remove(&name);
        }
    }
}

// ---------------------------------------------------------------------------
// ConcatReader
// ---------------------------------------------------------------------------

type OpenFuture = Pin<Box<dyn Future<Output = S3MockResult<Option<ByteStream>>> + Send>>;

/// Reads a list of blobs back to back, opening each one only when the
/// previous one is exhausted.
pub(crate) struct ConcatReader {
    repo: Arc<dyn BlobRepository>,
    pending: VecDeque<String>,
    opening: Option<OpenFuture>,
    current: Option<ByteStream>,
}

impl fmt::Debug for ConcatReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcatReader")
            .field("pending", &self.pending.len())
            .field("open", &self.current.is_some())
            .finish_non_exhaustive()
    }
}

impl ConcatReader {
    pub(crate) fn new(repo: Arc<dyn BlobRepository>, paths: Vec<String>) -> Self {
        Self {
            repo,
            pending: paths.into(),
            opening: None,
            current: None,
        }
    }
}

impl AsyncRead for ConcatReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if let Some(current) = this.current.as_mut() {
                let before = buf.filled().len();
                ready!(current.as_mut().poll_read(cx, buf))?;
                if buf.filled().len() > before || buf.remaining() == 0 {
                    return Poll::Ready(Ok(()));
                }
                this.current = None;
            }

            if let Some(opening) = this.opening.as_mut() {
                let opened = ready!(opening.as_mut().poll(cx));
                this.opening = None;
                match opened {
                    Ok(Some(stream)) => this.current = Some(stream),
                    Ok(None) => {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::NotFound,
                            "part data vanished while concatenating",
                        )));
                    }
                    Err(e) => return Poll::Ready(Err(io::Error::other(e))),
                }
                continue;
            }

            let Some(path) = this.pending.pop_front() else {
                return Poll::Ready(Ok(()));
            };
            let repo = Arc::clone(&this.repo);
            this.opening = Some(Box::pin(async move { repo.open(&path).await }));
        }
    }
}
