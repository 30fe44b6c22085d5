//! Object persistence: put, get, range, copy, delete and the metadata
//! sidecars (tags, retention, legal hold, ACL).
//!
//! Writes follow a copy-then-swap discipline. Every write allocates a fresh
//! id, writes data and metadata under that id and only then repoints the key
//! in the [`KeyIndex`]. The directory of the replaced id is removed after the
//! swap, so concurrent readers observe either the old or the new object in
//! full.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::{
    ingest, object_data_path, object_dir, object_etag, object_metadata_path,
    sanitize_store_headers, verify_checksum, verify_content_md5,
};
use crate::checksums::ChecksumAlgorithm;
use crate::codec::ChunkedMode;
use crate::error::{S3MockError, S3MockResult};
use crate::index::KeyIndex;
use crate::kms::{KmsKeyValidator, verify_encryption};
use crate::repository::{BlobRepository, ByteStream, get_json, put_json};
use crate::state::{
    AccessControlPolicy, LegalHold, ObjectMetadata, Owner, Retention, StorageClass, Tag,
};
use crate::utils::ByteRange;
use crate::validation::{validate_metadata, validate_object_key, validate_tags};

/// How many times a read retries when the key is swapped underneath it.
const READ_ATTEMPTS: usize = 3;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// Input of [`ObjectStore::put`].
#[derive(TypedBuilder)]
pub struct PutObjectRequest {
    /// Target bucket.
    #[builder(setter(into))]
    pub bucket: String,
    /// Target key.
    #[builder(setter(into))]
    pub key: String,
    /// Raw request body.
    pub body: ByteStream,
    /// Chunked framing of `body`, if any.
    #[builder(default)]
    pub chunked: Option<ChunkedMode>,
    /// `Content-Type` to store.
    #[builder(default, setter(strip_option, into))]
    pub content_type: Option<String>,
    /// Other headers stored and replayed verbatim (content-encoding,
    /// cache-control, ...).
    #[builder(default)]
    pub store_headers: BTreeMap<String, String>,
    /// `x-amz-meta-*` user metadata.
    #[builder(default)]
    pub user_metadata: HashMap<String, String>,
    /// Server-side encryption headers.
    #[builder(default)]
    pub encryption_headers: HashMap<String, String>,
    /// Tag set.
    #[builder(default)]
    pub tags: Vec<Tag>,
    /// Object lock retention.
    #[builder(default)]
    pub retention: Option<Retention>,
    /// Object lock legal hold.
    #[builder(default)]
    pub legal_hold: Option<LegalHold>,
    /// Owner of the new object.
    #[builder(default)]
    pub owner: Owner,
    /// Storage class.
    #[builder(default)]
    pub storage_class: StorageClass,
    /// Additional checksum algorithm to compute.
    #[builder(default)]
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
    /// Checksum value supplied by the client for `checksum_algorithm`.
    #[builder(default, setter(strip_option, into))]
    pub checksum_value: Option<String>,
    /// Base64 `Content-MD5` supplied by the client.
    #[builder(default, setter(strip_option, into))]
    pub content_md5: Option<String>,
}

impl fmt::Debug for PutObjectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutObjectRequest")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("chunked", &self.chunked)
            .field("content_type", &self.content_type)
            .field("storage_class", &self.storage_class)
            .finish_non_exhaustive()
    }
}

/// Whether a copy carries the source's metadata or the request's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataDirective {
    /// Keep the source's user metadata and stored headers.
    #[default]
    Copy,
    /// Use the metadata supplied with the copy request.
    Replace,
}

/// Input of [`ObjectStore::copy`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct CopyObjectRequest {
    /// Source bucket.
    #[builder(setter(into))]
    pub src_bucket: String,
    /// Source key.
    #[builder(setter(into))]
    pub src_key: String,
    /// Destination bucket.
    #[builder(setter(into))]
    pub dst_bucket: String,
    /// Destination key.
    #[builder(setter(into))]
    pub dst_key: String,
    /// Metadata handling.
    #[builder(default)]
    pub metadata_directive: MetadataDirective,
    /// Encryption headers of the destination object.
    #[builder(default)]
    pub encryption_headers: HashMap<String, String>,
    /// `Content-Type` used with [`MetadataDirective::Replace`].
    #[builder(default, setter(strip_option, into))]
    pub content_type: Option<String>,
    /// Stored headers used with [`MetadataDirective::Replace`].
    #[builder(default)]
    pub store_headers: BTreeMap<String, String>,
    /// User metadata used with [`MetadataDirective::Replace`].
    #[builder(default)]
    pub user_metadata: HashMap<String, String>,
    /// New storage class; the source's is kept when `None`.
    #[builder(default)]
    pub storage_class: Option<StorageClass>,
    /// Owner of the copy.
    #[builder(default)]
    pub owner: Owner,
}

/// An object's metadata together with its content.
pub struct ObjectBody {
    /// Metadata of the object read.
    pub metadata: ObjectMetadata,
    /// The object's bytes.
    pub body: ByteStream,
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// A byte slice of an object.
pub struct ObjectRange {
    /// Metadata of the object read.
    pub metadata: ObjectMetadata,
    /// First byte returned.
    pub start: u64,
    /// Last byte returned (inclusive).
    pub end: u64,
    /// Total object length.
    pub total: u64,
    /// The requested bytes.
    pub body: ByteStream,
}

impl fmt::Debug for ObjectRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRange")
            .field("key", &self.metadata.key)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Result of deleting one key in a batch.
#[derive(Debug)]
pub struct DeleteOutcome {
    /// Key the outcome refers to.
    pub key: String,
    /// The failure, if the key could not be deleted.
    pub error: Option<S3MockError>,
}

impl DeleteOutcome {
    /// Whether the key is gone (it may never have existed).
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// ObjectStore
// ---------------------------------------------------------------------------

/// Persists object data and metadata keyed by surrogate id.
#[derive(Debug)]
pub struct ObjectStore {
    repo: Arc<dyn BlobRepository>,
    index: Arc<KeyIndex>,
    kms: Arc<dyn KmsKeyValidator>,
}

impl ObjectStore {
    /// Create a store over `repo`, mapping keys through `index` and checking
    /// KMS key references with `kms`.
    #[must_use]
    pub fn new(
        repo: Arc<dyn BlobRepository>,
        index: Arc<KeyIndex>,
        kms: Arc<dyn KmsKeyValidator>,
    ) -> Self {
        Self { repo, index, kms }
    }

    /// Store an object, replacing any previous object at the key.
    pub async fn put(&self, request: PutObjectRequest) -> S3MockResult<ObjectMetadata> {
        let PutObjectRequest {
            bucket,
            key,
            body,
            chunked,
            content_type,
            mut store_headers,
            user_metadata,
            encryption_headers,
            tags,
            retention,
            legal_hold,
            owner,
            storage_class,
            checksum_algorithm,
            checksum_value,
            content_md5,
        } = request;

        validate_object_key(&key)?;
        validate_metadata(&user_metadata)?;
        validate_tags(&tags)?;
        verify_encryption(self.kms.as_ref(), &encryption_headers)?;
        sanitize_store_headers(&mut store_headers);

        let id = self.index.allocate_id(&bucket, &key)?;
        let data_path = object_data_path(&bucket, id);
        let algorithms: Vec<ChecksumAlgorithm> = checksum_algorithm.into_iter().collect();

        let written = async {
            let ingested = ingest(self.repo.as_ref(), &data_path, body, chunked, &algorithms).await?;
            verify_content_md5(content_md5.as_deref(), &ingested.hashes.md5_hex)?;
            let checksum = verify_checksum(
                self.repo.as_ref(),
                &data_path,
                &ingested,
                checksum_algorithm,
                checksum_value.as_deref(),
            )
            .await?;
            Ok::<_, S3MockError>((ingested, checksum))
        }
        .await;
        let (ingested, checksum) = match written {
            Ok(written) => written,
            Err(e) => {
                self.discard(&bucket, id).await;
                return Err(e);
            }
        };

        let metadata = ObjectMetadata {
            id,
            key,
            data_path: self.repo.locate(&data_path),
            size: ingested.size,
            etag: object_etag(&ingested.hashes.md5_hex, &encryption_headers),
            content_type,
            last_modified: Utc::now(),
            store_headers,
            user_metadata,
            encryption_headers,
            tags,
            retention,
            legal_hold,
            owner,
            storage_class,
            checksum,
            acl: None,
            parts_count: None,
        };
        if let Err(e) = self.commit(&bucket, &metadata).await {
            self.discard(&bucket, id).await;
            return Err(e);
        }
        debug!(bucket = %bucket, key = %metadata.key, size = metadata.size, etag = %metadata.etag, "object stored");
        Ok(metadata)
    }

    /// Read an object. Fails with `NoSuchKey` if the key is unmapped.
    pub async fn get(&self, bucket: &str, key: &str) -> S3MockResult<ObjectBody> {
        for _ in 0..READ_ATTEMPTS {
            let metadata = self.get_metadata(bucket, key).await?;
            if let Some(body) = self.repo.open(&object_data_path(bucket, metadata.id)).await? {
                return Ok(ObjectBody { metadata, body });
            }
        }
        Err(no_such_key(key))
    }

    /// Read an object's metadata. Fails with `NoSuchKey` if the key is
    /// unmapped.
    pub async fn get_metadata(&self, bucket: &str, key: &str) -> S3MockResult<ObjectMetadata> {
        for _ in 0..READ_ATTEMPTS {
            let id = self.index.resolve(bucket, key)?.ok_or_else(|| no_such_key(key))?;
            if let Some(metadata) = self.metadata_by_id(bucket, id).await? {
                return Ok(metadata);
            }
        }
        Err(no_such_key(key))
    }

    /// Read a byte range of an object.
    pub async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        range: ByteRange,
    ) -> S3MockResult<ObjectRange> {
        for _ in 0..READ_ATTEMPTS {
            let metadata = self.get_metadata(bucket, key).await?;
            let (start, end) = range.resolve(metadata.size)?;
            if let Some(body) = self
                .repo
                .open_range(&object_data_path(bucket, metadata.id), start, end - start + 1)
                .await?
            {
                let total = metadata.size;
                return Ok(ObjectRange {
                    metadata,
                    start,
                    end,
                    total,
                    body,
                });
            }
        }
        Err(no_such_key(key))
    }

    /// Copy an object.
    ///
    /// The ETag is carried over only when neither side is encrypted; in all
    /// other cases it is recomputed for the destination.
    pub async fn copy(&self, request: CopyObjectRequest) -> S3MockResult<ObjectMetadata> {
        let CopyObjectRequest {
            src_bucket,
            src_key,
            dst_bucket,
            dst_key,
            metadata_directive,
            encryption_headers,
            content_type,
            mut store_headers,
            user_metadata,
            storage_class,
            owner,
        } = request;

        validate_object_key(&dst_key)?;
        verify_encryption(self.kms.as_ref(), &encryption_headers)?;
        self.index.ensure_bucket(&dst_bucket)?;

        let ObjectBody {
            metadata: source,
            body,
        } = self.get(&src_bucket, &src_key).await?;

        let unchanged = metadata_directive == MetadataDirective::Copy
            && encryption_headers == source.encryption_headers
            && storage_class.is_none_or(|class| class == source.storage_class);
        if src_bucket == dst_bucket && src_key == dst_key && unchanged {
            return Err(S3MockError::invalid_request(
                "This copy request is illegal because it is trying to copy an object to itself \
                 without changing the object's metadata, storage class, website redirect \
                 location or encryption attributes.",
            ));
        }

        let (content_type, store_headers, user_metadata) = match metadata_directive {
            MetadataDirective::Copy => (
                source.content_type.clone(),
                source.store_headers.clone(),
                source.user_metadata.clone(),
            ),
            MetadataDirective::Replace => {
                validate_metadata(&user_metadata)?;
                sanitize_store_headers(&mut store_headers);
                (content_type, store_headers, user_metadata)
            }
        };

        let id = self.index.allocate_id(&dst_bucket, &dst_key)?;
        let data_path = object_data_path(&dst_bucket, id);
        let algorithms: Vec<ChecksumAlgorithm> =
            source.checksum.iter().map(|c| c.algorithm).collect();
        let ingested = match ingest(self.repo.as_ref(), &data_path, body, None, &algorithms).await {
            Ok(ingested) => ingested,
            Err(e) => {
                self.discard(&dst_bucket, id).await;
                return Err(e);
            }
        };

        let keep_etag = !source.is_encrypted() && encryption_headers.is_empty();
        let (etag, parts_count) = if keep_etag {
            (source.etag.clone(), source.parts_count)
        } else {
            (object_etag(&ingested.hashes.md5_hex, &encryption_headers), None)
        };
        let checksum = source
            .checksum
            .as_ref()
            .and_then(|c| ingested.hashes.checksum(c.algorithm).cloned());

        let metadata = ObjectMetadata {
            id,
            key: dst_key,
            data_path: self.repo.locate(&data_path),
            size: ingested.size,
            etag,
            content_type,
            last_modified: Utc::now(),
            store_headers,
            user_metadata,
            encryption_headers,
            tags: source.tags.clone(),
            retention: None,
            legal_hold: None,
            owner,
            storage_class: storage_class.unwrap_or(source.storage_class),
            checksum,
            acl: None,
            parts_count,
        };
        if let Err(e) = self.commit(&dst_bucket, &metadata).await {
            self.discard(&dst_bucket, id).await;
            return Err(e);
        }
        debug!(
            src_bucket = %src_bucket,
            src_key = %src_key,
            dst_bucket = %dst_bucket,
            dst_key = %metadata.key,
            "object copied"
        );
        Ok(metadata)
    }

    /// Delete an object. Deleting an absent key succeeds. Returns whether
    /// an object was removed.
    pub async fn delete(&self, bucket: &str, key: &str) -> S3MockResult<bool> {
        let Some(id) = self.index.remove(bucket, key).await? else {
            debug!(bucket, key, "delete of absent key");
            return Ok(false);
        };
        self.repo.delete(&object_dir(bucket, id)).await?;
        debug!(bucket, key, %id, "object deleted");
        Ok(true)
    }

    /// Delete several keys, reporting one outcome per key in request order.
    pub async fn delete_objects(&self, bucket: &str, keys: &[String]) -> S3MockResult<Vec<DeleteOutcome>> {
        self.index.ensure_bucket(bucket)?;
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let error = self.delete(bucket, key).await.err();
            outcomes.push(DeleteOutcome {
                key: key.clone(),
                error,
            });
        }
        Ok(outcomes)
    }

    // -----------------------------------------------------------------------
    // Sidecars
    // -----------------------------------------------------------------------

    /// Replace an object's tag set.
    pub async fn set_tags(&self, bucket: &str, key: &str, tags: Vec<Tag>) -> S3MockResult<()> {
        validate_tags(&tags)?;
        self.update(bucket, key, |m| m.tags = tags).await
    }

    /// An object's tag set.
    pub async fn get_tags(&self, bucket: &str, key: &str) -> S3MockResult<Vec<Tag>> {
        Ok(self.get_metadata(bucket, key).await?.tags)
    }

    /// Replace an object's retention.
    pub async fn set_retention(
        &self,
        bucket: &str,
        key: &str,
        retention: Retention,
    ) -> S3MockResult<()> {
        self.update(bucket, key, |m| m.retention = Some(retention))
            .await
    }

    /// An object's retention, if set.
    pub async fn get_retention(&self, bucket: &str, key: &str) -> S3MockResult<Option<Retention>> {
        Ok(self.get_metadata(bucket, key).await?.retention)
    }

    /// Replace an object's legal hold.
    pub async fn set_legal_hold(
        &self,
        bucket: &str,
        key: &str,
        legal_hold: LegalHold,
    ) -> S3MockResult<()> {
        self.update(bucket, key, |m| m.legal_hold = Some(legal_hold))
            .await
    }

    /// An object's legal hold, if set.
    pub async fn get_legal_hold(&self, bucket: &str, key: &str) -> S3MockResult<Option<LegalHold>> {
        Ok(self.get_metadata(bucket, key).await?.legal_hold)
    }

    /// Replace an object's access control policy.
    pub async fn set_acl(
        &self,
        bucket: &str,
        key: &str,
        acl: AccessControlPolicy,
    ) -> S3MockResult<()> {
        self.update(bucket, key, |m| m.acl = Some(acl)).await
    }

    /// An object's access control policy; owner FULL_CONTROL unless set.
    pub async fn get_acl(&self, bucket: &str, key: &str) -> S3MockResult<AccessControlPolicy> {
        Ok(self.get_metadata(bucket, key).await?.effective_acl())
    }

    // -----------------------------------------------------------------------
    // Persistence primitives shared with the multipart store
    // -----------------------------------------------------------------------

    /// Metadata stored under `id`, if any.
    pub(crate) async fn metadata_by_id(
        &self,
        bucket: &str,
        id: Uuid,
    ) -> S3MockResult<Option<ObjectMetadata>> {
        get_json(self.repo.as_ref(), &object_metadata_path(bucket, id)).await
    }

    /// Persist `metadata` next to its already written data, point the key
    /// at it and drop the object it replaces. On failure the caller owns
    /// the cleanup of the unpublished files.
    pub(crate) async fn commit(&self, bucket: &str, metadata: &ObjectMetadata) -> S3MockResult<()> {
        put_json(
            self.repo.as_ref(),
            &object_metadata_path(bucket, metadata.id),
            metadata,
        )
        .await?;
        match self.index.assign(bucket, &metadata.key, metadata.id).await? {
            Some(previous) if previous != metadata.id => {
                self.repo.delete(&object_dir(bucket, previous)).await
            }
            _ => Ok(()),
        }
    }

    async fn update(
        &self,
        bucket: &str,
        key: &str,
        mutate: impl FnOnce(&mut ObjectMetadata),
    ) -> S3MockResult<()> {
        // an overwrite swaps the id under this lock, so the id resolved here
        // stays current until the sidecar is written
        let _guard = self.index.lock_bucket(bucket).await?;
        let mut metadata = self.get_metadata(bucket, key).await?;
        mutate(&mut metadata);
        put_json(
            self.repo.as_ref(),
            &object_metadata_path(bucket, metadata.id),
            &metadata,
        )
        .await
    }

    /// Best-effort removal of a write that never became visible.
    async fn discard(&self, bucket: &str, id: Uuid) {
        if let Err(e) = self.repo.delete(&object_dir(bucket, id)).await {
            warn!(bucket, %id, error = %e, "failed to clean up discarded object");
        }
    }
}

fn no_such_key(key: &str) -> S3MockError {
    S3MockError::NoSuchKey {
        key: key.to_owned(),
    }
}
