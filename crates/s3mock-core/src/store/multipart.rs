//! Multipart uploads: prepare, upload and copy parts, list, complete and
//! abort.
//!
//! An upload is staged under `<bucket>/<stagingId>/<uploadId>/`, where the
//! staging id is allocated like any object id and is guaranteed to differ
//! from the id the key maps to when the upload starts. Parts are independent
//! files, so uploads of different parts never contend with each other.
//! Completion writes the concatenated object as `<bucket>/<stagingId>/binaryData`,
//! publishes it through [`ObjectStore`]'s commit and drops the staging area.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::object::ObjectStore;
use super::{
    ConcatReader, OBJECT_DATA_FILE, OBJECT_METADATA_FILE, UPLOAD_METADATA_FILE, ingest,
    object_data_path, object_metadata_path, sanitize_store_headers, verify_checksum,
    verify_content_md5,
};
use crate::checksums::{
    ChecksumAlgorithm, HashingReader, compute_multipart_etag, normalize_etag, quote_etag,
};
use crate::codec::ChunkedMode;
use crate::error::{S3MockError, S3MockResult};
use crate::index::{BUCKET_INDEX_FILE, KeyIndex};
use crate::kms::{KmsKeyValidator, verify_encryption};
use crate::repository::{BlobRepository, ByteStream, get_json, join_path, put_json};
use crate::state::{
    MultipartSession, MultipartUpload, ObjectMetadata, Owner, StorageClass, Tag, UploadPart,
};
use crate::utils::{ByteRange, generate_upload_id};
use crate::validation::{
    validate_metadata, validate_object_key, validate_part_number, validate_tags,
    validate_upload_id,
};

/// Default page size of [`MultipartStore::list_parts`].
const DEFAULT_MAX_PARTS: usize = 1000;

/// Suffix of a part's data file.
const PART_SUFFIX: &str = ".part";

/// Suffix of a part's metadata file.
const PART_METADATA_SUFFIX: &str = ".part.json";

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// Input of [`MultipartStore::prepare`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct PrepareUploadRequest {
    /// Target bucket.
    #[builder(setter(into))]
    pub bucket: String,
    /// Target key.
    #[builder(setter(into))]
    pub key: String,
    /// Upload id to use; a random one is generated when `None`.
    #[builder(default, setter(strip_option, into))]
    pub upload_id: Option<String>,
    /// `Content-Type` of the final object.
    #[builder(default, setter(strip_option, into))]
    pub content_type: Option<String>,
    /// Headers stored with the final object.
    #[builder(default)]
    pub store_headers: BTreeMap<String, String>,
    /// User metadata of the final object.
    #[builder(default)]
    pub user_metadata: HashMap<String, String>,
    /// Encryption headers of the final object.
    #[builder(default)]
    pub encryption_headers: HashMap<String, String>,
    /// Tags of the final object.
    #[builder(default)]
    pub tags: Vec<Tag>,
    /// Owner of the upload and the final object.
    #[builder(default)]
    pub owner: Owner,
    /// Storage class of the final object.
    #[builder(default)]
    pub storage_class: StorageClass,
    /// Checksum algorithm computed for parts and the final object.
    #[builder(default)]
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
}

/// Input of [`MultipartStore::put_part`].
#[derive(TypedBuilder)]
pub struct PutPartRequest {
    /// Bucket of the upload.
    #[builder(setter(into))]
    pub bucket: String,
    /// Upload id.
    #[builder(setter(into))]
    pub upload_id: String,
    /// Part number as sent by the client.
    pub part_number: i32,
    /// Raw request body.
    pub body: ByteStream,
    /// Chunked framing of `body`, if any.
    #[builder(default)]
    pub chunked: Option<ChunkedMode>,
    /// Encryption headers sent with the part.
    #[builder(default)]
    pub encryption_headers: HashMap<String, String>,
    /// Checksum value supplied for the upload's checksum algorithm.
    #[builder(default, setter(strip_option, into))]
    pub checksum_value: Option<String>,
    /// Base64 `Content-MD5` supplied by the client.
    #[builder(default, setter(strip_option, into))]
    pub content_md5: Option<String>,
}

impl fmt::Debug for PutPartRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PutPartRequest")
            .field("bucket", &self.bucket)
            .field("upload_id", &self.upload_id)
            .field("part_number", &self.part_number)
            .field("chunked", &self.chunked)
            .finish_non_exhaustive()
    }
}

/// Input of [`MultipartStore::copy_part`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct CopyPartRequest {
    /// Source bucket.
    #[builder(setter(into))]
    pub src_bucket: String,
    /// Source key.
    #[builder(setter(into))]
    pub src_key: String,
    /// Byte range of the source; the whole object when `None`.
    #[builder(default, setter(strip_option))]
    pub range: Option<ByteRange>,
    /// Bucket of the upload.
    #[builder(setter(into))]
    pub bucket: String,
    /// Upload id.
    #[builder(setter(into))]
    pub upload_id: String,
    /// Part number as sent by the client.
    pub part_number: i32,
    /// Encryption headers sent with the part.
    #[builder(default)]
    pub encryption_headers: HashMap<String, String>,
}

/// A part selected for completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// Part number as sent by the client.
    pub part_number: i32,
    /// ETag the client recorded for the part; checked when present.
    pub etag: Option<String>,
}

impl CompletedPart {
    /// Select part `part_number` with the given ETag.
    pub fn new(part_number: i32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: Some(etag.into()),
        }
    }
}

/// One page of [`MultipartStore::list_parts`].
#[derive(Debug, Clone)]
pub struct ListPartsResult {
    /// The upload the parts belong to.
    pub upload: MultipartUpload,
    /// Parts in ascending numeric order.
    pub parts: Vec<UploadPart>,
    /// Whether more parts follow.
    pub is_truncated: bool,
    /// Marker to pass for the next page.
    pub next_part_number_marker: Option<u32>,
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

fn upload_dir(bucket: &str, staging_id: Uuid, upload_id: &str) -> String {
    join_path(&[bucket, &staging_id.to_string(), upload_id])
}

fn part_data_path(upload: &MultipartUpload, part_number: u32) -> String {
    join_path(&[
        &upload_dir(&upload.bucket, upload.staging_id, &upload.upload_id),
        &format!("{part_number}{PART_SUFFIX}"),
    ])
}

fn part_metadata_path(upload: &MultipartUpload, part_number: u32) -> String {
    join_path(&[
        &upload_dir(&upload.bucket, upload.staging_id, &upload.upload_id),
        &format!("{part_number}{PART_METADATA_SUFFIX}"),
    ])
}

// ---------------------------------------------------------------------------
// MultipartStore
// ---------------------------------------------------------------------------

/// Manages in-flight multipart upload sessions.
#[derive(Debug)]
pub struct MultipartStore {
    repo: Arc<dyn BlobRepository>,
    index: Arc<KeyIndex>,
    objects: Arc<ObjectStore>,
    kms: Arc<dyn KmsKeyValidator>,
    sessions: DashMap<String, MultipartSession>,
    min_part_size: u64,
}

impl MultipartStore {
    /// Create a store. Non-final parts smaller than `min_part_size` are
    /// rejected on completion.
    #[must_use]
    pub fn new(
        repo: Arc<dyn BlobRepository>,
        index: Arc<KeyIndex>,
        objects: Arc<ObjectStore>,
        kms: Arc<dyn KmsKeyValidator>,
        min_part_size: u64,
    ) -> Self {
        Self {
            repo,
            index,
            objects,
            kms,
            sessions: DashMap::new(),
            min_part_size,
        }
    }

    /// Rebuild sessions from the staging areas of every indexed bucket.
    /// Returns the number of sessions loaded.
    pub async fn reload(&self) -> S3MockResult<usize> {
        let mut loaded = 0;
        for bucket in self.index.list_buckets() {
            for staging in self.repo.list(&bucket.name).await? {
                if staging == BUCKET_INDEX_FILE {
                    continue;
                }
                let staging_dir = join_path(&[&bucket.name, &staging]);
                for entry in self.repo.list(&staging_dir).await? {
                    if entry == OBJECT_DATA_FILE || entry == OBJECT_METADATA_FILE {
                        continue;
                    }
                    let dir = join_path(&[&staging_dir, &entry]);
                    let metadata_path = join_path(&[&dir, UPLOAD_METADATA_FILE]);
                    let upload: MultipartUpload =
                        match get_json(self.repo.as_ref(), &metadata_path).await {
                            Ok(Some(upload)) => upload,
                            Ok(None) => continue,
                            Err(e) => {
                                warn!(dir = %dir, error = %e, "skipping unreadable upload");
                                continue;
                            }
                        };
                    let mut session = MultipartSession::new(upload);
                    for name in self.repo.list(&dir).await? {
                        if !name.ends_with(PART_METADATA_SUFFIX) {
                            continue;
                        }
                        let part_path = join_path(&[&dir, &name]);
                        match get_json::<UploadPart>(self.repo.as_ref(), &part_path).await {
                            Ok(Some(part)) => session.put_part(part),
                            Ok(None) => {}
                            Err(e) => {
                                warn!(path = %part_path, error = %e, "skipping unreadable part");
                            }
                        }
                    }
                    debug!(
                        upload_id = %session.upload.upload_id,
                        parts = session.parts.len(),
                        "reloaded multipart upload"
                    );
                    self.sessions
                        .insert(session.upload.upload_id.clone(), session);
                    loaded += 1;
                }
            }
        }
        Ok(loaded)
    }

    /// Start an upload.
    pub async fn prepare(&self, request: PrepareUploadRequest) -> S3MockResult<MultipartUpload> {
        let PrepareUploadRequest {
            bucket,
            key,
            upload_id,
            content_type,
            mut store_headers,
            user_metadata,
            encryption_headers,
            tags,
            owner,
            storage_class,
            checksum_algorithm,
        } = request;

        validate_object_key(&key)?;
        validate_metadata(&user_metadata)?;
        validate_tags(&tags)?;
        verify_encryption(self.kms.as_ref(), &encryption_headers)?;
        if let Some(upload_id) = &upload_id {
            validate_upload_id(upload_id)?;
        }
        sanitize_store_headers(&mut store_headers);

        // registering under the bucket lock keeps a concurrent bucket
        // deletion from missing this upload
        let _guard = self.index.lock_bucket(&bucket).await?;

        let upload_id = upload_id.unwrap_or_else(generate_upload_id);
        if self.sessions.contains_key(&upload_id) {
            return Err(S3MockError::invalid_argument(format!(
                "Upload {upload_id} already exists"
            )));
        }

        let upload = MultipartUpload {
            upload_id,
            staging_id: self.index.allocate_id(&bucket, &key)?,
            bucket,
            key,
            initiated: Utc::now(),
            owner,
            content_type,
            store_headers,
            user_metadata,
            encryption_headers,
            tags,
            storage_class,
            checksum_algorithm,
        };
        put_json(
            self.repo.as_ref(),
            &join_path(&[
                &upload_dir(&upload.bucket, upload.staging_id, &upload.upload_id),
                UPLOAD_METADATA_FILE,
            ]),
            &upload,
        )
        .await?;

        self.sessions
            .insert(upload.upload_id.clone(), MultipartSession::new(upload.clone()));
        info!(
            bucket = %upload.bucket,
            key = %upload.key,
            upload_id = %upload.upload_id,
            staging_id = %upload.staging_id,
            "multipart upload prepared"
        );
        Ok(upload)
    }

    /// Store a part. Re-uploading a part number replaces the earlier part.
    pub async fn put_part(&self, request: PutPartRequest) -> S3MockResult<UploadPart> {
        let part_number = validate_part_number(request.part_number)?;
        verify_encryption(self.kms.as_ref(), &request.encryption_headers)?;
        let upload = self.upload(&request.bucket, &request.upload_id)?;

        self.store_part(
            &upload,
            part_number,
            request.body,
            request.chunked,
            request.content_md5.as_deref(),
            request.checksum_value.as_deref(),
        )
        .await
    }

    /// Store a part sourced from (a range of) an existing object.
    pub async fn copy_part(&self, request: CopyPartRequest) -> S3MockResult<UploadPart> {
        let part_number = validate_part_number(request.part_number)?;
        verify_encryption(self.kms.as_ref(), &request.encryption_headers)?;
        let upload = self
            .sessions
            .get(&request.upload_id)
            .filter(|s| s.upload.bucket == request.bucket)
            .map(|s| s.upload.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Multipart upload {} in bucket {} was not prepared",
                    request.upload_id,
                    request.bucket
                )
            })?;

        let body = match request.range {
            Some(range) => {
                self.objects
                    .get_range(&request.src_bucket, &request.src_key, range)
                    .await?
                    .body
            }
            None => {
                self.objects
                    .get(&request.src_bucket, &request.src_key)
                    .await?
                    .body
            }
        };
        self.store_part(&upload, part_number, body, None, None, None)
            .await
    }

    /// Parts of an upload in ascending numeric order, starting after
    /// `part_number_marker` and returning at most `max_parts`.
    pub fn list_parts(
        &self,
        bucket: &str,
        upload_id: &str,
        part_number_marker: Option<u32>,
        max_parts: Option<usize>,
    ) -> S3MockResult<ListPartsResult> {
        let session = self
            .sessions
            .get(upload_id)
            .filter(|s| s.upload.bucket == bucket)
            .ok_or_else(|| no_such_upload(upload_id))?;

        let max_parts = max_parts.unwrap_or(DEFAULT_MAX_PARTS);
        let marker = part_number_marker.unwrap_or(0);
        let mut remaining = session.parts.range(marker.saturating_add(1)..).map(|(_, p)| p);
        let parts: Vec<UploadPart> = remaining.by_ref().take(max_parts).cloned().collect();
        let is_truncated = remaining.next().is_some();

        Ok(ListPartsResult {
            upload: session.upload.clone(),
            next_part_number_marker: if is_truncated {
                parts.last().map(|p| p.part_number)
            } else {
                None
            },
            parts,
            is_truncated,
        })
    }

    /// Assemble the selected parts, in the given order, into the final
    /// object and end the upload.
    pub async fn complete(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> S3MockResult<ObjectMetadata> {
        let (upload, selected) = {
            let session = self
                .sessions
                .get(upload_id)
                .filter(|s| s.upload.bucket == bucket && s.upload.key == key)
                .ok_or_else(|| no_such_upload(upload_id))?;
            (session.upload.clone(), self.select_parts(&session, parts)?)
        };

        let data_path = object_data_path(bucket, upload.staging_id);
        let sources = selected
            .iter()
            .map(|p| part_data_path(&upload, p.part_number))
            .collect();
        let algorithms: Vec<ChecksumAlgorithm> = upload.checksum_algorithm.into_iter().collect();
        let mut reader = HashingReader::new(
            ConcatReader::new(Arc::clone(&self.repo), sources),
            &algorithms,
        );
        let size = self.repo.put(&data_path, &mut reader).await?;
        let (_, hashes) = reader.finish();

        let etags: Vec<&str> = selected.iter().map(|p| p.etag.as_str()).collect();
        let metadata = ObjectMetadata {
            id: upload.staging_id,
            key: upload.key.clone(),
            data_path: self.repo.locate(&data_path),
            size,
            etag: compute_multipart_etag(&etags),
            content_type: upload.content_type.clone(),
            last_modified: Utc::now(),
            store_headers: upload.store_headers.clone(),
            user_metadata: upload.user_metadata.clone(),
            encryption_headers: upload.encryption_headers.clone(),
            tags: upload.tags.clone(),
            retention: None,
            legal_hold: None,
            owner: upload.owner.clone(),
            storage_class: upload.storage_class,
            checksum: upload
                .checksum_algorithm
                .and_then(|a| hashes.checksum(a).cloned()),
            acl: None,
            parts_count: u32::try_from(selected.len()).ok(),
        };

        if let Err(e) = self.objects.commit(bucket, &metadata).await {
            self.remove_quietly(&data_path).await;
            self.remove_quietly(&object_metadata_path(bucket, upload.staging_id))
                .await;
            return Err(e);
        }

        self.sessions.remove(upload_id);
        self.repo
            .delete(&upload_dir(bucket, upload.staging_id, upload_id))
            .await?;
        info!(
            bucket,
            key,
            upload_id,
            parts = selected.len(),
            size,
            etag = %metadata.etag,
            "multipart upload completed"
        );
        Ok(metadata)
    }

    /// Discard an upload and its staging area.
    pub async fn abort(&self, bucket: &str, upload_id: &str) -> S3MockResult<()> {
        let (_, session) = self
            .sessions
            .remove_if(upload_id, |_, s| s.upload.bucket == bucket)
            .ok_or_else(|| no_such_upload(upload_id))?;
        let upload = session.upload;

        // a staging id only becomes an object id when an upload completes
        if self.index.is_mapped(bucket, upload.staging_id) {
            self.repo
                .delete(&upload_dir(bucket, upload.staging_id, upload_id))
                .await?;
        } else {
            self.repo
                .delete(&join_path(&[bucket, &upload.staging_id.to_string()]))
                .await?;
        }
        info!(bucket, key = %upload.key, upload_id, "multipart upload aborted");
        Ok(())
    }

    /// Uploads that are neither completed nor aborted, sorted by key and
    /// initiation time, for one bucket or all of them.
    pub fn list_uploads(
        &self,
        bucket: Option<&str>,
        prefix: Option<&str>,
    ) -> S3MockResult<Vec<MultipartUpload>> {
        if let Some(bucket) = bucket {
            self.index.ensure_bucket(bucket)?;
        }
        let prefix = prefix.unwrap_or_default();
        let mut uploads: Vec<MultipartUpload> = self
            .sessions
            .iter()
            .filter(|s| bucket.is_none_or(|b| s.upload.bucket == b))
            .filter(|s| s.upload.key.starts_with(prefix))
            .map(|s| s.upload.clone())
            .collect();
        uploads.sort_by(|a, b| {
            a.bucket
                .cmp(&b.bucket)
                .then_with(|| a.key.cmp(&b.key))
                .then_with(|| a.initiated.cmp(&b.initiated))
        });
        Ok(uploads)
    }

    /// Whether `bucket` has uploads in flight.
    #[must_use]
    pub fn has_uploads(&self, bucket: &str) -> bool {
        self.sessions.iter().any(|s| s.upload.bucket == bucket)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn upload(&self, bucket: &str, upload_id: &str) -> S3MockResult<MultipartUpload> {
        self.sessions
            .get(upload_id)
            .filter(|s| s.upload.bucket == bucket)
            .map(|s| s.upload.clone())
            .ok_or_else(|| no_such_upload(upload_id))
    }

    fn select_parts(
        &self,
        session: &MultipartSession,
        parts: &[CompletedPart],
    ) -> S3MockResult<Vec<UploadPart>> {
        if parts.is_empty() {
            return Err(S3MockError::invalid_request(
                "You must specify at least one part",
            ));
        }

        let mut selected: Vec<UploadPart> = Vec::with_capacity(parts.len());
        for requested in parts {
            let part_number = validate_part_number(requested.part_number)?;
            if selected.last().is_some_and(|p| p.part_number >= part_number) {
                return Err(S3MockError::InvalidPartOrder);
            }
            let stored = session
                .get_part(part_number)
                .ok_or(S3MockError::InvalidPart { part_number })?;
            if requested
                .etag
                .as_deref()
                .is_some_and(|etag| normalize_etag(etag) != normalize_etag(&stored.etag))
            {
                return Err(S3MockError::InvalidPart { part_number });
            }
            selected.push(stored.clone());
        }

        if let Some((_, leading)) = selected.split_last() {
            if let Some(small) = leading.iter().find(|p| p.size < self.min_part_size) {
                return Err(S3MockError::EntityTooSmall {
                    part_number: small.part_number,
                });
            }
        }
        Ok(selected)
    }

    async fn store_part(
        &self,
        upload: &MultipartUpload,
        part_number: u32,
        body: ByteStream,
        chunked: Option<ChunkedMode>,
        content_md5: Option<&str>,
        checksum_value: Option<&str>,
    ) -> S3MockResult<UploadPart> {
        let data_path = part_data_path(upload, part_number);
        let metadata_path = part_metadata_path(upload, part_number);
        let algorithms: Vec<ChecksumAlgorithm> = upload.checksum_algorithm.into_iter().collect();

        let stored = async {
            let ingested = ingest(self.repo.as_ref(), &data_path, body, chunked, &algorithms).await?;
            verify_content_md5(content_md5, &ingested.hashes.md5_hex)?;
            let checksum = verify_checksum(
                self.repo.as_ref(),
                &data_path,
                &ingested,
                upload.checksum_algorithm,
                checksum_value,
            )
            .await?;
            let part = UploadPart {
                part_number,
                etag: quote_etag(&ingested.hashes.md5_hex),
                size: ingested.size,
                last_modified: Utc::now(),
                data_path: self.repo.locate(&data_path),
                checksum,
            };
            put_json(self.repo.as_ref(), &metadata_path, &part).await?;
            Ok::<_, S3MockError>(part)
        }
        .await;

        let recorded = match stored {
            Ok(part) => match self.sessions.get_mut(&upload.upload_id) {
                Some(mut session) => {
                    session.put_part(part.clone());
                    Ok(part)
                }
                None => Err(no_such_upload(&upload.upload_id)),
            },
            Err(e) => {
                // a failed re-upload must not leave the earlier part behind
                if let Some(mut session) = self.sessions.get_mut(&upload.upload_id) {
                    session.parts.remove(&part_number);
                }
                Err(e)
            }
        };

        if recorded.is_err() {
            self.remove_quietly(&data_path).await;
            self.remove_quietly(&metadata_path).await;
        } else {
            debug!(
                upload_id = %upload.upload_id,
                part_number,
                "multipart part stored"
            );
        }
        recorded
    }

    async fn remove_quietly(&self, path: &str) {
        if let Err(e) = self.repo.delete(path).await {
            warn!(path, error = %e, "failed to remove staging file");
        }
    }
}

fn no_such_upload(upload_id: &str) -> S3MockError {
    S3MockError::NoSuchUpload {
        upload_id: upload_id.to_owned(),
    }
}
