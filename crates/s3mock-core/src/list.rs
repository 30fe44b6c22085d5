//! Key listing: prefix filtering, delimiter collapsing and pagination.
//!
//! The enumeration itself is the pure [`paginate`] function over a sorted
//! `(key, id)` snapshot taken from the [`KeyIndex`]. Keys and common
//! prefixes form one interleaved, byte-wise ordered sequence, and both count
//! toward `max_keys`.
//!
//! [`ListingEngine`] wraps it into the V1 (`marker`) and V2
//! (`continuation-token` / `start-after`) request shapes, loads the
//! metadata of the listed keys and applies `encoding-type=url`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::{S3MockError, S3MockResult};
use crate::index::KeyIndex;
use crate::state::{Owner, StorageClass};
use crate::store::ObjectStore;
use crate::utils::{decode_continuation_token, encode_continuation_token, url_encode_key};

/// Page size used when `max_keys` is absent or negative.
pub const DEFAULT_MAX_KEYS: usize = 1000;

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

/// One page of raw enumeration output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Listed keys with their object ids, in order.
    pub keys: Vec<(String, Uuid)>,
    /// Common prefixes, in order.
    pub common_prefixes: Vec<String>,
    /// Whether entries remain after this page.
    pub is_truncated: bool,
    /// Last key or prefix returned, when truncated.
    pub next_marker: Option<String>,
}

/// Enumerate one page of `entries`, which must be sorted by key and already
/// restricted to keys starting with `prefix`.
///
/// With a non-empty `delimiter`, a key whose remainder after `prefix`
/// contains the delimiter is folded into the common prefix ending at the
/// first delimiter. Keys and common prefixes at or before `marker` are
/// skipped, whether or not `marker` exists as a key.
///
/// # Examples
///
/// ```
/// use s3mock_core::list::paginate;
/// use uuid::Uuid;
///
/// let keys = ["a", "b", "b/1", "b/1/1", "b/1/2", "b/2", "c/1", "c/1/1"]
///     .map(|k| (k.to_owned(), Uuid::nil()));
/// let page = paginate(keys, "", "/", "", 1000);
/// let listed: Vec<&str> = page.keys.iter().map(|(k, _)| k.as_str()).collect();
/// assert_eq!(listed, ["a", "b"]);
/// assert_eq!(page.common_prefixes, ["b/", "c/"]);
/// ```
pub fn paginate(
    entries: impl IntoIterator<Item = (String, Uuid)>,
    prefix: &str,
    delimiter: &str,
    marker: &str,
    max_keys: usize,
) -> Page {
    let mut page = Page::default();
    let mut count = 0usize;
    let mut last_entry: Option<String> = None;

    for (key, id) in entries {
        if !marker.is_empty() && key.as_str() <= marker {
            continue;
        }

        let common_prefix = if delimiter.is_empty() {
            None
        } else {
            key.get(prefix.len()..)
                .and_then(|rest| rest.find(delimiter))
                .map(|pos| key[..prefix.len() + pos + delimiter.len()].to_owned())
        };

        if let Some(common_prefix) = common_prefix {
            if (!marker.is_empty() && common_prefix.as_str() <= marker)
                || last_entry.as_deref() == Some(common_prefix.as_str())
            {
                continue;
            }
            if count == max_keys {
                page.is_truncated = true;
                break;
            }
            page.common_prefixes.push(common_prefix.clone());
            last_entry = Some(common_prefix);
        } else {
            if count == max_keys {
                page.is_truncated = true;
                break;
            }
            page.keys.push((key.clone(), id));
            last_entry = Some(key);
        }
        count += 1;
    }

    if page.is_truncated {
        page.next_marker = last_entry;
    }
    page
}

/// Effective page size: absent or negative means the default.
#[must_use]
pub fn effective_max_keys(max_keys: Option<i32>) -> usize {
    max_keys
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(DEFAULT_MAX_KEYS)
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// Input of [`ListingEngine::list_v1`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct ListObjectsRequest {
    /// Bucket to list.
    #[builder(setter(into))]
    pub bucket: String,
    /// Only keys starting with this prefix.
    #[builder(default, setter(strip_option, into))]
    pub prefix: Option<String>,
    /// Only keys after this one.
    #[builder(default, setter(strip_option, into))]
    pub marker: Option<String>,
    /// Grouping delimiter.
    #[builder(default, setter(strip_option, into))]
    pub delimiter: Option<String>,
    /// Page size; negative means the default.
    #[builder(default, setter(strip_option))]
    pub max_keys: Option<i32>,
    /// `url` to percent-encode returned keys.
    #[builder(default, setter(strip_option, into))]
    pub encoding_type: Option<String>,
}

/// Input of [`ListingEngine::list_v2`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct ListObjectsV2Request {
    /// Bucket to list.
    #[builder(setter(into))]
    pub bucket: String,
    /// Only keys starting with this prefix.
    #[builder(default, setter(strip_option, into))]
    pub prefix: Option<String>,
    /// Only keys after this one; ignored when a continuation token is given.
    #[builder(default, setter(strip_option, into))]
    pub start_after: Option<String>,
    /// Token from a previous truncated page.
    #[builder(default, setter(strip_option, into))]
    pub continuation_token: Option<String>,
    /// Grouping delimiter.
    #[builder(default, setter(strip_option, into))]
    pub delimiter: Option<String>,
    /// Page size; negative means the default.
    #[builder(default, setter(strip_option))]
    pub max_keys: Option<i32>,
    /// `url` to percent-encode returned keys.
    #[builder(default, setter(strip_option, into))]
    pub encoding_type: Option<String>,
    /// Include object owners.
    #[builder(default)]
    pub fetch_owner: bool,
}

/// A listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    /// Key, percent-encoded when requested.
    pub key: String,
    /// ETag.
    pub etag: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Storage class.
    pub storage_class: StorageClass,
    /// Owner, when included.
    pub owner: Option<Owner>,
}

/// Result of [`ListingEngine::list_v1`].
#[derive(Debug, Clone)]
pub struct ListObjectsResult {
    /// Bucket name.
    pub name: String,
    /// Echoed prefix.
    pub prefix: Option<String>,
    /// Echoed marker.
    pub marker: Option<String>,
    /// Echoed delimiter.
    pub delimiter: Option<String>,
    /// Effective page size.
    pub max_keys: usize,
    /// Echoed encoding type.
    pub encoding_type: Option<String>,
    /// Whether entries remain.
    pub is_truncated: bool,
    /// Marker for the next page, when truncated.
    pub next_marker: Option<String>,
    /// Listed objects.
    pub contents: Vec<ListedObject>,
    /// Common prefixes.
    pub common_prefixes: Vec<String>,
}

/// Result of [`ListingEngine::list_v2`].
#[derive(Debug, Clone)]
pub struct ListObjectsV2Result {
    /// Bucket name.
    pub name: String,
    /// Echoed prefix.
    pub prefix: Option<String>,
    /// Echoed start-after.
    pub start_after: Option<String>,
    /// Echoed continuation token.
    pub continuation_token: Option<String>,
    /// Echoed delimiter.
    pub delimiter: Option<String>,
    /// Effective page size.
    pub max_keys: usize,
    /// Echoed encoding type.
    pub encoding_type: Option<String>,
    /// Number of keys plus common prefixes returned.
    pub key_count: usize,
    /// Whether entries remain.
    pub is_truncated: bool,
    /// Token for the next page, when truncated.
    pub next_continuation_token: Option<String>,
    /// Listed objects.
    pub contents: Vec<ListedObject>,
    /// Common prefixes.
    pub common_prefixes: Vec<String>,
}

// ---------------------------------------------------------------------------
// ListingEngine
// ---------------------------------------------------------------------------

/// Lists the keys of a bucket.
#[derive(Debug)]
pub struct ListingEngine {
    index: Arc<KeyIndex>,
    objects: Arc<ObjectStore>,
}

impl ListingEngine {
    /// Create an engine over the index and the object store.
    #[must_use]
    pub fn new(index: Arc<KeyIndex>, objects: Arc<ObjectStore>) -> Self {
        Self { index, objects }
    }

    /// List keys using the V1 `marker` protocol.
    pub async fn list_v1(&self, request: ListObjectsRequest) -> S3MockResult<ListObjectsResult> {
        let encode = url_encoding(request.encoding_type.as_deref())?;
        let max_keys = effective_max_keys(request.max_keys);
        let page = self.page(
            &request.bucket,
            request.prefix.as_deref(),
            request.delimiter.as_deref(),
            request.marker.as_deref(),
            max_keys,
        )?;
        let contents = self.load(&request.bucket, &page.keys, true, encode).await?;

        debug!(
            bucket = %request.bucket,
            keys = contents.len(),
            prefixes = page.common_prefixes.len(),
            truncated = page.is_truncated,
            "list objects"
        );
        Ok(ListObjectsResult {
            name: request.bucket,
            prefix: request.prefix.map(|p| encode_if(encode, p)),
            marker: request.marker.map(|m| encode_if(encode, m)),
            delimiter: request.delimiter.map(|d| encode_if(encode, d)),
            max_keys,
            encoding_type: request.encoding_type,
            is_truncated: page.is_truncated,
            next_marker: page.next_marker.map(|m| encode_if(encode, m)),
            contents,
            common_prefixes: encode_all(encode, page.common_prefixes),
        })
    }

    /// List keys using the V2 continuation-token protocol.
    pub async fn list_v2(&self, request: ListObjectsV2Request) -> S3MockResult<ListObjectsV2Result> {
        let encode = url_encoding(request.encoding_type.as_deref())?;
        let max_keys = effective_max_keys(request.max_keys);
        let marker = match request.continuation_token.as_deref() {
            Some(token) => Some(decode_continuation_token(token)?),
            None => request.start_after.clone(),
        };
        let page = self.page(
            &request.bucket,
            request.prefix.as_deref(),
            request.delimiter.as_deref(),
            marker.as_deref(),
            max_keys,
        )?;
        let contents = self
            .load(&request.bucket, &page.keys, request.fetch_owner, encode)
            .await?;
        let key_count = contents.len() + page.common_prefixes.len();

        debug!(
            bucket = %request.bucket,
            key_count,
            truncated = page.is_truncated,
            "list objects v2"
        );
        Ok(ListObjectsV2Result {
            name: request.bucket,
            prefix: request.prefix.map(|p| encode_if(encode, p)),
            start_after: request.start_after.map(|s| encode_if(encode, s)),
            continuation_token: request.continuation_token,
            delimiter: request.delimiter.map(|d| encode_if(encode, d)),
            max_keys,
            encoding_type: request.encoding_type,
            key_count,
            is_truncated: page.is_truncated,
            next_continuation_token: page
                .next_marker
                .as_deref()
                .map(encode_continuation_token),
            contents,
            common_prefixes: encode_all(encode, page.common_prefixes),
        })
    }

    fn page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        delimiter: Option<&str>,
        marker: Option<&str>,
        max_keys: usize,
    ) -> S3MockResult<Page> {
        let prefix = prefix.unwrap_or_default();
        let entries = self.index.keys_with_prefix(bucket, prefix)?;
        Ok(paginate(
            entries,
            prefix,
            delimiter.unwrap_or_default(),
            marker.unwrap_or_default(),
            max_keys,
        ))
    }

    async fn load(
        &self,
        bucket: &str,
        keys: &[(String, Uuid)],
        with_owner: bool,
        encode: bool,
    ) -> S3MockResult<Vec<ListedObject>> {
        let mut contents = Vec::with_capacity(keys.len());
        for (key, id) in keys {
            // the key may have been replaced or deleted since the snapshot
            let Some(metadata) = self.objects.metadata_by_id(bucket, *id).await? else {
                debug!(bucket, key = %key, "skipping key that vanished during listing");
                continue;
            };
            contents.push(ListedObject {
                key: encode_if(encode, metadata.key),
                etag: metadata.etag,
                size: metadata.size,
                last_modified: metadata.last_modified,
                storage_class: metadata.storage_class,
                owner: with_owner.then_some(metadata.owner),
            });
        }
        Ok(contents)
    }
}

fn url_encoding(encoding_type: Option<&str>) -> S3MockResult<bool> {
    match encoding_type {
        None => Ok(false),
        Some(value) if value.eq_ignore_ascii_case("url") => Ok(true),
        Some(value) => Err(S3MockError::invalid_request(format!(
            "Invalid Encoding Method specified in Request: {value}"
        ))),
    }
}

fn encode_if(encode: bool, value: String) -> String {
    if encode { url_encode_key(&value) } else { value }
}

fn encode_all(encode: bool, values: Vec<String>) -> Vec<String> {
    if encode {
        values.iter().map(|v| url_encode_key(v)).collect()
    } else {
        values
    }
}
