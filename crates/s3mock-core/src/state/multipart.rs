//! Multipart upload session state.
//!
//! A [`MultipartUpload`] captures what was provided when the upload was
//! prepared; it is persisted as `uploadMetadata.json` in the staging area.
//! Each [`UploadPart`] is persisted next to its data file, so parts of the
//! same upload never contend on a shared file.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::object::{Owner, StorageClass, Tag};
use crate::checksums::{ChecksumAlgorithm, ChecksumValue};

/// An in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartUpload {
    /// Unique identifier for this upload.
    pub upload_id: String,
    /// Bucket the object will be created in.
    pub bucket: String,
    /// The object key that this upload will create.
    pub key: String,
    /// Id the assembled object will be stored under.
    pub staging_id: Uuid,
    /// When the upload was initiated.
    pub initiated: DateTime<Utc>,
    /// The owner who initiated the upload.
    pub owner: Owner,
    /// MIME type of the final object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Stored HTTP headers for the final object.
    #[serde(default)]
    pub store_headers: BTreeMap<String, String>,
    /// User metadata for the final object.
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
    /// Encryption headers given at preparation time.
    #[serde(default)]
    pub encryption_headers: HashMap<String, String>,
    /// Tags for the final object.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Storage class for the final object.
    #[serde(default)]
    pub storage_class: StorageClass,
    /// Checksum algorithm requested for the parts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
}

/// A single uploaded part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPart {
    /// The part number (1-based, up to 10 000).
    pub part_number: u32,
    /// Quoted hex MD5 of the raw part bytes.
    pub etag: String,
    /// Size of this part in bytes.
    pub size: u64,
    /// When this part was last uploaded.
    pub last_modified: DateTime<Utc>,
    /// Where the part bytes live.
    pub data_path: PathBuf,
    /// Additional checksum, when one was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumValue>,
}

/// An upload together with the parts uploaded so far.
#[derive(Debug, Clone)]
pub struct MultipartSession {
    /// Upload description.
    pub upload: MultipartUpload,
    /// Parts keyed by part number, so iteration is in numeric order.
    pub parts: BTreeMap<u32, UploadPart>,
}

impl MultipartSession {
    /// Start a session with no parts.
    #[must_use]
    pub fn new(upload: MultipartUpload) -> Self {
        Self {
            upload,
            parts: BTreeMap::new(),
        }
    }

    /// Insert or replace a part.
    pub fn put_part(&mut self, part: UploadPart) {
        self.parts.insert(part.part_number, part);
    }

    /// Get a part by its number.
    #[must_use]
    pub fn get_part(&self, part_number: u32) -> Option<&UploadPart> {
        self.parts.get(&part_number)
    }
}
