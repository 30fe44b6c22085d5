//! Object metadata and the value types hanging off it.
//!
//! [`ObjectMetadata`] is what the object store persists next to every blob as
//! `objectMetadata.json`. Callers only ever see copies of it; the store owns
//! the on-disk representation.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksums::ChecksumValue;
use crate::kms;

// ---------------------------------------------------------------------------
// Owner
// ---------------------------------------------------------------------------

/// The canonical user owning a bucket, object or upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Owner {
    /// The canonical user ID of the owner.
    pub id: String,
    /// The display name of the owner.
    pub display_name: String,
}

impl Default for Owner {
    fn default() -> Self {
        Self {
            id: "75aa57f09aa0c8caeab4f8c24e99d10f8e7faeebf76c078efc7c6caea54ba06a".to_owned(),
            display_name: "s3-mock-file-store".to_owned(),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.display_name, self.id)
    }
}

// ---------------------------------------------------------------------------
// Access control
// ---------------------------------------------------------------------------

/// A grantee in an ACL grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Grantee {
    /// A canonical user identified by an account ID.
    CanonicalUser {
        /// The canonical user ID.
        id: String,
        /// The display name for the user.
        display_name: String,
    },
    /// A predefined group, e.g. `http://acs.amazonaws.com/groups/global/AllUsers`.
    Group {
        /// The URI of the group.
        uri: String,
    },
    /// A grantee identified by email.
    Email {
        /// The email address of the grantee.
        email: String,
    },
}

/// A permission that can be granted to a grantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// READ, WRITE, READ_ACP and WRITE_ACP together.
    FullControl,
    /// Read the object data.
    Read,
    /// Overwrite the object.
    Write,
    /// Read the ACL.
    ReadAcp,
    /// Write the ACL.
    WriteAcp,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FullControl => "FULL_CONTROL",
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::ReadAcp => "READ_ACP",
            Self::WriteAcp => "WRITE_ACP",
        };
        f.write_str(s)
    }
}

/// An ACL grant pairing a grantee with a permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    /// The entity receiving the permission.
    pub grantee: Grantee,
    /// The permission granted.
    pub permission: Permission,
}

/// The full ACL of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlPolicy {
    /// Owner of the object.
    pub owner: Owner,
    /// Grants in the order they were given.
    pub grants: Vec<Grant>,
}

impl AccessControlPolicy {
    /// The policy every new object starts with: the owner has full control.
    #[must_use]
    pub fn private(owner: &Owner) -> Self {
        Self {
            owner: owner.clone(),
            grants: vec![Grant {
                grantee: Grantee::CanonicalUser {
                    id: owner.id.clone(),
                    display_name: owner.display_name.clone(),
                },
                permission: Permission::FullControl,
            }],
        }
    }
}

// ---------------------------------------------------------------------------
// Tags, retention, legal hold
// ---------------------------------------------------------------------------

/// One object tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Build a tag from anything string-like.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Object lock retention mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetentionMode {
    /// Users with special permissions may shorten or remove the retention.
    Governance,
    /// Nobody may shorten or remove the retention.
    Compliance,
}

/// Object lock retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retention {
    /// Retention mode.
    pub mode: RetentionMode,
    /// Instant until which the object is retained.
    pub retain_until_date: DateTime<Utc>,
}

/// Legal hold state of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegalHold {
    /// A legal hold is in effect.
    On,
    /// No legal hold.
    Off,
}

// ---------------------------------------------------------------------------
// StorageClass
// ---------------------------------------------------------------------------

/// Storage class recorded on an object. It has no effect on storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    /// `STANDARD` (default).
    #[default]
    Standard,
    /// `REDUCED_REDUNDANCY`.
    ReducedRedundancy,
    /// `STANDARD_IA`.
    StandardIa,
    /// `ONEZONE_IA`.
    OnezoneIa,
    /// `INTELLIGENT_TIERING`.
    IntelligentTiering,
    /// `GLACIER`.
    Glacier,
    /// `GLACIER_IR`.
    GlacierIr,
    /// `DEEP_ARCHIVE`.
    DeepArchive,
}

impl StorageClass {
    /// Return the string form used in headers and listings.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "STANDARD",
            Self::ReducedRedundancy => "REDUCED_REDUNDANCY",
            Self::StandardIa => "STANDARD_IA",
            Self::OnezoneIa => "ONEZONE_IA",
            Self::IntelligentTiering => "INTELLIGENT_TIERING",
            Self::Glacier => "GLACIER",
            Self::GlacierIr => "GLACIER_IR",
            Self::DeepArchive => "DEEP_ARCHIVE",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`StorageClass`] fails.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown storage class: {0}")]
pub struct ParseStorageClassError(String);

impl FromStr for StorageClass {
    type Err = ParseStorageClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STANDARD" => Ok(Self::Standard),
            "REDUCED_REDUNDANCY" => Ok(Self::ReducedRedundancy),
            "STANDARD_IA" => Ok(Self::StandardIa),
            "ONEZONE_IA" => Ok(Self::OnezoneIa),
            "INTELLIGENT_TIERING" => Ok(Self::IntelligentTiering),
            "GLACIER" => Ok(Self::Glacier),
            "GLACIER_IR" => Ok(Self::GlacierIr),
            "DEEP_ARCHIVE" => Ok(Self::DeepArchive),
            _ => Err(ParseStorageClassError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectMetadata
// ---------------------------------------------------------------------------

/// Everything known about a stored object except its bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    /// Surrogate id the key maps to.
    pub id: Uuid,
    /// The object key.
    pub key: String,
    /// Where the object bytes live.
    pub data_path: PathBuf,
    /// Object size in bytes.
    pub size: u64,
    /// Quoted ETag.
    pub etag: String,
    /// MIME type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Other stored HTTP headers (`Content-Encoding`, `Cache-Control`, ...).
    #[serde(default)]
    pub store_headers: BTreeMap<String, String>,
    /// User-defined metadata (`x-amz-meta-*`).
    #[serde(default)]
    pub user_metadata: HashMap<String, String>,
    /// Server-side encryption headers; empty when unencrypted.
    #[serde(default)]
    pub encryption_headers: HashMap<String, String>,
    /// Object tags in the order they were set.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Object lock retention.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<Retention>,
    /// Legal hold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legal_hold: Option<LegalHold>,
    /// Object owner.
    pub owner: Owner,
    /// Storage class.
    #[serde(default)]
    pub storage_class: StorageClass,
    /// Additional checksum, when one was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ChecksumValue>,
    /// Explicit ACL; `None` means the owner-only default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acl: Option<AccessControlPolicy>,
    /// Number of parts for objects assembled by multipart upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parts_count: Option<u32>,
}

impl ObjectMetadata {
    /// Whether the object was stored with (simulated) server-side encryption.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        !self.encryption_headers.is_empty()
    }

    /// The KMS key reference the object was encrypted with, if any.
    #[must_use]
    pub fn kms_key_id(&self) -> Option<&str> {
        self.encryption_headers
            .get(kms::SSE_KMS_KEY_ID_HEADER)
            .map(String::as_str)
    }

    /// The effective ACL of the object.
    #[must_use]
    pub fn effective_acl(&self) -> AccessControlPolicy {
        self.acl
            .clone()
            .unwrap_or_else(|| AccessControlPolicy::private(&self.owner))
    }
}
