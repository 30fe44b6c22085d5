//! Bucket metadata and its persisted key index.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bucket description as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMetadata {
    /// Bucket name.
    pub name: String,
    /// When the bucket was created.
    pub creation_date: DateTime<Utc>,
    /// Root directory of the bucket.
    pub path: PathBuf,
}

/// The on-disk `bucketMetadata.json` document: the bucket plus its
/// key to object-id mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketIndexFile {
    /// The bucket itself.
    #[serde(flatten)]
    pub bucket: BucketMetadata,
    /// Every key that currently has an object, and the id it is stored under.
    #[serde(default)]
    pub objects: BTreeMap<String, Uuid>,
}
