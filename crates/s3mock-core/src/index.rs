//! Bucket and key index.
//!
//! Keys are arbitrary strings (NUL, control characters, `..`, slashes) that
//! cannot safely name files, so every object is stored under a surrogate
//! [`Uuid`] and the index maps `(bucket, key)` to that id.
//!
//! Each bucket's mapping lives in memory as a sorted `BTreeMap` and is
//! persisted, together with the bucket's creation date, to
//! `<bucket>/bucketMetadata.json` after every change. [`KeyIndex::reload`]
//! rebuilds the whole index from those files at startup.
//!
//! Mutations of one bucket are serialized by a per-bucket async mutex that
//! is held across the write of the index file; lookups only take the
//! short-lived read side of the key map.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{S3MockError, S3MockResult};
use crate::repository::{BlobRepository, get_json, join_path, put_json};
use crate::state::{BucketIndexFile, BucketMetadata};
use crate::validation::validate_bucket_name;

/// Name of the per-bucket index file.
pub const BUCKET_INDEX_FILE: &str = "bucketMetadata.json";

#[derive(Debug)]
struct BucketEntry {
    metadata: BucketMetadata,
    keys: RwLock<BTreeMap<String, Uuid>>,
    write_lock: Arc<Mutex<()>>,
}

impl BucketEntry {
    fn new(metadata: BucketMetadata, keys: BTreeMap<String, Uuid>) -> Self {
        Self {
            metadata,
            keys: RwLock::new(keys),
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Exclusive hold on a bucket's index. Dropping it releases the bucket.
#[derive(Debug)]
pub struct BucketGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Process-wide mapping of buckets and keys to surrogate object ids.
#[derive(Debug)]
pub struct KeyIndex {
    repo: Arc<dyn BlobRepository>,
    buckets: DashMap<String, Arc<BucketEntry>>,
}

impl KeyIndex {
    /// Create an empty index persisting through `repo`.
    #[must_use]
    pub fn new(repo: Arc<dyn BlobRepository>) -> Self {
        Self {
            repo,
            buckets: DashMap::new(),
        }
    }

    /// Rebuild the index from the bucket index files found in the
    /// repository. Returns the number of buckets loaded.
    pub async fn reload(&self) -> S3MockResult<usize> {
        let mut loaded = 0;
        for name in self.repo.list("").await? {
            let path = join_path(&[&name, BUCKET_INDEX_FILE]);
            let file: BucketIndexFile = match get_json(self.repo.as_ref(), &path).await {
                Ok(Some(file)) => file,
                Ok(None) => continue,
                Err(e) => {
                    warn!(bucket = %name, error = %e, "skipping unreadable bucket index");
                    continue;
                }
            };
            debug!(bucket = %name, keys = file.objects.len(), "reloaded bucket index");
            self.buckets.insert(
                file.bucket.name.clone(),
                Arc::new(BucketEntry::new(file.bucket, file.objects)),
            );
            loaded += 1;
        }
        Ok(loaded)
    }

    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    /// Create a bucket.
    pub async fn create_bucket(&self, name: &str) -> S3MockResult<BucketMetadata> {
        validate_bucket_name(name)?;

        let entry = match self.buckets.entry(name.to_owned()) {
            Entry::Occupied(_) => {
                return Err(S3MockError::BucketAlreadyExists {
                    bucket: name.to_owned(),
                });
            }
            Entry::Vacant(vacant) => {
                let metadata = BucketMetadata {
                    name: name.to_owned(),
                    creation_date: Utc::now(),
                    path: self.repo.locate(name),
                };
                Arc::clone(&vacant.insert(Arc::new(BucketEntry::new(metadata, BTreeMap::new()))))
            }
        };

        let _guard = entry.write_lock.lock().await;
        if let Err(e) = self.persist(&entry).await {
            self.buckets.remove(name);
            return Err(e);
        }
        info!(bucket = %name, "bucket created");
        Ok(entry.metadata.clone())
    }

    /// Delete a bucket. Fails with `BucketNotEmpty` if it still maps any
    /// key or if `has_uploads` reports in-flight multipart uploads.
    pub async fn delete_bucket(
        &self,
        name: &str,
        has_uploads: impl Fn() -> bool + Send,
    ) -> S3MockResult<()> {
        let entry = self.entry(name)?;
        let _guard = entry.write_lock.lock().await;

        if !self.buckets.contains_key(name) {
            return Err(S3MockError::NoSuchBucket {
                bucket: name.to_owned(),
            });
        }
        if !entry.keys.read().is_empty() || has_uploads() {
            return Err(S3MockError::BucketNotEmpty {
                bucket: name.to_owned(),
            });
        }

        self.repo.delete(name).await?;
        self.buckets.remove(name);
        info!(bucket = %name, "bucket deleted");
        Ok(())
    }

    /// Look up a bucket.
    #[must_use]
    pub fn bucket(&self, name: &str) -> Option<BucketMetadata> {
        self.buckets.get(name).map(|e| e.metadata.clone())
    }

    /// Fail with `NoSuchBucket` unless the bucket exists.
    pub fn ensure_bucket(&self, name: &str) -> S3MockResult<()> {
        self.entry(name).map(|_| ())
    }

    /// All buckets, sorted by name.
    #[must_use]
    pub fn list_buckets(&self) -> Vec<BucketMetadata> {
        let mut buckets: Vec<BucketMetadata> =
            self.buckets.iter().map(|e| e.metadata.clone()).collect();
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        buckets
    }

    /// Take the bucket's mutation lock, e.g. to register an upload without
    /// racing a concurrent bucket deletion.
    pub async fn lock_bucket(&self, name: &str) -> S3MockResult<BucketGuard> {
        let entry = self.entry(name)?;
        let guard = Arc::clone(&entry.write_lock).lock_owned().await;
        // the bucket may have been deleted while we waited
        self.ensure_bucket(name)?;
        Ok(BucketGuard { _guard: guard })
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    /// The id `key` currently maps to, if any.
    pub fn resolve(&self, bucket: &str, key: &str) -> S3MockResult<Option<Uuid>> {
        let entry = self.entry(bucket)?;
        let id = entry.keys.read().get(key).copied();
        Ok(id)
    }

    /// Allocate a fresh id for a new write of `key`, guaranteed to differ
    /// from the id the key currently maps to.
    pub fn allocate_id(&self, bucket: &str, key: &str) -> S3MockResult<Uuid> {
        let current = self.resolve(bucket, key)?;
        loop {
            let id = Uuid::new_v4();
            if Some(id) != current {
                return Ok(id);
            }
        }
    }

    /// Point `key` at `id` and persist the index. Returns the id the key
    /// mapped to before, whose data the caller may now discard.
    pub async fn assign(&self, bucket: &str, key: &str, id: Uuid) -> S3MockResult<Option<Uuid>> {
        let entry = self.entry(bucket)?;
        let _guard = entry.write_lock.lock().await;
        self.ensure_bucket(bucket)?;

        let previous = entry.keys.write().insert(key.to_owned(), id);
        if let Err(e) = self.persist(&entry).await {
            let mut keys = entry.keys.write();
            match previous {
                Some(old) => keys.insert(key.to_owned(), old),
                None => keys.remove(key),
            };
            return Err(e);
        }
        debug!(bucket, key, %id, "key assigned");
        Ok(previous)
    }

    /// Drop the mapping for `key`. Returns the id it mapped to.
    pub async fn remove(&self, bucket: &str, key: &str) -> S3MockResult<Option<Uuid>> {
        let entry = self.entry(bucket)?;
        let _guard = entry.write_lock.lock().await;

        let removed = entry.keys.write().remove(key);
        if let Some(id) = removed {
            if let Err(e) = self.persist(&entry).await {
                entry.keys.write().insert(key.to_owned(), id);
                return Err(e);
            }
            debug!(bucket, key, %id, "key removed");
        }
        Ok(removed)
    }

    /// Sorted snapshot of all `(key, id)` pairs whose key starts with
    /// `prefix`.
    pub fn keys_with_prefix(&self, bucket: &str, prefix: &str) -> S3MockResult<Vec<(String, Uuid)>> {
        let entry = self.entry(bucket)?;
        let keys = entry.keys.read();
        Ok(keys
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, id)| (key.clone(), *id))
            .collect())
    }

    /// Whether `id` is currently mapped by any key of the bucket.
    #[must_use]
    pub fn is_mapped(&self, bucket: &str, id: Uuid) -> bool {
        self.buckets
            .get(bucket)
            .is_some_and(|e| e.keys.read().values().any(|v| *v == id))
    }

    /// Number of keys in a bucket.
    pub fn object_count(&self, bucket: &str) -> S3MockResult<usize> {
        Ok(self.entry(bucket)?.keys.read().len())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn entry(&self, bucket: &str) -> S3MockResult<Arc<BucketEntry>> {
        self.buckets
            .get(bucket)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| S3MockError::NoSuchBucket {
                bucket: bucket.to_owned(),
            })
    }

    /// Write the bucket index file. Callers hold the bucket's write lock.
    async fn persist(&self, entry: &BucketEntry) -> S3MockResult<()> {
        let file = BucketIndexFile {
            bucket: entry.metadata.clone(),
            objects: entry.keys.read().clone(),
        };
        put_json(
            self.repo.as_ref(),
            &join_path(&[&entry.metadata.name, BUCKET_INDEX_FILE]),
            &file,
        )
        .await
    }
}
