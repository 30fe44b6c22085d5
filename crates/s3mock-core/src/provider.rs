//! The [`S3Mock`] facade.
//!
//! [`S3Mock`] wires the repository, the key index, the KMS collaborator and
//! the object, multipart and listing engines together, restores persisted
//! state when opened and exposes the bucket-level operations that span
//! several engines.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use tracing::{debug, info};

use crate::config::S3MockConfig;
use crate::error::{S3MockError, S3MockResult};
use crate::index::KeyIndex;
use crate::kms::{KmsKeyRegistry, KmsKeyValidator};
use crate::list::{
    ListObjectsRequest, ListObjectsResult, ListObjectsV2Request, ListObjectsV2Result,
    ListingEngine,
};
use crate::repository::{BlobRepository, FileSystemRepository, InMemoryRepository};
use crate::state::BucketMetadata;
use crate::store::{MultipartStore, ObjectStore};

/// A local S3-compatible object store.
///
/// # Examples
///
/// ```
/// # tokio_test::block_on(async {
/// use s3mock_core::{S3Mock, S3MockConfig};
///
/// let mock = S3Mock::in_memory(S3MockConfig::default()).await.unwrap();
/// mock.create_bucket("bucket").await.unwrap();
/// assert_eq!(mock.list_buckets().len(), 1);
/// # });
/// ```
#[derive(Debug)]
pub struct S3Mock {
    index: Arc<KeyIndex>,
    objects: Arc<ObjectStore>,
    multipart: Arc<MultipartStore>,
    listing: ListingEngine,
    config: Arc<S3MockConfig>,
    /// Filesystem root, when backed by one.
    root: Option<PathBuf>,
}

impl S3Mock {
    /// Open a store rooted at `config.root`, restoring every bucket, key and
    /// multipart upload persisted there, then create the configured initial
    /// buckets.
    pub async fn open(config: S3MockConfig) -> S3MockResult<Self> {
        let repo = FileSystemRepository::open(&config.root).await?;
        let root = repo.root().to_path_buf();
        let mut mock = Self::with_repository(Arc::new(repo), config).await?;
        mock.root = Some(root);
        Ok(mock)
    }

    /// Open a store that keeps everything in memory.
    pub async fn in_memory(config: S3MockConfig) -> S3MockResult<Self> {
        Self::with_repository(Arc::new(InMemoryRepository::new()), config).await
    }

    /// Open a store over an arbitrary repository.
    pub async fn with_repository(
        repo: Arc<dyn BlobRepository>,
        config: S3MockConfig,
    ) -> S3MockResult<Self> {
        let kms: Arc<dyn KmsKeyValidator> =
            Arc::new(KmsKeyRegistry::new(config.valid_kms_keys.iter().cloned()));

        let index = Arc::new(KeyIndex::new(Arc::clone(&repo)));
        let buckets = index.reload().await?;

        let objects = Arc::new(ObjectStore::new(
            Arc::clone(&repo),
            Arc::clone(&index),
            Arc::clone(&kms),
        ));
        let multipart = Arc::new(MultipartStore::new(
            repo,
            Arc::clone(&index),
            Arc::clone(&objects),
            kms,
            config.min_part_size,
        ));
        let uploads = multipart.reload().await?;
        let listing = ListingEngine::new(Arc::clone(&index), Arc::clone(&objects));

        for name in &config.initial_buckets {
            match index.create_bucket(name).await {
                Ok(_) | Err(S3MockError::BucketAlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        info!(buckets, uploads, region = %config.region, "s3mock store opened");
        Ok(Self {
            index,
            objects,
            multipart,
            listing,
            config: Arc::new(config),
            root: None,
        })
    }

    /// Returns the object store.
    #[must_use]
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Returns the multipart store.
    #[must_use]
    pub fn multipart(&self) -> &MultipartStore {
        &self.multipart
    }

    /// Returns the key index.
    #[must_use]
    pub fn index(&self) -> &KeyIndex {
        &self.index
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &S3MockConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Buckets
    // -----------------------------------------------------------------------

    /// Create an empty bucket.
    pub async fn create_bucket(&self, name: &str) -> S3MockResult<BucketMetadata> {
        self.index.create_bucket(name).await
    }

    /// Delete a bucket that holds no keys and no in-flight uploads.
    pub async fn delete_bucket(&self, name: &str) -> S3MockResult<()> {
        let multipart = &self.multipart;
        self.index
            .delete_bucket(name, || multipart.has_uploads(name))
            .await
    }

    /// Look up a bucket.
    pub fn head_bucket(&self, name: &str) -> S3MockResult<BucketMetadata> {
        self.index.bucket(name).ok_or_else(|| S3MockError::NoSuchBucket {
            bucket: name.to_owned(),
        })
    }

    /// All buckets, sorted by name.
    #[must_use]
    pub fn list_buckets(&self) -> Vec<BucketMetadata> {
        self.index.list_buckets()
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    /// List keys with the V1 `marker` protocol.
    pub async fn list_objects(&self, request: ListObjectsRequest) -> S3MockResult<ListObjectsResult> {
        self.listing.list_v1(request).await
    }

    /// List keys with the V2 continuation-token protocol.
    pub async fn list_objects_v2(
        &self,
        request: ListObjectsV2Request,
    ) -> S3MockResult<ListObjectsV2Result> {
        self.listing.list_v2(request).await
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Stop the store, removing the root directory unless the configuration
    /// retains files on exit.
    pub async fn shutdown(self) -> S3MockResult<()> {
        let Some(root) = self.root else {
            return Ok(());
        };
        if self.config.retain_files_on_exit {
            debug!(root = %root.display(), "retaining store files");
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to remove {}", root.display()))
                    .map_err(S3MockError::from);
            }
        }
        info!(root = %root.display(), "s3mock store removed");
        Ok(())
    }
}
