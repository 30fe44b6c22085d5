//! End-to-end tests for the s3mock storage core.
//!
//! Every test opens an [`S3Mock`] over the real filesystem backend rooted in
//! its own temporary directory, so the tests run in parallel with plain
//! `cargo test`:
//! ```text
//! cargo test -p s3mock-integration
//! ```
//!
//! Set `RUST_LOG=s3mock_core=debug` to see the store's tracing output.

use std::sync::Once;

use s3mock_core::repository::ByteStream;
use s3mock_core::state::ObjectMetadata;
use s3mock_core::store::PutObjectRequest;
use s3mock_core::{S3Mock, S3MockConfig, S3MockResult};
use tokio::io::AsyncReadExt;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// A store rooted in a temporary directory that lives as long as the value.
#[derive(Debug)]
pub struct TestStore {
    /// The open store.
    pub mock: S3Mock,
    config: S3MockConfig,
    _dir: tempfile::TempDir,
}

impl TestStore {
    /// Open a fresh store with a 1 byte minimum part size.
    pub async fn open() -> Self {
        Self::open_with(|config| config).await
    }

    /// Open a fresh store after adjusting its configuration.
    pub async fn open_with(adjust: impl FnOnce(S3MockConfig) -> S3MockConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = adjust(
            S3MockConfig::builder()
                .root(dir.path().join("s3mock").to_string_lossy().into_owned())
                .min_part_size(1)
                .retain_files_on_exit(true)
                .build(),
        );
        let mock = S3Mock::open(config.clone())
            .await
            .unwrap_or_else(|e| panic!("failed to open store: {e}"));
        Self {
            mock,
            config,
            _dir: dir,
        }
    }

    /// Shut the store down and open it again over the same directory.
    pub async fn reopen(self) -> Self {
        let Self { mock, config, _dir } = self;
        mock.shutdown().await.expect("shutdown");
        let mock = S3Mock::open(config.clone())
            .await
            .unwrap_or_else(|e| panic!("failed to reopen store: {e}"));
        Self { mock, config, _dir }
    }
}

/// Generate a unique bucket name for a test.
#[must_use]
pub fn test_bucket_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("test-{prefix}-{id}")
}

/// Create a bucket and return its name.
pub async fn create_test_bucket(mock: &S3Mock, prefix: &str) -> String {
    let name = test_bucket_name(prefix);
    mock.create_bucket(&name)
        .await
        .unwrap_or_else(|e| panic!("failed to create bucket {name}: {e}"));
    name
}

/// Wrap owned bytes as a request body.
#[must_use]
pub fn body(data: impl Into<Vec<u8>>) -> ByteStream {
    Box::pin(std::io::Cursor::new(data.into()))
}

/// Store `data` under `key` with default attributes.
pub async fn put_bytes(
    mock: &S3Mock,
    bucket: &str,
    key: &str,
    data: impl Into<Vec<u8>>,
) -> S3MockResult<ObjectMetadata> {
    mock.objects()
        .put(
            PutObjectRequest::builder()
                .bucket(bucket)
                .key(key)
                .body(body(data))
                .build(),
        )
        .await
}

/// Drain a body into memory.
pub async fn read_all(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    stream
        .read_to_end(&mut out)
        .await
        .expect("read object body");
    out
}

/// Read the whole content of `key`.
pub async fn get_bytes(mock: &S3Mock, bucket: &str, key: &str) -> S3MockResult<Vec<u8>> {
    let object = mock.objects().get(bucket, key).await?;
    Ok(read_all(object.body).await)
}

mod test_list;
mod test_multipart;
mod test_object;
