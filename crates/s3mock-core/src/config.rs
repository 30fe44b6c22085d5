//! Store configuration.
//!
//! Provides [`S3MockConfig`]. Values come from the builder in tests and from
//! environment variables when embedded in a server.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// Minimum size of every part but the last one in a completed upload (5 MiB).
pub const DEFAULT_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Storage core configuration.
///
/// # Examples
///
/// ```
/// use s3mock_core::config::S3MockConfig;
///
/// let config = S3MockConfig::builder()
///     .root("/tmp/s3mock-doc".into())
///     .initial_buckets(vec!["bucket-a".to_owned()])
///     .build();
/// assert_eq!(config.min_part_size, 5 * 1024 * 1024);
/// assert!(!config.retain_files_on_exit);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct S3MockConfig {
    /// Directory holding every bucket.
    #[builder(default = default_root())]
    pub root: String,

    /// Keep the root directory when the store shuts down.
    #[builder(default = false)]
    pub retain_files_on_exit: bool,

    /// Buckets created when the store opens (existing ones are kept).
    #[builder(default)]
    pub initial_buckets: Vec<String>,

    /// KMS key ids or ARNs accepted for `aws:kms` encryption.
    #[builder(default)]
    pub valid_kms_keys: Vec<String>,

    /// Minimum size of non-final parts when completing an upload.
    #[builder(default = DEFAULT_MIN_PART_SIZE)]
    pub min_part_size: u64,

    /// Region reported for buckets.
    #[builder(default = String::from("us-east-1"))]
    pub region: String,
}

impl Default for S3MockConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl S3MockConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `S3MOCK_ROOT` | `<tmp>/s3mockFileStore` |
    /// | `S3MOCK_RETAIN_FILES_ON_EXIT` | `false` |
    /// | `S3MOCK_INITIAL_BUCKETS` | (none, comma separated) |
    /// | `S3MOCK_VALID_KMS_KEYS` | (none, comma separated) |
    /// | `S3MOCK_MIN_PART_SIZE` | `5242880` |
    /// | `S3MOCK_REGION` | `us-east-1` |
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("S3MOCK_ROOT") {
            config.root = v;
        }
        if let Ok(v) = std::env::var("S3MOCK_RETAIN_FILES_ON_EXIT") {
            config.retain_files_on_exit = parse_bool(&v);
        }
        if let Ok(v) = std::env::var("S3MOCK_INITIAL_BUCKETS") {
            config.initial_buckets = parse_list(&v);
        }
        if let Ok(v) = std::env::var("S3MOCK_VALID_KMS_KEYS") {
            config.valid_kms_keys = parse_list(&v);
        }
        if let Ok(v) = std::env::var("S3MOCK_MIN_PART_SIZE") {
            if let Ok(n) = v.parse::<u64>() {
                config.min_part_size = n;
            }
        }
        if let Ok(v) = std::env::var("S3MOCK_REGION") {
            config.region = v;
        }

        config
    }
}

fn default_root() -> String {
    std::env::temp_dir()
        .join("s3mockFileStore")
        .to_string_lossy()
        .into_owned()
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Split a comma separated list, dropping empty entries.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}
