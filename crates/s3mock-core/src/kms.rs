//! Simulated KMS key validation.
//!
//! Encryption is never real: an encrypted object differs from a plain one
//! only by its salted ETag and the stored encryption headers. What *is*
//! enforced is that a referenced KMS key exists. The check goes through the
//! [`KmsKeyValidator`] collaborator handed to the stores, so tests and the
//! embedding server decide which keys are registered.

use std::collections::HashMap;
use std::fmt;

use dashmap::DashSet;
use tracing::debug;

use crate::error::{S3MockError, S3MockResult};

/// Header naming the server-side encryption algorithm.
pub const SSE_HEADER: &str = "x-amz-server-side-encryption";

/// Header naming the KMS key used for `aws:kms` encryption.
pub const SSE_KMS_KEY_ID_HEADER: &str = "x-amz-server-side-encryption-aws-kms-key-id";

/// Answers whether a KMS key reference is registered.
pub trait KmsKeyValidator: Send + Sync + fmt::Debug {
    /// `true` if `key_ref` (a key id or key ARN) is known.
    fn is_valid(&self, key_ref: &str) -> bool;
}

/// A set of registered KMS keys.
#[derive(Debug, Default)]
pub struct KmsKeyRegistry {
    keys: DashSet<String>,
}

impl KmsKeyRegistry {
    /// Create a registry pre-populated with `keys`.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::default();
        for key in keys {
            registry.register(key);
        }
        registry
    }

    /// Register a key id or ARN.
    pub fn register(&self, key_ref: impl Into<String>) {
        let key_ref = key_ref.into();
        debug!(key_ref = %key_ref, "registered kms key");
        self.keys.insert(key_ref);
    }
}

impl KmsKeyValidator for KmsKeyRegistry {
    fn is_valid(&self, key_ref: &str) -> bool {
        if self.keys.contains(key_ref) {
            return true;
        }
        // arn:aws:kms:<region>:<account>:key/<id>
        key_ref
            .rsplit_once(":key/")
            .is_some_and(|(_, id)| self.keys.contains(id))
    }
}

/// Reject the operation if it references an unregistered KMS key.
///
/// Only `aws:kms` style encryption with an explicit key id is checked.
pub fn verify_encryption(
    validator: &dyn KmsKeyValidator,
    encryption_headers: &HashMap<String, String>,
) -> S3MockResult<()> {
    let uses_kms = encryption_headers
        .get(SSE_HEADER)
        .is_some_and(|v| v.starts_with("aws:kms"));
    if !uses_kms {
        return Ok(());
    }
    match encryption_headers.get(SSE_KMS_KEY_ID_HEADER) {
        Some(key_id) if !validator.is_valid(key_id) => Err(S3MockError::KmsKeyNotFound {
            key_id: key_id.clone(),
        }),
        _ => Ok(()),
    }
}

/// The value an encrypted object's ETag is salted with: the KMS key
/// reference, or the algorithm name when no key is given.
#[must_use]
pub fn etag_salt(encryption_headers: &HashMap<String, String>) -> Option<&str> {
    encryption_headers
        .get(SSE_KMS_KEY_ID_HEADER)
        .or_else(|| encryption_headers.get(SSE_HEADER))
        .map(String::as_str)
}
