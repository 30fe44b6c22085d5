//! Request validation shared by the stores.
//!
//! Bucket naming follows the
//! [Amazon S3 rules](https://docs.aws.amazon.com/AmazonS3/latest/userguide/bucketnamingrules.html);
//! keys, tags, metadata and part numbers follow the S3 limits.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use crate::error::{S3MockError, S3MockResult};
use crate::state::Tag;

/// Maximum number of tags on one object.
const MAX_TAGS: usize = 10;

/// Maximum length of a tag key in characters.
const MAX_TAG_KEY_LEN: usize = 128;

/// Maximum length of a tag value in characters.
const MAX_TAG_VALUE_LEN: usize = 256;

/// Maximum total size of user metadata keys and values.
const MAX_METADATA_SIZE: usize = 2048;

/// Maximum object key length in bytes.
const MAX_KEY_BYTES: usize = 1024;

/// Highest part number a multipart upload accepts.
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Validate a bucket name.
///
/// # Examples
///
/// ```
/// use s3mock_core::validation::validate_bucket_name;
///
/// assert!(validate_bucket_name("my-valid-bucket").is_ok());
/// assert!(validate_bucket_name("AB").is_err());
/// assert!(validate_bucket_name("192.168.0.1").is_err());
/// ```
pub fn validate_bucket_name(name: &str) -> S3MockResult<()> {
    let invalid = |reason: &str| {
        Err(S3MockError::InvalidBucketName {
            name: name.to_owned(),
            reason: reason.to_owned(),
        })
    };

    if !(3..=63).contains(&name.len()) {
        return invalid("Bucket name must be between 3 and 63 characters long");
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return invalid("Bucket name must only contain lowercase letters, numbers, hyphens, and dots");
    }
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let bytes = name.as_bytes();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return invalid("Bucket name must start and end with a letter or number");
    }
    if name.contains("..") {
        return invalid("Bucket name must not contain consecutive dots");
    }
    if name.parse::<Ipv4Addr>().is_ok() {
        return invalid("Bucket name must not be formatted as an IP address");
    }
    if name.starts_with("xn--") || name.starts_with("sthree-") || name.ends_with("-s3alias") {
        return invalid("Bucket name uses a reserved prefix or suffix");
    }
    Ok(())
}

/// Validate an object key: 1 to 1024 bytes. Any characters are allowed.
pub fn validate_object_key(key: &str) -> S3MockResult<()> {
    if key.is_empty() {
        return Err(S3MockError::invalid_argument("Object key must not be empty"));
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(S3MockError::KeyTooLong);
    }
    Ok(())
}

/// Validate a tag set: at most 10 tags, unique keys of 1..=128 characters,
/// values of at most 256 characters.
pub fn validate_tags(tags: &[Tag]) -> S3MockResult<()> {
    let invalid = |message: String| Err(S3MockError::InvalidTag { message });

    if tags.len() > MAX_TAGS {
        return invalid(format!(
            "Object tags cannot be greater than {MAX_TAGS}, got {}",
            tags.len()
        ));
    }

    let mut seen = HashSet::with_capacity(tags.len());
    for tag in tags {
        let key_len = tag.key.chars().count();
        if key_len == 0 || key_len > MAX_TAG_KEY_LEN {
            return invalid(format!(
                "Tag key must be between 1 and {MAX_TAG_KEY_LEN} characters, got {key_len}"
            ));
        }
        if tag.value.chars().count() > MAX_TAG_VALUE_LEN {
            return invalid(format!(
                "Tag value must not exceed {MAX_TAG_VALUE_LEN} characters"
            ));
        }
        if !seen.insert(tag.key.as_str()) {
            return invalid(format!("Cannot provide multiple tags with the same key: {}", tag.key));
        }
    }
    Ok(())
}

/// Validate that user metadata does not exceed 2 KB in total.
pub fn validate_metadata(metadata: &HashMap<String, String>) -> S3MockResult<()> {
    let total: usize = metadata.iter().map(|(k, v)| k.len() + v.len()).sum();
    if total > MAX_METADATA_SIZE {
        return Err(S3MockError::invalid_argument(format!(
            "User-defined metadata must not exceed {MAX_METADATA_SIZE} bytes, got {total}"
        )));
    }
    Ok(())
}

/// Validate a part number: below 1 is an invalid request, above 10 000 an
/// invalid argument.
pub fn validate_part_number(part_number: i32) -> S3MockResult<u32> {
    if part_number < 1 {
        return Err(S3MockError::invalid_request(format!(
            "Part number must be an integer between 1 and {MAX_PART_NUMBER}, inclusive"
        )));
    }
    let part_number = part_number.unsigned_abs();
    if part_number > MAX_PART_NUMBER {
        return Err(S3MockError::invalid_argument(format!(
            "Part number must be an integer between 1 and {MAX_PART_NUMBER}, inclusive"
        )));
    }
    Ok(part_number)
}

/// A caller-chosen upload id becomes a directory name, so it must be a
/// non-empty run of ASCII alphanumerics, `-` or `_`.
pub fn validate_upload_id(upload_id: &str) -> S3MockResult<()> {
    if upload_id.is_empty()
        || !upload_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(S3MockError::invalid_argument(format!(
            "Invalid upload id: {upload_id:?}"
        )));
    }
    Ok(())
}
