//! Domain error type for the storage core.
//!
//! Every failure the stores, the index and the listing engine can report is a
//! variant of [`S3MockError`]. Each variant knows its S3 error code and the
//! HTTP status the (external) HTTP layer should answer with, so the error can
//! be translated to wire format without any further lookup.
//!
//! # Usage
//!
//! ```
//! use s3mock_core::error::S3MockError;
//!
//! let err = S3MockError::NoSuchBucket {
//!     bucket: "my-bucket".to_owned(),
//! };
//! assert_eq!(err.code(), "NoSuchBucket");
//! assert_eq!(err.status_code(), http::StatusCode::NOT_FOUND);
//! ```

use http::StatusCode;

/// Error type shared by every component of the storage core.
#[derive(Debug, thiserror::Error)]
pub enum S3MockError {
    // -----------------------------------------------------------------------
    // Bucket lifecycle
    // -----------------------------------------------------------------------
    /// The specified bucket does not exist.
    #[error("The specified bucket does not exist: {bucket}")]
    NoSuchBucket {
        /// The bucket name that was not found.
        bucket: String,
    },

    /// A bucket with this name already exists.
    #[error("The requested bucket name is not available: {bucket}")]
    BucketAlreadyExists {
        /// The bucket name that already exists.
        bucket: String,
    },

    /// The bucket still holds objects or in-flight multipart uploads.
    #[error("The bucket you tried to delete is not empty: {bucket}")]
    BucketNotEmpty {
        /// The bucket name that is not empty.
        bucket: String,
    },

    /// The bucket name violates the naming rules.
    #[error("Invalid bucket name: {name}: {reason}")]
    InvalidBucketName {
        /// The invalid bucket name.
        name: String,
        /// The reason for the error.
        reason: String,
    },

    // -----------------------------------------------------------------------
    // Object / session lookup
    // -----------------------------------------------------------------------
    /// The specified key does not exist.
    #[error("The specified key does not exist: {key}")]
    NoSuchKey {
        /// The key that was not found.
        key: String,
    },

    /// The specified multipart upload does not exist.
    #[error("The specified upload does not exist: {upload_id}")]
    NoSuchUpload {
        /// The upload ID that was not found.
        upload_id: String,
    },

    // -----------------------------------------------------------------------
    // Multipart completion
    // -----------------------------------------------------------------------
    /// A listed part was never uploaded, or its ETag does not match.
    #[error("One or more of the specified parts could not be found: part {part_number}")]
    InvalidPart {
        /// The offending part number.
        part_number: u32,
    },

    /// The list of parts was not in strictly ascending order.
    #[error("The list of parts was not in ascending order")]
    InvalidPartOrder,

    /// A non-final part is smaller than the minimum part size.
    #[error("Your proposed upload is smaller than the minimum allowed object size: part {part_number}")]
    EntityTooSmall {
        /// The part that is too small.
        part_number: u32,
    },

    // -----------------------------------------------------------------------
    // Request validation
    // -----------------------------------------------------------------------
    /// The request is semantically invalid.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// An argument provided is invalid.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// The requested range is not satisfiable.
    #[error("The requested range is not satisfiable")]
    InvalidRange,

    /// The supplied digest is not valid base64 or has the wrong length.
    #[error("The Content-MD5 you specified is not valid")]
    InvalidDigest,

    /// The supplied digest or checksum does not match the received bytes.
    #[error("The {what} you specified did not match what we received")]
    BadDigest {
        /// Which digest failed (`Content-MD5`, `CRC32`, ...).
        what: String,
    },

    /// A tag key or value is invalid.
    #[error("Invalid tag: {message}")]
    InvalidTag {
        /// Description of the tag error.
        message: String,
    },

    /// The key exceeds the maximum key length.
    #[error("Your key is too long")]
    KeyTooLong,

    // -----------------------------------------------------------------------
    // Simulated KMS
    // -----------------------------------------------------------------------
    /// The referenced KMS key is not registered.
    #[error("Key '{key_id}' does not exist")]
    KmsKeyNotFound {
        /// The unknown key reference.
        key_id: String,
    },

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------
    /// An unexpected failure (I/O, corrupt metadata, ...).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl S3MockError {
    /// The S3 error code string for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchBucket { .. } => "NoSuchBucket",
            Self::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            Self::BucketNotEmpty { .. } => "BucketNotEmpty",
            Self::InvalidBucketName { .. } => "InvalidBucketName",
            Self::NoSuchKey { .. } => "NoSuchKey",
            Self::NoSuchUpload { .. } => "NoSuchUpload",
            Self::InvalidPart { .. } => "InvalidPart",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::EntityTooSmall { .. } => "EntityTooSmall",
            Self::InvalidRequest { .. } => "InvalidRequest",
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::InvalidRange => "InvalidRange",
            Self::InvalidDigest => "InvalidDigest",
            Self::BadDigest { .. } => "BadDigest",
            Self::InvalidTag { .. } => "InvalidTag",
            Self::KeyTooLong => "KeyTooLongError",
            Self::KmsKeyNotFound { .. } => "KMS.NotFoundException",
            Self::Internal(_) => "InternalError",
        }
    }

    /// The HTTP status the error translates to.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoSuchBucket { .. } | Self::NoSuchKey { .. } | Self::NoSuchUpload { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::BucketAlreadyExists { .. } | Self::BucketNotEmpty { .. } => StatusCode::CONFLICT,
            Self::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidBucketName { .. }
            | Self::InvalidPart { .. }
            | Self::InvalidPartOrder
            | Self::EntityTooSmall { .. }
            | Self::InvalidRequest { .. }
            | Self::InvalidArgument { .. }
            | Self::InvalidDigest
            | Self::BadDigest { .. }
            | Self::InvalidTag { .. }
            | Self::KeyTooLong
            | Self::KmsKeyNotFound { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Build an [`S3MockError::InvalidRequest`] from a message.
    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Build an [`S3MockError::InvalidArgument`] from a message.
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for S3MockError {
    /// Body decoding failures become `InvalidRequest`; everything else is
    /// an internal I/O failure.
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::InvalidData {
            if let Some(decode) = err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<crate::codec::ChunkedDecodeError>())
            {
                return Self::invalid_request(decode.to_string());
            }
        }
        Self::Internal(anyhow::Error::new(err))
    }
}

/// Convenience result alias.
pub type S3MockResult<T> = Result<T, S3MockError>;
