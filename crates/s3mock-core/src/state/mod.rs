//! Value types shared by the index and the stores.

pub mod bucket;
pub mod multipart;
pub mod object;

pub use bucket::{BucketIndexFile, BucketMetadata};
pub use multipart::{MultipartSession, MultipartUpload, UploadPart};
pub use object::{
    AccessControlPolicy, Grant, Grantee, LegalHold, ObjectMetadata, Owner, Permission, Retention,
    RetentionMode, StorageClass, Tag,
};
