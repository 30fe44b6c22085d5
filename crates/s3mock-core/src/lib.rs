//! Storage core of a local S3-compatible object store.
//!
//! This crate persists buckets, objects and multipart uploads on the local
//! filesystem (or in memory) with S3 semantics: stable ETags, checksums,
//! server-side-encryption metadata, tags, retention, legal hold and ACLs,
//! `aws-chunked` request bodies, and V1/V2 key listing with delimiters and
//! pagination. It carries no HTTP or XML layer.
//!
//! # Architecture
//!
//! ```text
//!                      S3Mock (facade)
//!                            |
//!        +-------------------+--------------------+
//!        v                   v                    v
//!   ObjectStore  <---  MultipartStore       ListingEngine
//!        |                   |                    |
//!        +---------+---------+--------------------+
//!                  v
//!              KeyIndex  (bucket -> sorted key -> object id)
//!                  |
//!                  v
//!            BlobRepository  (filesystem / in-memory)
//! ```
//!
//! Writes follow a copy-then-swap scheme: data and metadata are written
//! under a fresh object id, the key is then repointed at it in the index,
//! and only afterwards is the previous object removed. A reader that resolved
//! the previous id retries the lookup when its files disappear.

pub mod checksums;
pub mod codec;
pub mod config;
pub mod error;
pub mod index;
pub mod kms;
pub mod list;
pub mod provider;
pub mod repository;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

pub use config::S3MockConfig;
pub use error::{S3MockError, S3MockResult};
pub use provider::S3Mock;
