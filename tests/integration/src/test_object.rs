//! Object integration tests.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use s3mock_core::S3MockError;
    use s3mock_core::checksums::{ChecksumAlgorithm, compute_checksum, compute_md5};
    use s3mock_core::kms::{SSE_HEADER, SSE_KMS_KEY_ID_HEADER};
    use s3mock_core::state::{
        AccessControlPolicy, Grant, Grantee, LegalHold, Permission, Retention, RetentionMode, Tag,
    };
    use s3mock_core::store::{CopyObjectRequest, MetadataDirective, PutObjectRequest};
    use s3mock_core::utils::{ByteRange, parse_range_header};

    use crate::{TestStore, body, create_test_bucket, get_bytes, put_bytes, read_all};

    const KMS_KEY: &str = "arn:aws:kms:us-east-1:000000000000:key/valid-test-key";

    fn kms_headers(key: &str) -> HashMap<String, String> {
        HashMap::from([
            (SSE_HEADER.to_owned(), "aws:kms".to_owned()),
            (SSE_KMS_KEY_ID_HEADER.to_owned(), key.to_owned()),
        ])
    }

    /// Object directories currently present for `bucket` on disk.
    fn object_dirs(store: &TestStore, bucket: &str) -> usize {
        let path = std::path::Path::new(&store.mock.config().root).join(bucket);
        std::fs::read_dir(path)
            .expect("read bucket dir")
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .count()
    }

    #[tokio::test]
    async fn test_should_put_and_get_object() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "putget").await;

        let stored = store
            .mock
            .objects()
            .put(
                PutObjectRequest::builder()
                    .bucket(&bucket)
                    .key("greeting.txt")
                    .body(body("hello, s3mock!"))
                    .content_type("text/plain")
                    .user_metadata(HashMap::from([("x-amz-meta-a".to_owned(), "1".to_owned())]))
                    .build(),
            )
            .await
            .expect("put_object");
        assert_eq!(stored.size, 14);
        assert_eq!(stored.etag, format!("\"{}\"", compute_md5(b"hello, s3mock!")));

        let object = store
            .mock
            .objects()
            .get(&bucket, "greeting.txt")
            .await
            .expect("get_object");
        assert_eq!(object.metadata.content_type.as_deref(), Some("text/plain"));
        assert_eq!(object.metadata.user_metadata.get("x-amz-meta-a").map(String::as_str), Some("1"));
        assert_eq!(read_all(object.body).await, b"hello, s3mock!");
    }

    #[tokio::test]
    async fn test_should_fail_for_missing_key() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "missing").await;

        let err = store
            .mock
            .objects()
            .get_metadata(&bucket, "nope")
            .await
            .expect_err("missing key");
        assert!(matches!(err, S3MockError::NoSuchKey { .. }));
        assert_eq!(err.status_code().as_u16(), 404);
    }

    #[tokio::test]
    async fn test_should_replace_object_and_remove_old_files() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "overwrite").await;

        let first = put_bytes(&store.mock, &bucket, "k", "first").await.expect("put 1");
        let second = put_bytes(&store.mock, &bucket, "k", "second").await.expect("put 2");

        assert_ne!(first.id, second.id);
        assert_eq!(
            get_bytes(&store.mock, &bucket, "k").await.expect("get"),
            b"second"
        );
        assert_eq!(object_dirs(&store, &bucket), 1);
    }

    #[tokio::test]
    async fn test_should_keep_one_version_under_concurrent_overwrites() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "race").await;
        let mock = Arc::new(store.mock);

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let mock = Arc::clone(&mock);
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move {
                put_bytes(&mock, &bucket, "hot", vec![i; 64]).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("put_object");
        }

        let data = get_bytes(&mock, &bucket, "hot").await.expect("get");
        assert_eq!(data.len(), 64);
        assert!(data.iter().all(|b| *b == data[0]));
        assert_eq!(mock.index().object_count(&bucket).expect("count"), 1);

        let root = std::path::Path::new(&mock.config().root).join(&bucket);
        let dirs = std::fs::read_dir(root)
            .expect("read bucket dir")
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .count();
        assert_eq!(dirs, 1);
    }

    #[tokio::test]
    async fn test_should_not_lose_tags_to_concurrent_overwrites() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "tagrace").await;
        put_bytes(&store.mock, &bucket, "hot", "v0").await.expect("put_object");
        let mock = Arc::new(store.mock);

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let writer = Arc::clone(&mock);
            let tagger = Arc::clone(&mock);
            let bucket_w = bucket.clone();
            let bucket_t = bucket.clone();
            handles.push(tokio::spawn(async move {
                put_bytes(&writer, &bucket_w, "hot", vec![i; 16]).await.map(|_| ())
            }));
            handles.push(tokio::spawn(async move {
                tagger
                    .objects()
                    .set_tags(&bucket_t, "hot", vec![Tag::new("round", i.to_string())])
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("put or tag");
        }

        let root = std::path::Path::new(&mock.config().root).join(&bucket);
        let dirs = std::fs::read_dir(root)
            .expect("read bucket dir")
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .count();
        assert_eq!(dirs, 1);

        mock.objects()
            .set_tags(&bucket, "hot", vec![Tag::new("final", "yes")])
            .await
            .expect("set_tags");
        assert_eq!(
            mock.objects().get_tags(&bucket, "hot").await.expect("get_tags"),
            vec![Tag::new("final", "yes")]
        );
    }

        #[tokio::test]
    async fn test_should_read_byte_ranges() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "range").await;
        put_bytes(&store.mock, &bucket, "digits", "0123456789")
            .await
            .expect("put_object");

        let range = store
            .mock
            .objects()
            .get_range(&bucket, "digits", ByteRange::new(2, Some(5)))
            .await
            .expect("get_range");
        assert_eq!((range.start, range.end, range.total), (2, 5, 10));
        assert_eq!(read_all(range.body).await, b"2345");

        let suffix = parse_range_header("bytes=-3", 10).expect("parse range");
        let range = store
            .mock
            .objects()
            .get_range(&bucket, "digits", suffix)
            .await
            .expect("get_range suffix");
        assert_eq!(read_all(range.body).await, b"789");

        let err = store
            .mock
            .objects()
            .get_range(&bucket, "digits", ByteRange::new(10, None))
            .await
            .expect_err("unsatisfiable range");
        assert!(matches!(err, S3MockError::InvalidRange));
    }

    #[tokio::test]
    async fn test_should_copy_object_with_replaced_metadata() {
        let store = TestStore::open().await;
        let src = create_test_bucket(&store.mock, "copysrc").await;
        let dst = create_test_bucket(&store.mock, "copydst").await;
        let original = store
            .mock
            .objects()
            .put(
                PutObjectRequest::builder()
                    .bucket(&src)
                    .key("a")
                    .body(body("payload"))
                    .content_type("text/plain")
                    .build(),
            )
            .await
            .expect("put_object");

        let copied = store
            .mock
            .objects()
            .copy(
                CopyObjectRequest::builder()
                    .src_bucket(&src)
                    .src_key("a")
                    .dst_bucket(&dst)
                    .dst_key("b")
                    .metadata_directive(MetadataDirective::Replace)
                    .content_type("application/json")
                    .build(),
            )
            .await
            .expect("copy_object");
        assert_eq!(copied.etag, original.etag);
        assert_eq!(copied.content_type.as_deref(), Some("application/json"));
        assert_eq!(get_bytes(&store.mock, &dst, "b").await.expect("get"), b"payload");

        let err = store
            .mock
            .objects()
            .copy(
                CopyObjectRequest::builder()
                    .src_bucket(&src)
                    .src_key("a")
                    .dst_bucket(&src)
                    .dst_key("a")
                    .build(),
            )
            .await
            .expect_err("copy onto itself");
        assert_eq!(err.code(), "InvalidRequest");
    }

    #[tokio::test]
    async fn test_should_delete_objects_in_request_order() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "batch").await;
        for key in ["one", "two"] {
            put_bytes(&store.mock, &bucket, key, key).await.expect("put_object");
        }

        let keys = vec!["two".to_owned(), "absent".to_owned(), "one".to_owned()];
        let outcomes = store
            .mock
            .objects()
            .delete_objects(&bucket, &keys)
            .await
            .expect("delete_objects");
        let order: Vec<&str> = outcomes.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(order, vec!["two", "absent", "one"]);
        assert!(outcomes.iter().all(|o| o.is_deleted()));
        assert_eq!(store.mock.index().object_count(&bucket).expect("count"), 0);
        assert_eq!(object_dirs(&store, &bucket), 0);
    }

    #[tokio::test]
    async fn test_should_reject_bad_digests_without_side_effects() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "digest").await;

        let err = store
            .mock
            .objects()
            .put(
                PutObjectRequest::builder()
                    .bucket(&bucket)
                    .key("k")
                    .body(body("data"))
                    .content_md5("1B2M2Y8AsgTpgAmY7PhCfg==")
                    .build(),
            )
            .await
            .expect_err("content-md5 mismatch");
        assert_eq!(err.code(), "BadDigest");

        let err = store
            .mock
            .objects()
            .put(
                PutObjectRequest::builder()
                    .bucket(&bucket)
                    .key("k")
                    .body(body("data"))
                    .checksum_algorithm(Some(ChecksumAlgorithm::Sha256))
                    .checksum_value(compute_checksum(ChecksumAlgorithm::Sha256, b"other"))
                    .build(),
            )
            .await
            .expect_err("checksum mismatch");
        assert_eq!(err.code(), "BadDigest");

        assert!(store.mock.index().resolve(&bucket, "k").expect("resolve").is_none());
        assert_eq!(object_dirs(&store, &bucket), 0);
    }

    #[tokio::test]
    async fn test_should_record_requested_checksum() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "checksum").await;

        let stored = store
            .mock
            .objects()
            .put(
                PutObjectRequest::builder()
                    .bucket(&bucket)
                    .key("k")
                    .body(body("data"))
                    .checksum_algorithm(Some(ChecksumAlgorithm::Crc32c))
                    .build(),
            )
            .await
            .expect("put_object");
        let checksum = stored.checksum.expect("checksum recorded");
        assert_eq!(checksum.algorithm, ChecksumAlgorithm::Crc32c);
        assert_eq!(checksum.value, compute_checksum(ChecksumAlgorithm::Crc32c, b"data"));
    }

    #[tokio::test]
    async fn test_should_validate_kms_keys_and_salt_etag() {
        let store = TestStore::open_with(|mut config| {
            config.valid_kms_keys = vec![KMS_KEY.to_owned()];
            config
        })
        .await;
        let bucket = create_test_bucket(&store.mock, "kms").await;

        let err = store
            .mock
            .objects()
            .put(
                PutObjectRequest::builder()
                    .bucket(&bucket)
                    .key("k")
                    .body(body("secret"))
                    .encryption_headers(kms_headers("arn:aws:kms:us-east-1:000000000000:key/unknown"))
                    .build(),
            )
            .await
            .expect_err("unknown kms key");
        assert!(matches!(err, S3MockError::KmsKeyNotFound { .. }));

        let encrypted = store
            .mock
            .objects()
            .put(
                PutObjectRequest::builder()
                    .bucket(&bucket)
                    .key("k")
                    .body(body("secret"))
                    .encryption_headers(kms_headers(KMS_KEY))
                    .build(),
            )
            .await
            .expect("put encrypted");
        assert!(encrypted.is_encrypted());
        assert_eq!(encrypted.kms_key_id(), Some(KMS_KEY));
        assert_ne!(encrypted.etag, format!("\"{}\"", compute_md5(b"secret")));
    }

    #[tokio::test]
    async fn test_should_persist_sidecars_across_restart() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "sidecar").await;
        put_bytes(&store.mock, &bucket, "k", "v").await.expect("put_object");

        let objects = store.mock.objects();
        objects
            .set_tags(&bucket, "k", vec![Tag::new("env", "test")])
            .await
            .expect("set_tags");
        let retention = Retention {
            mode: RetentionMode::Governance,
            retain_until_date: Utc
                .with_ymd_and_hms(2030, 1, 1, 0, 0, 0)
                .single()
                .expect("valid date"),
        };
        objects
            .set_retention(&bucket, "k", retention.clone())
            .await
            .expect("set_retention");
        objects
            .set_legal_hold(&bucket, "k", LegalHold::On)
            .await
            .expect("set_legal_hold");
        let mut acl = objects.get_acl(&bucket, "k").await.expect("get_acl");
        acl.grants.push(Grant {
            grantee: Grantee::Group {
                uri: "http://acs.amazonaws.com/groups/global/AllUsers".to_owned(),
            },
            permission: Permission::Read,
        });
        objects
            .set_acl(&bucket, "k", acl.clone())
            .await
            .expect("set_acl");

        let store = store.reopen().await;
        let objects = store.mock.objects();
        assert_eq!(
            objects.get_tags(&bucket, "k").await.expect("get_tags"),
            vec![Tag::new("env", "test")]
        );
        assert_eq!(
            objects.get_retention(&bucket, "k").await.expect("get_retention"),
            Some(retention)
        );
        assert_eq!(
            objects.get_legal_hold(&bucket, "k").await.expect("get_legal_hold"),
            Some(LegalHold::On)
        );
        let restored: AccessControlPolicy = objects.get_acl(&bucket, "k").await.expect("get_acl");
        assert_eq!(restored, acl);
        assert_eq!(get_bytes(&store.mock, &bucket, "k").await.expect("get"), b"v");
    }

    #[tokio::test]
    async fn test_should_reject_invalid_tags_and_keys() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "invalid").await;
        put_bytes(&store.mock, &bucket, "k", "v").await.expect("put_object");

        let too_many: Vec<Tag> = (0..11).map(|i| Tag::new(format!("k{i}"), "v")).collect();
        let err = store
            .mock
            .objects()
            .set_tags(&bucket, "k", too_many)
            .await
            .expect_err("too many tags");
        assert_eq!(err.code(), "InvalidTag");

        let err = put_bytes(&store.mock, &bucket, &"x".repeat(1025), "v")
            .await
            .expect_err("key too long");
        assert_eq!(err.code(), "KeyTooLongError");
    }
}
