//! Multipart upload integration tests.

#[cfg(test)]
mod tests {
    use s3mock_core::S3Mock;
    use s3mock_core::checksums::{compute_md5, compute_multipart_etag};
    use s3mock_core::state::UploadPart;
    use s3mock_core::store::{CompletedPart, CopyPartRequest, PrepareUploadRequest, PutPartRequest};
    use s3mock_core::utils::ByteRange;

    use crate::{TestStore, body, create_test_bucket, get_bytes, put_bytes};

    async fn prepare(mock: &S3Mock, bucket: &str, key: &str) -> String {
        mock.multipart()
            .prepare(
                PrepareUploadRequest::builder()
                    .bucket(bucket)
                    .key(key)
                    .content_type("application/octet-stream")
                    .build(),
            )
            .await
            .expect("create_multipart_upload")
            .upload_id
    }

    async fn upload_part(
        mock: &S3Mock,
        bucket: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> UploadPart {
        mock.multipart()
            .put_part(
                PutPartRequest::builder()
                    .bucket(bucket)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(body(data))
                    .build(),
            )
            .await
            .unwrap_or_else(|e| panic!("upload part {part_number} failed: {e}"))
    }

    #[tokio::test]
    async fn test_should_complete_multipart_upload() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "mpu").await;
        let upload_id = prepare(&store.mock, &bucket, "multipart.bin").await;

        let part1 = upload_part(&store.mock, &bucket, &upload_id, 1, vec![0xAA; 1024]).await;
        let part2 = upload_part(&store.mock, &bucket, &upload_id, 2, vec![0xBB; 1024]).await;
        assert_eq!(part1.etag, format!("\"{}\"", compute_md5(&[0xAA; 1024])));

        let object = store
            .mock
            .multipart()
            .complete(
                &bucket,
                "multipart.bin",
                &upload_id,
                &[
                    CompletedPart::new(1, part1.etag.clone()),
                    CompletedPart::new(2, part2.etag.clone()),
                ],
            )
            .await
            .expect("complete_multipart_upload");

        assert_eq!(object.size, 2048);
        assert_eq!(object.parts_count, Some(2));
        assert_eq!(object.etag, compute_multipart_etag(&[&part1.etag, &part2.etag]));
        assert!(object.etag.ends_with("-2\""));
        assert_eq!(object.content_type.as_deref(), Some("application/octet-stream"));

        let data = get_bytes(&store.mock, &bucket, "multipart.bin")
            .await
            .expect("get_object");
        assert_eq!(&data[..1024], &[0xAA; 1024][..]);
        assert_eq!(&data[1024..], &[0xBB; 1024][..]);
        assert!(
            store
                .mock
                .multipart()
                .list_uploads(Some(&bucket), None)
                .expect("list_multipart_uploads")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_should_complete_selected_parts_only() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "subset").await;
        let upload_id = prepare(&store.mock, &bucket, "k").await;

        let mut etags = Vec::new();
        for (n, fill) in [(1, b'a'), (2, b'b'), (3, b'c')] {
            etags.push(upload_part(&store.mock, &bucket, &upload_id, n, vec![fill; 4]).await.etag);
        }

        let object = store
            .mock
            .multipart()
            .complete(
                &bucket,
                "k",
                &upload_id,
                &[
                    CompletedPart::new(1, etags[0].clone()),
                    CompletedPart::new(3, etags[2].clone()),
                ],
            )
            .await
            .expect("complete_multipart_upload");
        assert_eq!(object.size, 8);
        assert_eq!(object.etag, compute_multipart_etag(&[&etags[0], &etags[2]]));
        assert_eq!(get_bytes(&store.mock, &bucket, "k").await.expect("get"), b"aaaacccc");
    }

    #[tokio::test]
    async fn test_should_reject_invalid_completions() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "reject").await;
        let upload_id = prepare(&store.mock, &bucket, "k").await;
        let part1 = upload_part(&store.mock, &bucket, &upload_id, 1, vec![1; 4]).await;
        let part2 = upload_part(&store.mock, &bucket, &upload_id, 2, vec![2; 4]).await;
        let multipart = store.mock.multipart();

        let err = multipart
            .complete(&bucket, "k", &upload_id, &[])
            .await
            .expect_err("empty part list");
        assert_eq!(err.code(), "InvalidRequest");

        let err = multipart
            .complete(
                &bucket,
                "k",
                &upload_id,
                &[
                    CompletedPart::new(2, part2.etag.clone()),
                    CompletedPart::new(1, part1.etag.clone()),
                ],
            )
            .await
            .expect_err("parts out of order");
        assert_eq!(err.code(), "InvalidPartOrder");

        let err = multipart
            .complete(
                &bucket,
                "k",
                &upload_id,
                &[CompletedPart::new(1, part1.etag.clone()), CompletedPart::new(7, "\"x\"")],
            )
            .await
            .expect_err("missing part");
        assert_eq!(err.code(), "InvalidPart");

        let err = multipart
            .complete(&bucket, "k", &upload_id, &[CompletedPart::new(1, "\"deadbeef\"")])
            .await
            .expect_err("etag mismatch");
        assert_eq!(err.code(), "InvalidPart");

        // the upload is still usable after rejected completions
        multipart
            .complete(&bucket, "k", &upload_id, &[CompletedPart::new(1, part1.etag)])
            .await
            .expect("complete_multipart_upload");
    }

    #[tokio::test]
    async fn test_should_enforce_minimum_part_size() {
        let store = TestStore::open_with(|mut config| {
            config.min_part_size = 1024;
            config
        })
        .await;
        let bucket = create_test_bucket(&store.mock, "small").await;
        let upload_id = prepare(&store.mock, &bucket, "k").await;
        let small = upload_part(&store.mock, &bucket, &upload_id, 1, vec![0; 10]).await;
        let last = upload_part(&store.mock, &bucket, &upload_id, 2, vec![0; 10]).await;

        let err = store
            .mock
            .multipart()
            .complete(
                &bucket,
                "k",
                &upload_id,
                &[
                    CompletedPart::new(1, small.etag.clone()),
                    CompletedPart::new(2, last.etag),
                ],
            )
            .await
            .expect_err("entity too small");
        assert_eq!(err.code(), "EntityTooSmall");

        // a lone undersized part is the final part
        store
            .mock
            .multipart()
            .complete(&bucket, "k", &upload_id, &[CompletedPart::new(1, small.etag)])
            .await
            .expect("complete_multipart_upload");
    }

    #[tokio::test]
    async fn test_should_validate_part_numbers() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "partno").await;
        let upload_id = prepare(&store.mock, &bucket, "k").await;

        for (part_number, code) in [(0, "InvalidRequest"), (10_001, "InvalidArgument")] {
            let err = store
                .mock
                .multipart()
                .put_part(
                    PutPartRequest::builder()
                        .bucket(&bucket)
                        .upload_id(&upload_id)
                        .part_number(part_number)
                        .body(body("x"))
                        .build(),
                )
                .await
                .expect_err("invalid part number");
            assert_eq!(err.code(), code, "part number {part_number}");
        }

        let err = store
            .mock
            .multipart()
            .put_part(
                PutPartRequest::builder()
                    .bucket(&bucket)
                    .upload_id("no-such-upload")
                    .part_number(1)
                    .body(body("x"))
                    .build(),
            )
            .await
            .expect_err("unknown upload");
        assert_eq!(err.code(), "NoSuchUpload");
    }

    #[tokio::test]
    async fn test_should_copy_part_ranges() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "copypart").await;
        put_bytes(&store.mock, &bucket, "source", "0123456789")
            .await
            .expect("put_object");
        let upload_id = prepare(&store.mock, &bucket, "target").await;

        let part = store
            .mock
            .multipart()
            .copy_part(
                CopyPartRequest::builder()
                    .src_bucket(&bucket)
                    .src_key("source")
                    .range(ByteRange::new(3, Some(6)))
                    .bucket(&bucket)
                    .upload_id(&upload_id)
                    .part_number(1)
                    .build(),
            )
            .await
            .expect("upload_part_copy");
        assert_eq!(part.size, 4);
        assert_eq!(part.etag, format!("\"{}\"", compute_md5(b"3456")));

        store
            .mock
            .multipart()
            .complete(&bucket, "target", &upload_id, &[CompletedPart::new(1, part.etag)])
            .await
            .expect("complete_multipart_upload");
        assert_eq!(get_bytes(&store.mock, &bucket, "target").await.expect("get"), b"3456");
    }

    #[tokio::test]
    async fn test_should_list_parts_with_pagination() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "listparts").await;
        let upload_id = prepare(&store.mock, &bucket, "k").await;
        for n in [3, 1, 2] {
            upload_part(&store.mock, &bucket, &upload_id, n, vec![0; 4]).await;
        }

        let page = store
            .mock
            .multipart()
            .list_parts(&bucket, &upload_id, None, Some(2))
            .expect("list_parts");
        let numbers: Vec<u32> = page.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(page.is_truncated);
        assert_eq!(page.next_part_number_marker, Some(2));

        let page = store
            .mock
            .multipart()
            .list_parts(&bucket, &upload_id, page.next_part_number_marker, Some(2))
            .expect("list_parts");
        let numbers: Vec<u32> = page.parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![3]);
        assert!(!page.is_truncated);
    }

    #[tokio::test]
    async fn test_should_abort_multipart_upload() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "abort").await;
        let upload_id = prepare(&store.mock, &bucket, "k").await;
        let part = upload_part(&store.mock, &bucket, &upload_id, 1, vec![0; 4]).await;

        store
            .mock
            .multipart()
            .abort(&bucket, &upload_id)
            .await
            .expect("abort_multipart_upload");

        let err = store
            .mock
            .multipart()
            .complete(&bucket, "k", &upload_id, &[CompletedPart::new(1, part.etag)])
            .await
            .expect_err("aborted upload");
        assert_eq!(err.code(), "NoSuchUpload");

        let bucket_dir = std::path::Path::new(&store.mock.config().root).join(&bucket);
        let leftovers = std::fs::read_dir(bucket_dir)
            .expect("read bucket dir")
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .count();
        assert_eq!(leftovers, 0);
        store
            .mock
            .delete_bucket(&bucket)
            .await
            .expect("delete_bucket");
    }

    #[tokio::test]
    async fn test_should_resume_upload_after_restart() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "resume").await;
        put_bytes(&store.mock, &bucket, "k", "old").await.expect("put_object");
        let upload_id = prepare(&store.mock, &bucket, "k").await;
        let part1 = upload_part(&store.mock, &bucket, &upload_id, 1, b"new ".to_vec()).await;

        let store = store.reopen().await;
        let uploads = store
            .mock
            .multipart()
            .list_uploads(Some(&bucket), None)
            .expect("list_multipart_uploads");
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].upload_id, upload_id);

        let part2 = upload_part(&store.mock, &bucket, &upload_id, 2, b"data".to_vec()).await;
        store
            .mock
            .multipart()
            .complete(
                &bucket,
                "k",
                &upload_id,
                &[CompletedPart::new(1, part1.etag), CompletedPart::new(2, part2.etag)],
            )
            .await
            .expect("complete_multipart_upload");

        assert_eq!(get_bytes(&store.mock, &bucket, "k").await.expect("get"), b"new data");
        assert_eq!(store.mock.index().object_count(&bucket).expect("count"), 1);
    }

    #[tokio::test]
    async fn test_should_reject_upload_ids_outside_bucket() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "uploadid").await;
        put_bytes(&store.mock, &bucket, "keep", "kept").await.expect("put_object");

        for upload_id in ["../..", "..", "a/b", ""] {
            let err = store
                .mock
                .multipart()
                .prepare(
                    PrepareUploadRequest::builder()
                        .bucket(&bucket)
                        .key("big")
                        .upload_id(upload_id)
                        .build(),
                )
                .await
                .expect_err("unsafe upload id");
            assert_eq!(err.code(), "InvalidArgument", "{upload_id:?}");
        }
        assert!(!store.mock.multipart().has_uploads(&bucket));

        let upload = store
            .mock
            .multipart()
            .prepare(
                PrepareUploadRequest::builder()
                    .bucket(&bucket)
                    .key("big")
                    .upload_id("client-chosen_1")
                    .build(),
            )
            .await
            .expect("create_multipart_upload");
        assert_eq!(upload.upload_id, "client-chosen_1");
        let part = upload_part(&store.mock, &bucket, &upload.upload_id, 1, b"abc".to_vec()).await;
        store
            .mock
            .multipart()
            .complete(&bucket, "big", &upload.upload_id, &[CompletedPart::new(1, part.etag)])
            .await
            .expect("complete_multipart_upload");

        assert_eq!(get_bytes(&store.mock, &bucket, "keep").await.expect("get keep"), b"kept");
        assert_eq!(get_bytes(&store.mock, &bucket, "big").await.expect("get big"), b"abc");
    }
}
