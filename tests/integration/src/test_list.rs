//! Listing integration tests.

#[cfg(test)]
mod tests {
    use s3mock_core::S3Mock;
    use s3mock_core::list::{ListObjectsRequest, ListObjectsV2Request};

    use crate::{TestStore, create_test_bucket, put_bytes};

    const KEYS: [&str; 8] = ["a", "b", "b/1", "b/1/1", "b/1/2", "b/2", "c/1", "c/1/1"];

    async fn seeded(store: &TestStore) -> String {
        let bucket = create_test_bucket(&store.mock, "list").await;
        for key in KEYS {
            put_bytes(&store.mock, &bucket, key, key)
                .await
                .unwrap_or_else(|e| panic!("failed to put {key}: {e}"));
        }
        bucket
    }

    async fn all_v2_pages(mock: &S3Mock, bucket: &str, delimiter: Option<&str>, page: i32) -> (Vec<String>, Vec<String>) {
        let mut keys = Vec::new();
        let mut prefixes = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut request = ListObjectsV2Request::builder()
                .bucket(bucket)
                .max_keys(page)
                .build();
            request.delimiter = delimiter.map(ToOwned::to_owned);
            request.continuation_token = token.take();

            let resp = mock.list_objects_v2(request).await.expect("list_objects_v2");
            assert!(resp.key_count <= usize::try_from(page).expect("page size"));
            keys.extend(resp.contents.into_iter().map(|o| o.key));
            prefixes.extend(resp.common_prefixes);
            if !resp.is_truncated {
                break;
            }
            token = resp.next_continuation_token;
            assert!(token.is_some(), "truncated page without token");
        }
        (keys, prefixes)
    }

    #[tokio::test]
    async fn test_should_group_common_prefixes() {
        let store = TestStore::open().await;
        let bucket = seeded(&store).await;

        let resp = store
            .mock
            .list_objects_v2(
                ListObjectsV2Request::builder()
                    .bucket(&bucket)
                    .delimiter("/")
                    .build(),
            )
            .await
            .expect("list_objects_v2");
        let keys: Vec<&str> = resp.contents.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(resp.common_prefixes, vec!["b/", "c/"]);
        assert_eq!(resp.key_count, 4);
        assert_eq!(resp.max_keys, 1000);
        assert!(!resp.is_truncated);

        let resp = store
            .mock
            .list_objects_v2(
                ListObjectsV2Request::builder()
                    .bucket(&bucket)
                    .prefix("b/")
                    .delimiter("/")
                    .build(),
            )
            .await
            .expect("list_objects_v2 with prefix");
        let keys: Vec<&str> = resp.contents.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["b/1", "b/2"]);
        assert_eq!(resp.common_prefixes, vec!["b/1/"]);
        assert_eq!(resp.prefix.as_deref(), Some("b/"));
    }

    #[tokio::test]
    async fn test_should_paginate_v2_without_gaps_or_duplicates() {
        let store = TestStore::open().await;
        let bucket = seeded(&store).await;

        for page in 1..=4 {
            let (keys, prefixes) = all_v2_pages(&store.mock, &bucket, None, page).await;
            assert_eq!(keys, KEYS.to_vec(), "page size {page}");
            assert!(prefixes.is_empty());

            let (keys, prefixes) = all_v2_pages(&store.mock, &bucket, Some("/"), page).await;
            assert_eq!(keys, vec!["a", "b"], "page size {page}");
            assert_eq!(prefixes, vec!["b/", "c/"], "page size {page}");
        }
    }

    #[tokio::test]
    async fn test_should_paginate_v1_with_markers() {
        let store = TestStore::open().await;
        let bucket = seeded(&store).await;

        let mut marker: Option<String> = None;
        let mut keys = Vec::new();
        let mut pages = 0;
        loop {
            let mut request = ListObjectsRequest::builder()
                .bucket(&bucket)
                .max_keys(3)
                .build();
            request.marker = marker.take();
            let resp = store.mock.list_objects(request).await.expect("list_objects");
            pages += 1;
            assert!(resp.contents.iter().all(|o| o.owner.is_some()));
            keys.extend(resp.contents.into_iter().map(|o| o.key));
            if !resp.is_truncated {
                assert!(resp.next_marker.is_none());
                break;
            }
            marker = resp.next_marker;
        }
        assert_eq!(pages, 3);
        assert_eq!(keys, KEYS.to_vec());
    }

    #[tokio::test]
    async fn test_should_honour_zero_and_negative_max_keys() {
        let store = TestStore::open().await;
        let bucket = seeded(&store).await;

        let resp = store
            .mock
            .list_objects_v2(
                ListObjectsV2Request::builder()
                    .bucket(&bucket)
                    .max_keys(0)
                    .build(),
            )
            .await
            .expect("list_objects_v2");
        assert_eq!(resp.key_count, 0);
        assert!(resp.contents.is_empty());

        let resp = store
            .mock
            .list_objects(
                ListObjectsRequest::builder()
                    .bucket(&bucket)
                    .max_keys(-1)
                    .build(),
            )
            .await
            .expect("list_objects");
        assert_eq!(resp.max_keys, 1000);
        assert_eq!(resp.contents.len(), KEYS.len());
    }

    #[tokio::test]
    async fn test_should_start_after_key() {
        let store = TestStore::open().await;
        let bucket = seeded(&store).await;

        let resp = store
            .mock
            .list_objects_v2(
                ListObjectsV2Request::builder()
                    .bucket(&bucket)
                    .start_after("b/1/2")
                    .fetch_owner(true)
                    .build(),
            )
            .await
            .expect("list_objects_v2");
        let keys: Vec<&str> = resp.contents.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["b/2", "c/1", "c/1/1"]);
        assert_eq!(resp.start_after.as_deref(), Some("b/1/2"));
        assert!(resp.contents.iter().all(|o| o.owner.is_some()));
    }

    #[tokio::test]
    async fn test_should_reflect_writes_and_deletes() {
        let store = TestStore::open().await;
        let bucket = seeded(&store).await;
        store
            .mock
            .objects()
            .delete(&bucket, "b/2")
            .await
            .expect("delete_object");
        put_bytes(&store.mock, &bucket, "d", "new")
            .await
            .expect("put_object");

        let store = store.reopen().await;
        let (keys, _) = all_v2_pages(&store.mock, &bucket, None, 1000).await;
        assert_eq!(keys, vec!["a", "b", "b/1", "b/1/1", "b/1/2", "c/1", "c/1/1", "d"]);
    }

    #[tokio::test]
    async fn test_should_url_encode_listing() {
        let store = TestStore::open().await;
        let bucket = create_test_bucket(&store.mock, "encode").await;
        put_bytes(&store.mock, &bucket, "photos/summer 2024/a+b.jpg", "x")
            .await
            .expect("put_object");

        let resp = store
            .mock
            .list_objects_v2(
                ListObjectsV2Request::builder()
                    .bucket(&bucket)
                    .prefix("photos/")
                    .delimiter("/")
                    .encoding_type("url")
                    .build(),
            )
            .await
            .expect("list_objects_v2");
        assert_eq!(resp.common_prefixes, vec!["photos/summer%202024/"]);

        let resp = store
            .mock
            .list_objects_v2(
                ListObjectsV2Request::builder()
                    .bucket(&bucket)
                    .encoding_type("url")
                    .build(),
            )
            .await
            .expect("list_objects_v2");
        assert_eq!(resp.contents[0].key, "photos/summer%202024/a%2Bb.jpg");

        let err = store
            .mock
            .list_objects_v2(
                ListObjectsV2Request::builder()
                    .bucket(&bucket)
                    .encoding_type("gzip")
                    .build(),
            )
            .await
            .expect_err("invalid encoding type");
        assert_eq!(err.code(), "InvalidRequest");
    }
}
