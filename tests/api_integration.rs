//
//  repo-migrator
//  tests/api_integration.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! End-to-end checks of the client over real HTTP against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use mockito::Matcher;
use serde_json::Value;

use repo_migrator::api::github::{github_client, GithubApi};
use repo_migrator::api::{ApiClient, ApiError, ReqwestTransport, RetryPolicy, SecondaryBackoff};
use repo_migrator::auth::AuthCredential;

fn client() -> ApiClient {
    let transport = ReqwestTransport::new().unwrap();
    github_client(Arc::new(transport), AuthCredential::bearer("test-token"))
        .with_retry_policy(RetryPolicy::immediate(2))
        .with_secondary_backoff(SecondaryBackoff {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries: 3,
            max_jitter: Duration::ZERO,
        })
}

#[tokio::test]
async fn test_link_header_pagination() {
    let mut server = mockito::Server::new_async().await;
    let next = format!(r#"<{}/items/page2>; rel="next", <{}/items/page2>; rel="last""#, server.url(), server.url());

    let first = server
        .mock("GET", "/items")
        .match_header("authorization", "Bearer test-token")
        .with_status(200)
        .with_header("Link", &next)
        .with_body(r#"[{"id":1},{"id":2}]"#)
        .expect(1)
        .create_async()
        .await;
    let second = server
        .mock("GET", "/items/page2")
        .with_status(200)
        .with_body(r#"[{"id":3}]"#)
        .expect(1)
        .create_async()
        .await;

    let client = client();
    let url = format!("{}/items", server.url());
    let items: Vec<Value> = client.get_all(&url, "").try_collect().await.unwrap();

    let ids: Vec<i64> = items.iter().filter_map(|item| item["id"].as_i64()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    first.assert_async().await;
    second.assert_async().await;
}

#[tokio::test]
async fn test_secondary_rate_limit_gives_up_after_ceiling() {
    let mut server = mockito::Server::new_async().await;
    let limited = server
        .mock("GET", "/orgs/octo")
        .with_status(403)
        .with_body(r#"{"message":"You have exceeded a secondary rate limit."}"#)
        .expect(4)
        .create_async()
        .await;

    let client = client();
    let err = client
        .execute(repo_migrator::api::HttpRequest::get(format!("{}/orgs/octo", server.url())))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::SecondaryRateLimitExhausted { max_retries: 3 }));
    limited.assert_async().await;
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let denied = server
        .mock("GET", "/user")
        .with_status(401)
        .with_body("Bad credentials")
        .expect(1)
        .create_async()
        .await;

    let err = client().get(&format!("{}/user", server.url())).await.unwrap_err();

    assert!(matches!(err, ApiError::AuthFailed(_)));
    denied.assert_async().await;
}

#[tokio::test]
async fn test_single_shot_upload() {
    let mut server = mockito::Server::new_async().await;
    let upload = server
        .mock("POST", Matcher::Regex(r"^/organizations/42/gei/archive".to_string()))
        .match_query(Matcher::Any)
        .match_header("content-type", "application/octet-stream")
        .match_body("small archive")
        .with_status(200)
        .with_body(r#"{"uri":"gei://archive/1"}"#)
        .expect(1)
        .create_async()
        .await;

    let api = GithubApi::new(client(), &server.url(), &server.url());
    let archive: &[u8] = b"small archive";
    let uri = api
        .archive_uploader()
        .unwrap()
        .upload(archive, archive.len() as u64, "migration.tar.gz", "42")
        .await
        .unwrap();

    assert_eq!(uri, "gei://archive/1");
    upload.assert_async().await;
}

#[tokio::test]
async fn test_multipart_upload() {
    let mut server = mockito::Server::new_async().await;
    let uploads_path = r"^/organizations/42/gei/archive/blobs/uploads";

    let start = server
        .mock("POST", Matcher::Regex(uploads_path.to_string()))
        .match_query(Matcher::Any)
        .with_status(202)
        .with_header(
            "Location",
            "/organizations/42/gei/archive/blobs/uploads?part_number=1&guid=g-1",
        )
        .expect(1)
        .create_async()
        .await;
    let parts = server
        .mock("PATCH", Matcher::Regex(uploads_path.to_string()))
        .match_query(Matcher::Any)
        .with_status(202)
        .with_header(
            "Location",
            "/organizations/42/gei/archive/blobs/uploads?part_number=2&guid=g-1",
        )
        .expect(3)
        .create_async()
        .await;
    let complete = server
        .mock("PUT", Matcher::Regex(uploads_path.to_string()))
        .match_query(Matcher::Any)
        .with_status(201)
        .with_body(r#"{"uri":"gei://archive/2"}"#)
        .expect(1)
        .create_async()
        .await;

    let api = GithubApi::new(client(), &server.url(), &server.url());
    let archive: &[u8] = b"0123456789ab";
    let uri = api
        .archive_uploader()
        .unwrap()
        .with_part_size(5)
        .upload(archive, archive.len() as u64, "migration.tar.gz", "42")
        .await
        .unwrap();

    assert_eq!(uri, "gei://archive/2");
    start.assert_async().await;
    parts.assert_async().await;
    complete.assert_async().await;
}
