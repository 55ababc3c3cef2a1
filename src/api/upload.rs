//
//  repo-migrator
//  api/upload.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Archive Upload to GitHub-Owned Storage
//!
//! Small archives go up in one POST. Anything larger than the part size uses
//! the three-step multipart protocol, where every step hands back the URL of
//! the next one in its `Location` header:
//!
//! ```text
//! POST  {uploads}/organizations/{org}/gei/archive/blobs/uploads   {content_type, name, size}
//!   -> 202 Location: ...?guid=...&part_number=1
//! PATCH <location>   part 1 bytes   -> Location: ...&part_number=2
//! PATCH <location>   part 2 bytes   -> Location: ...
//! PUT   <location>   (empty)        -> {"uri": "gei://archive/..."}
//! ```
//!
//! Each step is retried in place for transient failures. The session itself is
//! never restarted: re-running the start step after parts were sent would open
//! a second session. Any failure is returned as [`ApiError::Upload`] naming the
//! [`UploadPhase`]; the caller restarts from scratch.
//!
//! Memory use is bounded by one part: each part is read into a single
//! `BytesMut`, split off as the request body and, once that request is gone,
//! the same allocation is reclaimed for the next part.

use bytes::{Bytes, BytesMut};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

use super::client::{parse_json_body, ApiClient};
use super::common::{escape, ApiError, LOCATION_HEADER};
use super::transport::{HttpMethod, HttpRequest, HttpResponse};

pub const BYTES_PER_MEBIBYTE: u64 = 1024 * 1024;

/// Smallest part size accepted from configuration.
pub const MIN_MULTIPART_MEBIBYTES: u64 = 5;

pub const DEFAULT_MULTIPART_MEBIBYTES: u64 = 100;

/// Largest part size accepted from configuration. One part is held in memory.
pub const MAX_MULTIPART_MEBIBYTES: u64 = 1024;

const OCTET_STREAM: &str = "application/octet-stream";

/// Step of the multipart protocol an upload failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Start,
    UploadPart,
    Complete,
}

impl std::fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UploadPhase::Start => "start",
            UploadPhase::UploadPart => "upload part",
            UploadPhase::Complete => "complete",
        })
    }
}

/// Progress of one multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    /// `guid` issued by the start step, when the server includes one.
    pub upload_id: Option<String>,
    pub next_url: Url,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Parts sent so far.
    pub part_index: u64,
    pub total_parts: u64,
}

impl UploadSession {
    pub fn new(next_url: Url, total_bytes: u64, part_size: u64) -> Self {
        let upload_id = next_url
            .query_pairs()
            .find(|(key, _)| key == "guid")
            .map(|(_, value)| value.into_owned());

        Self {
            upload_id,
            next_url,
            bytes_transferred: 0,
            total_bytes,
            part_index: 0,
            total_parts: total_bytes.div_ceil(part_size.max(1)),
        }
    }

    fn advance(&mut self, next_url: Url, part_len: u64) {
        self.next_url = next_url;
        self.bytes_transferred += part_len;
        self.part_index += 1;
    }
}

/// Uploads migration archives for an organization.
///
/// # Example
///
/// ```rust,no_run
/// use repo_migrator::api::{ApiClient, ArchiveUploader};
///
/// # async fn example(client: ApiClient) -> Result<(), repo_migrator::api::ApiError> {
/// let file = tokio::fs::File::open("migration_archive.tar.gz").await?;
/// let length = file.metadata().await?.len();
///
/// let uploader = ArchiveUploader::new(client, "https://uploads.github.com")?;
/// let uri = uploader.upload(file, length, "migration_archive.tar.gz", "12345").await?;
/// println!("{uri}");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ArchiveUploader {
    client: ApiClient,
    uploads_url: Url,
    part_size: u64,
}

impl ArchiveUploader {
    pub fn new(client: ApiClient, uploads_url: &str) -> Result<Self, ApiError> {
        Ok(Self {
            client,
            uploads_url: Url::parse(uploads_url)?,
            part_size: DEFAULT_MULTIPART_MEBIBYTES * BYTES_PER_MEBIBYTE,
        })
    }

    /// Sets the multipart threshold and part size, in bytes.
    pub fn with_part_size(mut self, bytes: u64) -> Self {
        self.part_size = bytes.max(1);
        self
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Uploads `length` bytes of `archive` and returns the archive URI.
    ///
    /// # Parameters
    ///
    /// * `archive` - Archive contents; at most `length` bytes are read
    /// * `length` - Total size, which picks single-shot or multipart
    /// * `name` - Archive file name
    /// * `org_database_id` - Database id of the owning organization
    pub async fn upload<R>(
        &self,
        archive: R,
        length: u64,
        name: &str,
        org_database_id: &str,
    ) -> Result<String, ApiError>
    where
        R: AsyncRead + Unpin,
    {
        let base = self.uploads_url.as_str().trim_end_matches('/');
        let org = escape(org_database_id);
        let archive = archive.take(length);

        if length <= self.part_size {
            let url = format!("{base}/organizations/{org}/gei/archive?name={}", escape(name));
            return self.upload_single(archive, length, &url).await;
        }

        let url = format!("{base}/organizations/{org}/gei/archive/blobs/uploads");
        self.upload_multipart(archive, length, name, &url).await
    }

    async fn upload_single<R>(&self, mut archive: R, length: u64, url: &str) -> Result<String, ApiError>
    where
        R: AsyncRead + Unpin,
    {
        let mut content = Vec::with_capacity(usize::try_from(length).unwrap_or_default());
        archive.read_to_end(&mut content).await?;

        let request = HttpRequest::new(HttpMethod::Post, url).bytes(Bytes::from(content), OCTET_STREAM);
        let response = self.send_retrying(&request).await?;
        archive_uri(&response)
    }

    async fn upload_multipart<R>(
        &self,
        mut archive: R,
        length: u64,
        name: &str,
        url: &str,
    ) -> Result<String, ApiError>
    where
        R: AsyncRead + Unpin,
    {
        let mut session = self
            .start(url, name, length)
            .await
            .map_err(|e| e.in_upload_phase(UploadPhase::Start))?;

        let part_size = usize::try_from(self.part_size).unwrap_or(usize::MAX);
        let mut buffer = BytesMut::with_capacity(part_size);
        loop {
            // Reclaims the previous part's allocation once its request is dropped.
            buffer.reserve(part_size);
            let filled = fill_part(&mut archive, &mut buffer, part_size)
                .await
                .map_err(|e| ApiError::from(e).in_upload_phase(UploadPhase::UploadPart))?;
            if filled == 0 {
                break;
            }

            self.upload_part(&mut session, buffer.split().freeze())
                .await
                .map_err(|e| e.in_upload_phase(UploadPhase::UploadPart))?;
        }

        let uri = self
            .complete(&session)
            .await
            .map_err(|e| e.in_upload_phase(UploadPhase::Complete))?;

        tracing::info!("Finished uploading archive");
        Ok(uri)
    }

    async fn start(&self, url: &str, name: &str, length: u64) -> Result<UploadSession, ApiError> {
        tracing::info!("Starting archive upload into GitHub owned storage: {}...", name);

        let body = json!({
            "content_type": OCTET_STREAM,
            "name": name,
            "size": length,
        });
        let request = HttpRequest::new(HttpMethod::Post, url).json(&body)?;
        let response = self.send_retrying(&request).await?;

        let session = UploadSession::new(self.next_url(&response)?, length, self.part_size);
        tracing::debug!(
            "Upload session {} opened for {} parts",
            session.upload_id.as_deref().unwrap_or("(no guid)"),
            session.total_parts
        );
        Ok(session)
    }

    async fn upload_part(&self, session: &mut UploadSession, part: Bytes) -> Result<(), ApiError> {
        tracing::info!("Uploading part {}/{}...", session.part_index + 1, session.total_parts);

        let part_len = part.len() as u64;
        let request = HttpRequest::new(HttpMethod::Patch, session.next_url.as_str()).bytes(part, OCTET_STREAM);
        let response = self.send_retrying(&request).await?;

        session.advance(self.next_url(&response)?, part_len);
        Ok(())
    }

    async fn complete(&self, session: &UploadSession) -> Result<String, ApiError> {
        let request = HttpRequest::new(HttpMethod::Put, session.next_url.as_str()).bytes(Bytes::new(), OCTET_STREAM);
        let response = self.send_retrying(&request).await?;
        archive_uri(&response)
    }

    async fn send_retrying(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        self.client
            .retry_policy()
            .retry(|| {
                let request = request.clone();
                async move { self.client.execute(request).await }
            })
            .await
    }

    /// Resolves the `Location` header against the uploads base URL.
    fn next_url(&self, response: &HttpResponse) -> Result<Url, ApiError> {
        let location = response
            .header(LOCATION_HEADER)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ApiError::MissingHeader(LOCATION_HEADER.to_string()))?;
        Ok(self.uploads_url.join(location)?)
    }
}

fn archive_uri(response: &HttpResponse) -> Result<String, ApiError> {
    parse_json_body(response)?
        .get("uri")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::MissingField {
            path: "/uri".to_string(),
        })
}

/// Appends up to `part_size` bytes to the empty `buffer`, stopping early only
/// when the reader is exhausted.
async fn fill_part<R>(reader: &mut R, buffer: &mut BytesMut, part_size: usize) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    while buffer.len() < part_size {
        // `read_buf` only writes into spare capacity, which `reserve` sized to one part.
        let read = reader.read_buf(buffer).await?;
        if read == 0 {
            break;
        }
    }
    Ok(buffer.len())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api::rate_limit::RateLimitRules;
    use crate::api::retry::RetryPolicy;
    use crate::api::transport::{MockTransport, RequestBody, TransportError};

    const UPLOADS: &str = "https://uploads.test";

    fn part_number(request: &HttpRequest) -> u64 {
        Url::parse(&request.url)
            .ok()
            .and_then(|url| {
                url.query_pairs()
                    .find(|(key, _)| key == "part_number")
                    .and_then(|(_, value)| value.parse().ok())
            })
            .unwrap_or(0)
    }

    fn location(part: u64) -> String {
        format!("/organizations/42/gei/archive/blobs/uploads?part_number={part}&guid=abc-123")
    }

    /// Well-behaved storage service; `fail` can override any request.
    fn storage<F>(fail: F) -> MockTransport
    where
        F: Fn(&HttpRequest) -> Option<Result<HttpResponse, TransportError>> + Send + Sync + 'static,
    {
        MockTransport::with_handler(move |request| {
            if let Some(result) = fail(request) {
                return result;
            }
            Ok(match request.method {
                HttpMethod::Post if request.url.ends_with("/blobs/uploads") => {
                    HttpResponse::new(202, "").with_header("Location", location(1))
                }
                HttpMethod::Post => HttpResponse::new(200, r#"{"uri":"gei://archive/single"}"#),
                HttpMethod::Patch => HttpResponse::new(202, "")
                    .with_header("Location", location(part_number(request) + 1)),
                HttpMethod::Put => HttpResponse::new(201, r#"{"uri":"gei://archive/abc-123"}"#),
                _ => HttpResponse::new(405, ""),
            })
        })
    }

    fn uploader(transport: &MockTransport, retries: usize) -> ArchiveUploader {
        let client = ApiClient::new(Arc::new(transport.clone()), RateLimitRules::GITHUB)
            .with_retry_policy(RetryPolicy::immediate(retries));
        ArchiveUploader::new(client, UPLOADS).unwrap().with_part_size(100)
    }

    fn archive(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn sizes_of(transport: &MockTransport, method: HttpMethod) -> Vec<usize> {
        transport
            .requests()
            .iter()
            .filter(|r| r.method == method)
            .map(|r| r.body.as_ref().map_or(0, |b| b.len()))
            .collect()
    }

    #[tokio::test]
    async fn test_multipart_upload_sends_three_parts_then_completes() {
        let transport = storage(|_| None);
        let data = archive(250);

        let uri = uploader(&transport, 0)
            .upload(data.as_slice(), 250, "archive.tar.gz", "42")
            .await
            .unwrap();

        assert_eq!(uri, "gei://archive/abc-123");
        assert_eq!(sizes_of(&transport, HttpMethod::Patch), vec![100, 100, 50]);
        assert_eq!(sizes_of(&transport, HttpMethod::Put), vec![0]);

        let requests = transport.requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[0].url, "https://uploads.test/organizations/42/gei/archive/blobs/uploads");
        let start: Value = serde_json::from_slice(&requests[0].body.clone().unwrap().into_bytes()).unwrap();
        assert_eq!(start, json!({ "content_type": OCTET_STREAM, "name": "archive.tar.gz", "size": 250 }));

        let parts: Vec<u64> = requests[1..4].iter().map(part_number).collect();
        assert_eq!(parts, vec![1, 2, 3]);
        assert_eq!(part_number(&requests[4]), 4);

        let sent: Vec<u8> = requests[1..4]
            .iter()
            .flat_map(|r| r.body.clone().unwrap().into_bytes().to_vec())
            .collect();
        assert_eq!(sent, data);
    }

    /// Storage that records where each part's bytes live and keeps nothing.
    #[derive(Default)]
    struct PartAddresses {
        parts: std::sync::Mutex<Vec<(usize, usize)>>,
    }

    #[async_trait::async_trait]
    impl crate::api::transport::HttpTransport for PartAddresses {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Ok(match request.method {
                HttpMethod::Post => HttpResponse::new(202, "").with_header("Location", location(1)),
                HttpMethod::Patch => {
                    if let Some(RequestBody::Binary { content, .. }) = &request.body {
                        self.parts.lock().unwrap().push((content.as_ptr() as usize, content.len()));
                    }
                    HttpResponse::new(202, "").with_header("Location", location(part_number(&request) + 1))
                }
                _ => HttpResponse::new(201, r#"{"uri":"gei://archive/abc-123"}"#),
            })
        }
    }

    #[tokio::test]
    async fn test_parts_reuse_one_allocation() {
        let transport = Arc::new(PartAddresses::default());
        let client = ApiClient::new(transport.clone(), RateLimitRules::GITHUB).with_retry_policy(RetryPolicy::none());
        let uploader = ArchiveUploader::new(client, UPLOADS).unwrap().with_part_size(100);
        let data = archive(350);

        uploader
            .upload(data.as_slice(), 350, "archive.tar.gz", "42")
            .await
            .unwrap();

        let parts = transport.parts.lock().unwrap().clone();
        let sizes: Vec<usize> = parts.iter().map(|(_, len)| *len).collect();
        assert_eq!(sizes, vec![100, 100, 100, 50]);
        assert!(parts.iter().all(|(addr, _)| *addr == parts[0].0), "parts at {parts:?}");
    }

    #[tokio::test]
    async fn test_small_archive_is_uploaded_in_one_request() {
        let transport = storage(|_| None);

        let uri = uploader(&transport, 0)
            .upload(archive(50).as_slice(), 50, "my archive.tar.gz", "42")
            .await
            .unwrap();

        assert_eq!(uri, "gei://archive/single");
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].url,
            "https://uploads.test/organizations/42/gei/archive?name=my%20archive.tar.gz"
        );
        assert!(sizes_of(&transport, HttpMethod::Patch).is_empty());
    }

    #[tokio::test]
    async fn test_archive_of_exactly_part_size_is_single_shot() {
        let transport = storage(|_| None);

        uploader(&transport, 0)
            .upload(archive(100).as_slice(), 100, "a.tar.gz", "42")
            .await
            .unwrap();

        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_on_second_part_names_phase_and_skips_complete() {
        let transport = storage(|request| {
            (request.method == HttpMethod::Patch && part_number(request) == 2).then(|| {
                Err(TransportError::Request {
                    url: request.url.clone(),
                    message: "connection reset by peer".to_string(),
                })
            })
        });

        let err = uploader(&transport, 0)
            .upload(archive(250).as_slice(), 250, "archive.tar.gz", "42")
            .await
            .unwrap_err();

        match &err {
            ApiError::Upload { phase, source } => {
                assert_eq!(*phase, UploadPhase::UploadPart);
                assert!(matches!(**source, ApiError::Transport(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.to_string(), "Multipart upload failed during upload part");
        assert!(sizes_of(&transport, HttpMethod::Put).is_empty());
    }

    #[tokio::test]
    async fn test_transient_part_failure_is_retried_in_place() {
        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let transport = storage(move |request| {
            (request.method == HttpMethod::Patch
                && part_number(request) == 2
                && attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0)
                .then(|| Ok(HttpResponse::new(502, "Bad Gateway")))
        });

        let uri = uploader(&transport, 2)
            .upload(archive(250).as_slice(), 250, "archive.tar.gz", "42")
            .await
            .unwrap();

        assert_eq!(uri, "gei://archive/abc-123");
        assert_eq!(sizes_of(&transport, HttpMethod::Patch), vec![100, 100, 100, 50]);
        assert_eq!(transport.requests().iter().filter(|r| r.method == HttpMethod::Post).count(), 1);
    }

    #[tokio::test]
    async fn test_missing_location_fails_start() {
        let transport = storage(|request| {
            (request.method == HttpMethod::Post).then(|| Ok(HttpResponse::new(202, "")))
        });

        let err = uploader(&transport, 0)
            .upload(archive(250).as_slice(), 250, "archive.tar.gz", "42")
            .await
            .unwrap_err();

        match err {
            ApiError::Upload { phase, source } => {
                assert_eq!(phase, UploadPhase::Start);
                assert_eq!(source.to_string(), "Location header is missing from the response");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_complete_without_uri_fails_complete() {
        let transport = storage(|request| {
            (request.method == HttpMethod::Put).then(|| Ok(HttpResponse::new(201, "{}")))
        });

        let err = uploader(&transport, 0)
            .upload(archive(150).as_slice(), 150, "archive.tar.gz", "42")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Upload { phase: UploadPhase::Complete, .. }));
    }

    #[test]
    fn test_session_tracks_guid_and_parts() {
        let url = Url::parse("https://uploads.test/x?part_number=1&guid=g-1").unwrap();
        let mut session = UploadSession::new(url.clone(), 250, 100);

        assert_eq!(session.upload_id.as_deref(), Some("g-1"));
        assert_eq!(session.total_parts, 3);

        session.advance(url, 100);
        assert_eq!(session.part_index, 1);
        assert_eq!(session.bytes_transferred, 100);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(UploadPhase::Start.to_string(), "start");
        assert_eq!(UploadPhase::UploadPart.to_string(), "upload part");
        assert_eq!(UploadPhase::Complete.to_string(), "complete");
    }
}
