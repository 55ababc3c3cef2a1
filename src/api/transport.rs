//
//  repo-migrator
//  api/transport.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Transport Boundary
//!
//! Every byte this crate puts on the wire goes through [`HttpTransport`]. The
//! rate-limit state machine, the pagination engine and the upload protocol only
//! ever see [`HttpRequest`] and [`HttpResponse`] values, which keeps all of them
//! testable without sockets.
//!
//! ## Implementations
//!
//! - [`ReqwestTransport`]: the real HTTP(S) transport used by the `rmig` binary
//! - `MockTransport` (tests only): scripted or handler-driven responses with
//!   every request recorded for later assertions

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use super::common::header_value;

/// Header collection as ordered name/value pairs.
///
/// Names keep the casing they arrived with; lookups go through
/// [`header_value`], which compares case-insensitively.
pub type Headers = Vec<(String, String)>;

/// HTTP methods used by the migration APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Parses a method name case-insensitively (`"get"`, `"PATCH"`, ...).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload attached to a request.
///
/// JSON bodies are kept as text so they can be logged; binary bodies are only
/// ever logged as `BLOB`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(String),
    Binary { content: Bytes, content_type: String },
}

impl RequestBody {
    pub fn content_type(&self) -> &str {
        match self {
            RequestBody::Json(_) => "application/json",
            RequestBody::Binary { content_type, .. } => content_type,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            RequestBody::Json(text) => Bytes::from(text),
            RequestBody::Binary { content, .. } => content,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RequestBody::Json(text) => text.len(),
            RequestBody::Binary { content, .. } => content.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single logical HTTP request.
///
/// Requests are cheap to clone (binary bodies are reference counted), which is
/// what lets the retry and rate-limit layers resend them unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// Adds a header, replacing any existing header with the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    /// Attaches a JSON body serialized from `body`.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, serde_json::Error> {
        self.body = Some(RequestBody::Json(serde_json::to_string(body)?));
        Ok(self)
    }

    /// Attaches a binary body with the given content type.
    pub fn bytes(mut self, content: Bytes, content_type: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Binary {
            content,
            content_type: content_type.into(),
        });
        self
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Failures below HTTP semantics: connection refused, TLS, timeouts, truncated
/// bodies. These never carry a status code.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("no response available for {method} {url}")]
    NoResponse { method: HttpMethod, url: String },
}

/// Sends one request and returns the complete response.
///
/// Implementations must not interpret status codes; a 500 is a successful
/// exchange at this level.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// HTTP(S) transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a transport whose requests carry `rmig/<version>` as User-Agent.
    pub fn new() -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()
            .map_err(|e| TransportError::Request {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { http })
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let url = request.url;
        let mut builder = self.http.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, body.content_type().to_string())
                .body(body.into_bytes());
        }

        let failed = |e: reqwest::Error| TransportError::Request {
            url: url.clone(),
            message: e.to_string(),
        };

        let response = builder.send().await.map_err(failed)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let body = response.bytes().await.map_err(failed)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
pub use mock::MockTransport;
