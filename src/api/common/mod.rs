//
//  repo-migrator
//  api/common/mod.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Common API Types for the Migration Clients
//!
//! This module holds what every client in [`crate::api`] shares: the error
//! taxonomy, header and URL plumbing, and the pagination engine.
//!
//! # Error Taxonomy
//!
//! | Category | Variants | Retried? |
//! |----------|----------|----------|
//! | Transient transport | `Transport`, `Http` with 408/429/5xx | Yes, by [`RetryPolicy`](crate::api::RetryPolicy) |
//! | Rate limiting | (absorbed as delays) | Not surfaced unless a ceiling is hit |
//! | Terminal HTTP | `Http`, `UnexpectedStatus`, `AuthFailed`, `SecondaryRateLimitExhausted` | No |
//! | Contract violations | `MissingHeader`, `MissingField`, `GraphQl`, `Json`, `InvalidUrl` | No |
//! | Upload | `Upload` (wraps any of the above with the failed phase) | No |
//!
//! # Example
//!
//! ```rust
//! use repo_migrator::api::common::ApiError;
//!
//! fn describe(result: Result<String, ApiError>) -> String {
//!     match result {
//!         Ok(body) => body,
//!         Err(ApiError::Http { status: 404, .. }) => "not found".to_string(),
//!         Err(e) if e.is_transient() => format!("try again later: {e}"),
//!         Err(e) => format!("failed: {e}"),
//!     }
//! }
//! ```

use thiserror::Error;

mod headers;
mod pagination;

pub use headers::*;
pub use pagination::*;

use super::retry::TRANSIENT_STATUS_CODES;
use super::transport::TransportError;
use super::upload::UploadPhase;

/// Maximum number of characters of a response body kept inside an error.
pub const ERROR_BODY_LIMIT: usize = 1000;

/// Unified error type for every remote-API operation.
///
/// # Notes
///
/// - `Transport` converts automatically from [`TransportError`]
/// - Status-carrying variants expose their code through [`ApiError::status`]
/// - [`ApiError::is_transient`] is the default retry predicate
#[derive(Error, Debug)]
pub enum ApiError {
    /// The exchange never produced an HTTP response.
    #[error("Network error: {0}")]
    Transport(#[from] TransportError),

    /// The server rejected the credentials (HTTP 401).
    ///
    /// Never retried: repeating the call with the same token cannot succeed.
    #[error("Unauthorized. Please check your token and try again ({0})")]
    AuthFailed(String),

    /// A non-2xx response where success was expected.
    ///
    /// # Parameters
    ///
    /// - `status` - The HTTP status code
    /// - `body` - The response body, truncated to [`ERROR_BODY_LIMIT`] characters
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The caller asked for one specific status and got another.
    ///
    /// Used by existence probes, which match on the actual `status`.
    #[error("Expected status code {expected} but got {status}")]
    UnexpectedStatus {
        expected: u16,
        status: u16,
        body: String,
    },

    /// Secondary (abuse-detection) throttling outlasted the retry ceiling.
    #[error("Secondary rate limit exceeded. Maximum retries ({max_retries}) reached. Please wait before retrying your request.")]
    SecondaryRateLimitExhausted { max_retries: u32 },

    /// A header the protocol depends on was absent.
    #[error("{0} header is missing from the response")]
    MissingHeader(String),

    /// A caller-supplied JSON path did not resolve in the response.
    #[error("Response is missing the expected field `{path}`")]
    MissingField { path: String },

    /// The GraphQL endpoint answered 200 with an `errors` array.
    #[error("GraphQL error: {message}")]
    GraphQl { message: String },

    /// A multipart upload failed; `phase` says where.
    #[error("Multipart upload failed during {phase}")]
    Upload {
        phase: UploadPhase,
        #[source]
        source: Box<ApiError>,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Builds the error for a response that did not have the expected status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = crate::util::truncate(body, ERROR_BODY_LIMIT);
        if status == 401 {
            ApiError::AuthFailed(body)
        } else {
            ApiError::Http { status, body }
        }
    }

    /// The HTTP status behind this error, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } | ApiError::UnexpectedStatus { status, .. } => {
                Some(*status)
            }
            ApiError::AuthFailed(_) => Some(401),
            ApiError::Upload { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Transport failures and the statuses in [`TRANSIENT_STATUS_CODES`] are
    /// transient; everything else, including upload failures, is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Http { status, .. } => TRANSIENT_STATUS_CODES.contains(status),
            _ => false,
        }
    }

    /// Wraps this error with the upload phase it happened in.
    pub fn in_upload_phase(self, phase: UploadPhase) -> Self {
        ApiError::Upload {
            phase,
            source: Box::new(self),
        }
    }
}
