//
//  repo-migrator
//  api/mod.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # API Access Layer
//!
//! Resilient HTTP access to the services a migration reads from and writes to.
//!
//! ## Architecture
//!
//! ```text
//! GithubApi / AdoApi / BbsApi        typed calls: URLs, payloads, response shapes
//!            │
//!        ApiClient                   rate-limit state machine + RetryPolicy
//!     ┌──────┴───────┐
//!  pagination     ArchiveUploader    page walks / multipart uploads
//!     └──────┬───────┘
//!      HttpTransport                 reqwest in production, in-memory in tests
//! ```
//!
//! - [`transport`]: the wire boundary
//! - [`retry`]: retry an operation under a failure predicate
//! - [`rate_limit`]: throttle detection tables, back-off, shared pending delay
//! - [`client`]: [`ApiClient`]
//! - [`common`]: error taxonomy, header helpers, pagination engine
//! - [`upload`]: chunked archive upload
//! - [`github`], [`ado`], [`bbs`]: service clients
//!
//! ## Error Handling
//!
//! Everything returns [`ApiError`]. Rate limiting is absorbed as waiting and
//! only surfaces when a ceiling is hit.

pub mod ado;
pub mod bbs;
pub mod client;
pub mod common;
pub mod github;
pub mod rate_limit;
pub mod retry;
pub mod transport;
pub mod upload;

pub use client::{ApiClient, ExpectedStatus};
pub use common::{ApiError, PageCursor};
pub use rate_limit::{Clock, PendingDelay, RateLimitRules, RateLimitState, SecondaryBackoff, SystemClock};
pub use retry::RetryPolicy;
pub use transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use upload::{ArchiveUploader, UploadPhase, UploadSession};
