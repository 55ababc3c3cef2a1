//
//  repo-migrator
//  lib.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Repo Migrator Library
//!
//! Resilient remote-API access for repository migration tooling: the layer
//! between migration logic and the GitHub, Azure DevOps and Bitbucket Server
//! HTTP APIs.
//!
//! ## Overview
//!
//! Every call goes through [`api::ApiClient`], which
//!
//! - retries transient failures with a fixed-delay [`api::RetryPolicy`]
//! - waits out primary (quota) and secondary (abuse) rate limits
//! - shares a pending delay across clones so parallel work backs off together
//!
//! On top of it sit lazy pagination streams, a chunked archive uploader and
//! thin typed clients per service.
//!
//! ## Module Structure
//!
//! - [`api`]: transport, retry, rate limiting, pagination, upload, service clients
//! - [`auth`]: credentials and how they are presented
//! - [`config`]: endpoint URLs and resilience tuning
//! - [`cli`]: the `rmig` command line
//! - [`util`]: text helpers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use repo_migrator::api::github::{github_client, GithubApi, DEFAULT_API_URL, DEFAULT_UPLOADS_URL};
//! use repo_migrator::api::ReqwestTransport;
//! use repo_migrator::auth::AuthCredential;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = github_client(Arc::new(ReqwestTransport::new()?), AuthCredential::github_from_env()?);
//! let github = GithubApi::new(client, DEFAULT_API_URL, DEFAULT_UPLOADS_URL);
//!
//! for repo in github.get_repos("octo-org").await? {
//!     println!("{}", repo.name);
//! }
//! # Ok(())
//! # }
//! ```

/// Command-line interface definitions.
pub mod cli;

/// Remote API access layer.
///
/// Transport abstraction, retry and rate-limit handling, pagination,
/// chunked upload and the per-service clients built on them.
pub mod api;

/// Credentials for the services a migration talks to.
pub mod auth;

/// Configuration file management.
///
/// Stored in platform-specific locations:
/// - Linux: `~/.config/rmig/config.toml`
/// - macOS: `~/Library/Application Support/rmig/config.toml`
/// - Windows: `%APPDATA%\rmig\config.toml`
pub mod config;

/// Utility functions and helpers.
pub mod util;

pub use cli::Cli;
pub use config::Config;

/// Name of the CLI binary, also used for the config directory and User-Agent.
pub const APP_NAME: &str = "rmig";

/// Version derived from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit codes for the CLI.
///
/// # Example
///
/// ```rust,no_run
/// use repo_migrator::exit_codes;
/// use std::process;
///
/// process::exit(exit_codes::RATE_LIMIT);
/// ```
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;

    /// General error. Check stderr for details.
    pub const ERROR: i32 = 1;

    /// Invalid usage or arguments.
    pub const USAGE: i32 = 2;

    /// Credentials missing or rejected.
    ///
    /// Set `GH_PAT`, `ADO_PAT` or `BBS_USERNAME`/`BBS_PASSWORD`.
    pub const AUTH_ERROR: i32 = 4;

    /// Secondary rate limit persisted past the retry ceiling.
    pub const RATE_LIMIT: i32 = 32;
}
