//
//  repo-migrator
//  auth/mod.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Authentication Module
//!
//! Credentials for the three services a migration talks to, and how each
//! becomes an `Authorization` header.
//!
//! ## Supported Credentials
//!
//! | Service | Variant | Header |
//! |---------|---------|--------|
//! | GitHub | [`AuthCredential::Bearer`] | `Bearer <token>` |
//! | Azure DevOps | [`AuthCredential::AdoPat`] | `Basic base64(":" + pat)` |
//! | Bitbucket Server | [`AuthCredential::Basic`] | `Basic base64(user + ":" + password)` |
//!
//! Secrets are read from the environment by [`AuthCredential::github_from_env`]
//! and friends. This module never logs them.
//!
//! ## Example
//!
//! ```rust
//! use repo_migrator::auth::AuthCredential;
//!
//! let credential = AuthCredential::bearer("ghp_example");
//! assert_eq!(credential.authorization_header(), "Bearer ghp_example");
//! ```

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Personal access token for GitHub.
pub const GITHUB_TOKEN_ENV: &str = "GH_PAT";

/// Personal access token for Azure DevOps.
pub const ADO_TOKEN_ENV: &str = "ADO_PAT";

/// Bitbucket Server username.
pub const BBS_USERNAME_ENV: &str = "BBS_USERNAME";

/// Bitbucket Server password.
pub const BBS_PASSWORD_ENV: &str = "BBS_PASSWORD";

/// Credentials attached to every request of a client.
///
/// # Variants
///
/// - `Bearer`: token authentication (GitHub)
/// - `AdoPat`: Azure DevOps personal access token, sent as Basic auth with an
///   empty username
/// - `Basic`: username and password (Bitbucket Server)
#[derive(Clone, PartialEq, Eq)]
pub enum AuthCredential {
    Bearer { token: String },
    AdoPat { token: String },
    Basic { username: String, password: String },
}

impl std::fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer { .. } => f.write_str("Bearer(***)"),
            Self::AdoPat { .. } => f.write_str("AdoPat(***)"),
            Self::Basic { username, .. } => write!(f, "Basic({username}:***)"),
        }
    }
}

impl AuthCredential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    pub fn ado_pat(token: impl Into<String>) -> Self {
        Self::AdoPat {
            token: token.into(),
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Value of the `Authorization` header for this credential.
    pub fn authorization_header(&self) -> String {
        match self {
            Self::Bearer { token } => format!("Bearer {token}"),
            Self::AdoPat { token } => format!("Basic {}", STANDARD.encode(format!(":{token}"))),
            Self::Basic { username, password } => {
                format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
            }
        }
    }

    /// Reads the GitHub token from [`GITHUB_TOKEN_ENV`].
    pub fn github_from_env() -> Result<Self> {
        Ok(Self::bearer(required_env(GITHUB_TOKEN_ENV)?))
    }

    /// Reads the Azure DevOps token from [`ADO_TOKEN_ENV`].
    pub fn ado_from_env() -> Result<Self> {
        Ok(Self::ado_pat(required_env(ADO_TOKEN_ENV)?))
    }

    /// Reads Bitbucket Server credentials from [`BBS_USERNAME_ENV`] and
    /// [`BBS_PASSWORD_ENV`].
    pub fn bbs_from_env() -> Result<Self> {
        Ok(Self::basic(
            required_env(BBS_USERNAME_ENV)?,
            required_env(BBS_PASSWORD_ENV)?,
        ))
    }
}

fn required_env(name: &str) -> Result<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{name} environment variable is not set"))
}
