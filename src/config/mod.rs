//
//  repo-migrator
//  config/mod.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Configuration Module
//!
//! Endpoint URLs and resilience tuning for `rmig`, stored as TOML in the
//! platform config directory. A missing file means defaults everywhere.
//!
//! ## Configuration File Location
//!
//! - **Linux**: `~/.config/rmig/config.toml`
//! - **macOS**: `~/Library/Application Support/rmig/config.toml`
//! - **Windows**: `C:\Users\<User>\AppData\Roaming\rmig\config.toml`
//!
//! ## Example Configuration File
//!
//! ```toml
//! [github]
//! api_url = "https://api.github.com"
//! uploads_url = "https://uploads.github.com"
//!
//! [ado]
//! base_url = "https://dev.azure.com"
//!
//! [bbs]
//! base_url = "https://bitbucket.example.com"
//!
//! [retry]
//! max_retries = 5
//! delay_ms = 500
//!
//! [secondary_rate_limit]
//! base_delay_secs = 60
//! max_delay_secs = 900
//! max_retries = 3
//! max_jitter_ms = 1000
//!
//! [upload]
//! multipart_mebibytes = 100
//! ```
//!
//! ## Environment
//!
//! `GITHUB_OWNED_STORAGE_MULTIPART_MEBIBYTES` overrides `[upload]` at run
//! time; see [`UploadConfig::apply_env_override`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::api::rate_limit::{
    SecondaryBackoff, SECONDARY_BASE_DELAY, SECONDARY_MAX_DELAY, SECONDARY_MAX_JITTER, SECONDARY_MAX_RETRIES,
};
use crate::api::retry::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::api::upload::{
    BYTES_PER_MEBIBYTE, DEFAULT_MULTIPART_MEBIBYTES, MAX_MULTIPART_MEBIBYTES, MIN_MULTIPART_MEBIBYTES,
};
use crate::api::{ado, github};

/// Environment variable overriding the multipart part size, in MiB.
pub const MULTIPART_MEBIBYTES_ENV: &str = "GITHUB_OWNED_STORAGE_MULTIPART_MEBIBYTES";

/// Complete `rmig` configuration.
///
/// Every section uses `#[serde(default)]`, so a partial file only overrides
/// what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub github: GithubConfig,

    #[serde(default)]
    pub ado: AdoConfig,

    #[serde(default)]
    pub bbs: BbsConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub secondary_rate_limit: SecondaryRateLimitConfig,

    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    #[serde(default = "default_github_uploads_url")]
    pub uploads_url: String,
}

fn default_github_api_url() -> String {
    github::DEFAULT_API_URL.to_string()
}

fn default_github_uploads_url() -> String {
    github::DEFAULT_UPLOADS_URL.to_string()
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            uploads_url: default_github_uploads_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdoConfig {
    #[serde(default = "default_ado_base_url")]
    pub base_url: String,
}

fn default_ado_base_url() -> String {
    ado::DEFAULT_BASE_URL.to_string()
}

impl Default for AdoConfig {
    fn default() -> Self {
        Self {
            base_url: default_ado_base_url(),
        }
    }
}

/// Bitbucket Server has no public default host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BbsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Tuning for the general retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.delay_ms))
    }
}

/// Tuning for secondary (abuse) rate-limit back-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryRateLimitConfig {
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    #[serde(default = "default_secondary_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

fn default_base_delay_secs() -> u64 {
    SECONDARY_BASE_DELAY.as_secs()
}

fn default_max_delay_secs() -> u64 {
    SECONDARY_MAX_DELAY.as_secs()
}

fn default_secondary_max_retries() -> u32 {
    SECONDARY_MAX_RETRIES
}

fn default_max_jitter_ms() -> u64 {
    SECONDARY_MAX_JITTER.as_millis() as u64
}

impl Default for SecondaryRateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            max_retries: default_secondary_max_retries(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl SecondaryRateLimitConfig {
    pub fn backoff(&self) -> SecondaryBackoff {
        SecondaryBackoff {
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
            max_retries: self.max_retries,
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }
}

/// Archive upload settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_multipart_mebibytes")]
    pub multipart_mebibytes: u64,
}

fn default_multipart_mebibytes() -> u64 {
    DEFAULT_MULTIPART_MEBIBYTES
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            multipart_mebibytes: default_multipart_mebibytes(),
        }
    }
}

impl UploadConfig {
    /// Applies a raw `GITHUB_OWNED_STORAGE_MULTIPART_MEBIBYTES` value.
    ///
    /// # Parameters
    ///
    /// * `raw` - The variable's value, `None` when unset
    ///
    /// # Behavior
    ///
    /// | Value | Result |
    /// |-------|--------|
    /// | unset, non-numeric, `<= 0` | ignored silently |
    /// | below 5 or above 1024 | ignored, `warn!` naming the current size |
    /// | otherwise | adopted, `info!` |
    pub fn apply_env_override(&mut self, raw: Option<&str>) {
        let Some(mebibytes) = raw.and_then(|value| value.trim().parse::<i64>().ok()) else {
            return;
        };
        if mebibytes <= 0 {
            return;
        }

        let mebibytes = mebibytes as u64;
        if mebibytes < MIN_MULTIPART_MEBIBYTES {
            tracing::warn!(
                "{} is set to {} MiB, below the {} MiB minimum. Using {} MiB instead.",
                MULTIPART_MEBIBYTES_ENV,
                mebibytes,
                MIN_MULTIPART_MEBIBYTES,
                self.multipart_mebibytes
            );
            return;
        }

        if mebibytes > MAX_MULTIPART_MEBIBYTES {
            tracing::warn!(
                "{} is set to {} MiB, above the {} MiB maximum. Using {} MiB instead.",
                MULTIPART_MEBIBYTES_ENV,
                mebibytes,
                MAX_MULTIPART_MEBIBYTES,
                self.multipart_mebibytes
            );
            return;
        }

        tracing::info!("Multipart upload part size set to {} MiB.", mebibytes);
        self.multipart_mebibytes = mebibytes;
    }

    /// Part size in bytes, with the configured MiB held to
    /// `[MIN_MULTIPART_MEBIBYTES, MAX_MULTIPART_MEBIBYTES]`.
    pub fn part_size_bytes(&self) -> u64 {
        self.multipart_mebibytes
            .clamp(MIN_MULTIPART_MEBIBYTES, MAX_MULTIPART_MEBIBYTES)
            * BYTES_PER_MEBIBYTE
    }
}

impl Config {
    /// Loads the configuration from the default location.
    ///
    /// A missing file is not an error; defaults are returned.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Loads the configuration from `path`, defaulting when absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Writes the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Path of `config.toml` under the platform config directory.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", crate::APP_NAME)
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Applies environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        let raw = std::env::var(MULTIPART_MEBIBYTES_ENV).ok();
        self.upload.apply_env_override(raw.as_deref());
    }
}
