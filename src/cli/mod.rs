//
//  repo-migrator
//  cli/mod.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! CLI command definitions using clap derive macros

mod api;
mod count;
mod upload;

pub use api::ApiCommand;
pub use count::CountCommand;
pub use upload::UploadCommand;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::api::{ado, bbs, github, ApiClient, HttpTransport, ReqwestTransport};
use crate::auth::AuthCredential;
use crate::config::Config;

/// rmig - Talk to migration sources and targets through a throttle-aware client
#[derive(Parser, Debug)]
#[command(
    name = "rmig",
    version,
    about = "Rate-limit aware API access for repository migrations",
    long_about = "rmig sends requests to GitHub, Azure DevOps and Bitbucket Server the way a\n\
                  migration does: retried, paginated and paced by the service's rate limits.",
    propagate_version = true,
    after_help = "Use 'rmig <command> --help' for more information about a command."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Parser, Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Log every request and rate-limit decision
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Make an API request
    Api(ApiCommand),

    /// Count the items behind an Azure DevOps list endpoint
    Count(CountCommand),

    /// Upload a migration archive to GitHub-owned storage
    Upload(UploadCommand),

    /// Show version information
    Version,
}

/// Service a command talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Service {
    #[default]
    Github,
    Ado,
    Bbs,
}

impl Service {
    fn base_url(self, config: &Config) -> Result<String> {
        match self {
            Service::Github => Ok(config.github.api_url.clone()),
            Service::Ado => Ok(config.ado.base_url.clone()),
            Service::Bbs => config
                .bbs
                .base_url
                .clone()
                .context("Bitbucket Server base URL is not configured. Set [bbs] base_url in config.toml"),
        }
    }

    fn credential(self) -> Result<AuthCredential> {
        match self {
            Service::Github => AuthCredential::github_from_env(),
            Service::Ado => AuthCredential::ado_from_env(),
            Service::Bbs => AuthCredential::bbs_from_env(),
        }
    }

    /// Client for this service tuned from `config`.
    pub fn client(self, config: &Config) -> Result<ApiClient> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
        let credential = self.credential()?;
        let client = match self {
            Service::Github => github::github_client(transport, credential),
            Service::Ado => ado::ado_client(transport, credential),
            Service::Bbs => bbs::bbs_client(transport, credential),
        };
        Ok(client
            .with_retry_policy(config.retry.policy())
            .with_secondary_backoff(config.secondary_rate_limit.backoff()))
    }

    /// Resolves `endpoint` against the service base URL unless already absolute.
    pub fn resolve(self, config: &Config, endpoint: &str) -> Result<String> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }
        let base = self.base_url(config)?;
        Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        ))
    }
}

/// Loads the config file and applies environment overrides.
pub(crate) fn load_config() -> Result<Config> {
    let mut config = Config::load()?;
    config.apply_env();
    Ok(config)
}
