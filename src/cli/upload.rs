//
//  repo-migrator
//  cli/upload.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Archive upload command
//!
//! Uploads a migration archive to GitHub-owned storage and prints the
//! `gei://` URI to reference it by. Archives larger than the configured part
//! size go through the multipart protocol.
//!
//! ```bash
//! rmig upload migration.tar.gz --org-id 1234567
//! GITHUB_OWNED_STORAGE_MULTIPART_MEBIBYTES=50 rmig upload big.tar.gz --org-id 1234567
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use console::style;
use tokio::fs::File;

use crate::api::github::GithubApi;
use crate::util::format_size;

use super::{load_config, GlobalOptions, Service};

/// Upload a migration archive
#[derive(Args, Debug)]
pub struct UploadCommand {
    /// Archive to upload
    pub file: PathBuf,

    /// Database id of the target organization
    #[arg(long)]
    pub org_id: String,

    /// Archive name (defaults to the file name)
    #[arg(long)]
    pub name: Option<String>,
}

impl UploadCommand {
    pub async fn run(&self, global: &GlobalOptions) -> Result<()> {
        let config = load_config()?;
        let client = Service::Github.client(&config)?;
        let api = GithubApi::new(client, &config.github.api_url, &config.github.uploads_url);
        let uploader = api
            .archive_uploader()?
            .with_part_size(config.upload.part_size_bytes());

        let name = self.archive_name()?;
        let file = File::open(&self.file)
            .await
            .with_context(|| format!("Failed to open archive: {}", self.file.display()))?;
        let length = file.metadata().await?.len();

        if global.verbose {
            eprintln!(
                "{} Uploading {} ({}) in parts of {}",
                style("→").cyan(),
                name,
                format_size(length),
                format_size(uploader.part_size())
            );
        }

        let uri = uploader.upload(file, length, &name, &self.org_id).await?;

        eprintln!("{} Uploaded {}", style("✓").green(), name);
        println!("{uri}");
        Ok(())
    }

    fn archive_name(&self) -> Result<String> {
        if let Some(name) = &self.name {
            return Ok(name.clone());
        }
        self.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("Cannot derive an archive name from {}", self.file.display()))
    }
}
