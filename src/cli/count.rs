//
//  repo-migrator
//  cli/count.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Exact item count for Azure DevOps list endpoints
//!
//! Uses `$top=1&$skip=n` probes instead of downloading the collection, so
//! counting a repository with a hundred thousand commits costs a few dozen
//! small requests.
//!
//! ```bash
//! rmig count "org/project/_apis/git/repositories/repo/commits?api-version=7.1-preview.1"
//! ```

use anyhow::Result;
use clap::Args;
use console::style;

use super::{load_config, GlobalOptions, Service};

/// Count the items behind an Azure DevOps list endpoint
#[derive(Args, Debug)]
pub struct CountCommand {
    /// Endpoint path relative to the Azure DevOps base URL, or an absolute URL
    pub endpoint: String,
}

impl CountCommand {
    pub async fn run(&self, global: &GlobalOptions) -> Result<()> {
        let config = load_config()?;
        let url = Service::Ado.resolve(&config, &self.endpoint)?;
        let client = Service::Ado.client(&config)?;

        let count = client.get_count_using_skip(&url).await?;

        if global.verbose {
            eprintln!("{} {} items at {}", style("✓").green(), count, url);
        }
        println!("{count}");
        Ok(())
    }
}
