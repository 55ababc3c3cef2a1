//
//  repo-migrator
//  cli/api.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Direct API access command
//!
//! Sends one request through the same rate-limit aware client a migration
//! uses, which makes it handy for probing endpoints and for watching the
//! throttling behaviour with `--verbose`.
//!
//! ## Examples
//!
//! ```bash
//! # Get an organization
//! rmig api /orgs/octo
//!
//! # Every repository, following Link headers
//! rmig api "/orgs/octo/repos?per_page=100" --paginate
//!
//! # Create a team from a JSON file
//! rmig api -X POST /orgs/octo/teams --input team.json
//!
//! # Azure DevOps
//! rmig api --service ado "org/_apis/projects?api-version=6.1-preview"
//! ```

use std::fs;
use std::io::Read;

use anyhow::{bail, Result};
use clap::Args;
use console::style;
use futures::TryStreamExt;
use serde_json::Value;

use crate::api::client::parse_json_body;
use crate::api::{ApiClient, ExpectedStatus, HttpMethod, HttpRequest};

use super::{load_config, GlobalOptions, Service};

/// Make an authenticated API request
#[derive(Args, Debug)]
pub struct ApiCommand {
    /// Endpoint path relative to the service base URL, or an absolute URL
    pub endpoint: String,

    /// HTTP method
    #[arg(long, short = 'X', default_value = "GET")]
    pub method: String,

    /// Service to talk to
    #[arg(long, short = 's', value_enum, default_value_t = Service::Github)]
    pub service: Service,

    /// Read a JSON request body from a file ("-" for stdin)
    #[arg(long, short = 'f')]
    pub input: Option<String>,

    /// Follow Link headers and print every item as one array (GET only)
    #[arg(long)]
    pub paginate: bool,
}

impl ApiCommand {
    pub async fn run(&self, global: &GlobalOptions) -> Result<()> {
        let config = load_config()?;
        let url = self.service.resolve(&config, &self.endpoint)?;
        let method = self.parse_method()?;
        let client = self.service.client(&config)?;

        if global.verbose {
            eprintln!("{} {} {}", style("→").cyan(), method, url);
        }

        let output = if self.paginate {
            if method != HttpMethod::Get {
                bail!("--paginate is only supported for GET requests");
            }
            Self::fetch_all(&client, &url).await?
        } else {
            self.fetch_one(&client, method, &url).await?
        };

        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }

    fn parse_method(&self) -> Result<HttpMethod> {
        match HttpMethod::parse(&self.method) {
            Some(method) => Ok(method),
            None => bail!("Unsupported HTTP method: {}", self.method),
        }
    }

    fn read_body(&self) -> Result<Option<Value>> {
        let Some(input) = &self.input else {
            return Ok(None);
        };

        let content = if input == "-" {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        } else {
            fs::read_to_string(input)?
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn fetch_all(client: &ApiClient, url: &str) -> Result<Value> {
        let items: Vec<Value> = client.get_all(url, "").try_collect().await?;
        Ok(Value::Array(items))
    }

    async fn fetch_one(&self, client: &ApiClient, method: HttpMethod, url: &str) -> Result<Value> {
        let body = self.read_body()?;

        let response = match (method, body) {
            (HttpMethod::Get, None) => client.get_response(url).await?,
            (method, None) => client.send(HttpRequest::new(method, url), ExpectedStatus::Success).await?,
            (method, Some(body)) => {
                let request = HttpRequest::new(method, url).json(&body)?;
                client.send(request, ExpectedStatus::Success).await?
            }
        };

        Ok(parse_json_body(&response)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn command(method: &str, input: Option<String>) -> ApiCommand {
        ApiCommand {
            endpoint: "/user".to_string(),
            method: method.to_string(),
            service: Service::Github,
            input,
            paginate: false,
        }
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(command("get", None).parse_method().unwrap(), HttpMethod::Get);
        assert_eq!(command("PATCH", None).parse_method().unwrap(), HttpMethod::Patch);
        assert!(command("BREW", None).parse_method().is_err());
    }

    #[test]
    fn test_read_body_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"name":"core","privacy":"closed"}}"#).unwrap();

        let body = command("POST", Some(file.path().display().to_string()))
            .read_body()
            .unwrap()
            .unwrap();

        assert_eq!(body["privacy"], "closed");
        assert!(command("POST", None).read_body().unwrap().is_none());
    }
}
