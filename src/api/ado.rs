//
//  repo-migrator
//  api/ado.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Azure DevOps API
//!
//! Inventory calls against Azure DevOps Services. Listings page with
//! continuation tokens or `$skip/$top` windows; counts use the exact-count
//! search so no collection is downloaded just to be measured.

use std::sync::Arc;

use chrono::NaiveDate;
use futures::TryStreamExt;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::client::ApiClient;
use super::common::{escape, ApiError};
use super::rate_limit::RateLimitRules;
use super::transport::HttpTransport;
use crate::auth::AuthCredential;

pub const DEFAULT_BASE_URL: &str = "https://dev.azure.com";

/// Builds an [`ApiClient`] with Azure DevOps throttle rules.
pub fn ado_client(transport: Arc<dyn HttpTransport>, credential: AuthCredential) -> ApiClient {
    ApiClient::new(transport, RateLimitRules::AZURE_DEVOPS).with_auth(credential)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdoRepository {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_disabled: bool,
}

/// `isDisabled` arrives as a bool or as `"true"`/`"false"`.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(value) => value,
        Value::String(value) => value.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// Azure DevOps operations used by migrations.
#[derive(Debug, Clone)]
pub struct AdoApi {
    client: ApiClient,
    base_url: String,
}

impl AdoApi {
    pub fn new(client: ApiClient, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn repo_url(&self, org: &str, team_project: &str, repo: &str) -> String {
        format!(
            "{}/{}/{}/_apis/git/repositories/{}",
            self.base_url,
            escape(org),
            escape(team_project),
            escape(repo)
        )
    }

    pub async fn get_team_projects(&self, org: &str) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/{}/_apis/projects?api-version=6.1-preview", self.base_url, escape(org));
        self.client
            .get_with_paging(&url)
            .map_ok(|project| project["name"].as_str().unwrap_or_default().to_string())
            .try_collect()
            .await
    }

    pub async fn get_repos(&self, org: &str, team_project: &str) -> Result<Vec<AdoRepository>, ApiError> {
        let url = format!(
            "{}/{}/{}/_apis/git/repositories?api-version=6.1-preview.1",
            self.base_url,
            escape(org),
            escape(team_project)
        );
        self.client
            .get_with_paging(&url)
            .and_then(|repo| async move { serde_json::from_value(repo).map_err(ApiError::from) })
            .try_collect()
            .await
    }

    pub async fn get_enabled_repos(&self, org: &str, team_project: &str) -> Result<Vec<AdoRepository>, ApiError> {
        let mut repos = self.get_repos(org, team_project).await?;
        repos.retain(|repo| !repo.is_disabled);
        Ok(repos)
    }

    /// Number of pull requests in any state.
    pub async fn get_pull_request_count(&self, org: &str, team_project: &str, repo: &str) -> Result<u64, ApiError> {
        let url = format!(
            "{}/pullrequests?searchCriteria.status=all&api-version=7.1-preview.1",
            self.repo_url(org, team_project, repo)
        );
        self.client.get_count_using_skip(&url).await
    }

    /// Number of commits since `from_date`.
    pub async fn get_commit_count_since(
        &self,
        org: &str,
        team_project: &str,
        repo: &str,
        from_date: NaiveDate,
    ) -> Result<u64, ApiError> {
        let url = format!(
            "{}/commits?searchCriteria.fromDate={}&api-version=7.1-preview.1",
            self.repo_url(org, team_project, repo),
            from_date.format("%m/%d/%Y")
        );
        self.client.get_count_using_skip(&url).await
    }

    /// `"Display Name (unique@name)"` for every push since `from_date`.
    pub async fn get_pushers_since(
        &self,
        org: &str,
        team_project: &str,
        repo: &str,
        from_date: NaiveDate,
    ) -> Result<Vec<String>, ApiError> {
        let url = format!(
            "{}/pushes?searchCriteria.fromDate={}&api-version=7.1-preview.1",
            self.repo_url(org, team_project, repo),
            from_date.format("%m/%d/%Y")
        );
        self.client
            .get_with_paging_top_skip(&url)
            .map_ok(|push| {
                let pusher = &push["pushedBy"];
                format!(
                    "{} ({})",
                    pusher["displayName"].as_str().unwrap_or_default(),
                    pusher["uniqueName"].as_str().unwrap_or_default()
                )
            })
            .try_collect()
            .await
    }
}
