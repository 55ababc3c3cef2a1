//
//  repo-migrator
//  api/github.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # GitHub API
//!
//! Typed calls against the GitHub REST and GraphQL APIs used by migrations.
//! All of the resilience lives in [`ApiClient`]; this module only knows URLs,
//! payloads and response shapes.

use std::sync::Arc;

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::client::ApiClient;
use super::common::{escape, ApiError};
use super::rate_limit::RateLimitRules;
use super::transport::HttpTransport;
use super::upload::ArchiveUploader;
use crate::auth::AuthCredential;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_UPLOADS_URL: &str = "https://uploads.github.com";

const ACCEPT: &str = "application/vnd.github.v3+json";
const GRAPHQL_FEATURES: &str = "import_api,mannequin_claiming_emu,org_import_api";

const MANNEQUINS_QUERY: &str = "query($id: ID!, $first: Int, $after: String) { \
    node(id: $id) { ... on Organization { mannequins(first: $first, after: $after) { \
    pageInfo { endCursor hasNextPage } nodes { login id claimant { login id } } } } } }";

/// Builds an [`ApiClient`] with GitHub's headers and throttle rules.
pub fn github_client(transport: Arc<dyn HttpTransport>, credential: AuthCredential) -> ApiClient {
    ApiClient::new(transport, RateLimitRules::GITHUB)
        .with_auth(credential)
        .with_header("Accept", ACCEPT)
        .with_header("GraphQL-Features", GRAPHQL_FEATURES)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub name: String,
    #[serde(default)]
    pub visibility: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claimant {
    pub id: String,
    pub login: String,
}

/// Placeholder user created for authors that could not be mapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mannequin {
    pub id: String,
    pub login: String,
    #[serde(default)]
    pub claimant: Option<Claimant>,
}

/// GitHub ids come back as numbers from REST and as strings from GraphQL.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected id {other}"))),
    }
}

fn is_server_error(err: &ApiError) -> bool {
    err.status().is_some_and(|status| status >= 500)
}

/// GitHub operations used by migrations.
#[derive(Debug, Clone)]
pub struct GithubApi {
    client: ApiClient,
    api_url: String,
    uploads_url: String,
}

impl GithubApi {
    pub fn new(client: ApiClient, api_url: &str, uploads_url: &str) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            uploads_url: uploads_url.trim_end_matches('/').to_string(),
        }
    }

    fn graphql_url(&self) -> String {
        format!("{}/graphql", self.api_url)
    }

    pub async fn get_repos(&self, org: &str) -> Result<Vec<Repo>, ApiError> {
        let url = format!("{}/orgs/{}/repos?per_page=100", self.api_url, escape(org));
        self.client
            .get_all(&url, "")
            .and_then(|repo| async move { serde_json::from_value(repo).map_err(ApiError::from) })
            .try_collect()
            .await
    }

    /// `true` on 200, `false` on 404 or 301 (renamed or transferred).
    pub async fn does_repo_exist(&self, org: &str, repo: &str) -> Result<bool, ApiError> {
        let url = format!("{}/repos/{}/{}", self.api_url, escape(org), escape(repo));
        match self.client.get_non_success(&url, 404).await {
            Ok(_) => Ok(false),
            Err(ApiError::UnexpectedStatus { status: 200, .. }) => Ok(true),
            Err(ApiError::UnexpectedStatus { status: 301, .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn does_org_exist(&self, org: &str) -> Result<bool, ApiError> {
        let url = format!("{}/orgs/{}", self.api_url, escape(org));
        match self.client.get(&url).await {
            Ok(_) => Ok(true),
            Err(err) if err.status() == Some(404) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn get_teams(&self, org: &str) -> Result<Vec<Team>, ApiError> {
        let url = format!("{}/orgs/{}/teams", self.api_url, escape(org));
        self.client
            .get_all(&url, "")
            .and_then(|team| async move { serde_json::from_value(team).map_err(ApiError::from) })
            .try_collect()
            .await
    }

    /// Creates a closed team.
    ///
    /// A 5xx may still have created the team, so before each retry the team is
    /// looked up by name and returned if it exists.
    pub async fn create_team(&self, org: &str, team_name: &str) -> Result<Team, ApiError> {
        let url = format!("{}/orgs/{}/teams", self.api_url, escape(org));
        let payload = json!({ "name": team_name, "privacy": "closed" });
        let (url, payload) = (url.as_str(), &payload);

        self.client
            .retry_policy()
            .retry_when(
                || async move {
                    match self.client.post_json(url, payload).await {
                        Ok(data) => serde_json::from_value(data).map_err(ApiError::from),
                        Err(err) if is_server_error(&err) => {
                            let existing = self
                                .get_teams(org)
                                .await?
                                .into_iter()
                                .find(|team| team.name == team_name);
                            match existing {
                                Some(team) => {
                                    tracing::info!("Team '{}' was created despite HTTP error", team_name);
                                    Ok(team)
                                }
                                None => Err(err),
                            }
                        }
                        Err(err) => Err(err),
                    }
                },
                is_server_error,
            )
            .await
    }

    /// Login of the user the token belongs to.
    pub async fn get_login_name(&self) -> Result<String, ApiError> {
        let url = self.graphql_url();
        let payload = json!({ "query": "query{viewer{login}}" });
        let (url, payload) = (url.as_str(), &payload);

        let data = self
            .client
            .retry_policy()
            .retry(|| async move { self.client.post_graphql(url, payload).await })
            .await?;

        data.pointer("/data/viewer/login")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::MissingField {
                path: "/data/viewer/login".to_string(),
            })
    }

    /// Every mannequin of the organization with GraphQL node id `org_id`.
    pub async fn get_mannequins(&self, org_id: &str) -> Result<Vec<Mannequin>, ApiError> {
        let url = self.graphql_url();
        let payload = json!({ "query": MANNEQUINS_QUERY, "variables": { "id": org_id } });

        self.client
            .post_graphql_paginated(
                &url,
                payload,
                "/data/node/mannequins/nodes",
                "/data/node/mannequins/pageInfo",
            )
            .and_then(|node| async move { serde_json::from_value(node).map_err(ApiError::from) })
            .try_collect()
            .await
    }

    /// Uploader targeting this instance's uploads endpoint.
    pub fn archive_uploader(&self) -> Result<ArchiveUploader, ApiError> {
        ArchiveUploader::new(self.client.clone(), &self.uploads_url)
    }
}
