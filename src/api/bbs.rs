//
//  repo-migrator
//  api/bbs.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Bitbucket Server / Data Center inventory calls (REST API 1.0).

use std::sync::Arc;

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::client::ApiClient;
use super::common::{escape, ApiError};
use super::rate_limit::RateLimitRules;
use super::transport::HttpTransport;
use crate::auth::AuthCredential;

pub fn bbs_client(transport: Arc<dyn HttpTransport>, credential: AuthCredential) -> ApiClient {
    ApiClient::new(transport, RateLimitRules::BITBUCKET_SERVER).with_auth(credential)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BbsProject {
    pub id: u64,
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BbsRepository {
    pub id: u64,
    pub slug: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct BbsApi {
    client: ApiClient,
    base_url: String,
}

impl BbsApi {
    pub fn new(client: ApiClient, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn get_server_version(&self) -> Result<String, ApiError> {
        let url = format!("{}/rest/api/1.0/application-properties", self.base_url);
        let data: Value = self.client.get_json(&url).await?;
        data.get("version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::MissingField {
                path: "/version".to_string(),
            })
    }

    pub async fn get_projects(&self) -> Result<Vec<BbsProject>, ApiError> {
        let url = format!("{}/rest/api/1.0/projects", self.base_url);
        self.client
            .get_all_start_limit(&url)
            .and_then(|project| async move { serde_json::from_value(project).map_err(ApiError::from) })
            .try_collect()
            .await
    }

    pub async fn get_repos(&self, project_key: &str) -> Result<Vec<BbsRepository>, ApiError> {
        let url = format!(
            "{}/rest/api/1.0/projects/{}/repos",
            self.base_url,
            escape(project_key)
        );
        self.client
            .get_all_start_limit(&url)
            .and_then(|repo| async move { serde_json::from_value(repo).map_err(ApiError::from) })
            .try_collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::{HttpResponse, MockTransport};

    fn api(transport: &MockTransport) -> BbsApi {
        BbsApi::new(
            bbs_client(Arc::new(transport.clone()), AuthCredential::basic("admin", "secret")),
            "https://bbs.test",
        )
    }

    #[tokio::test]
    async fn test_get_projects_walks_pages() {
        let transport = MockTransport::sequence(vec![
            HttpResponse::new(
                200,
                r#"{"values":[{"id":1,"key":"A","name":"Alpha"}],"isLastPage":false,"nextPageStart":1}"#,
            ),
            HttpResponse::new(200, r#"{"values":[{"id":2,"key":"B","name":"Beta"}],"isLastPage":true}"#),
        ]);

        let projects = api(&transport).get_projects().await.unwrap();

        let keys: Vec<&str> = projects.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);
        let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://bbs.test/rest/api/1.0/projects?start=0&limit=100",
                "https://bbs.test/rest/api/1.0/projects?start=1&limit=100",
            ]
        );
    }

    #[tokio::test]
    async fn test_get_server_version() {
        let transport = MockTransport::sequence(vec![HttpResponse::new(200, r#"{"version":"8.9.2"}"#)]);
        assert_eq!(api(&transport).get_server_version().await.unwrap(), "8.9.2");
    }
}
