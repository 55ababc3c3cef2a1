//
//  repo-migrator
//  api/common/pagination.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Pagination Engine
//!
//! Every listing endpoint of the migration APIs pages its results one of a
//! handful of ways. Each strategy here is a lazy, forward-only stream: a page
//! is fetched only when the consumer asks for an item past the end of the
//! previous one, so dropping the stream early skips the remaining requests.
//!
//! # Overview
//!
//! | Method | Service | Advances on | Stops when |
//! |--------|---------|-------------|------------|
//! | [`ApiClient::get_all`] | GitHub REST | `Link: <..>; rel="next"` | no `next` relation |
//! | [`ApiClient::post_graphql_paginated`] | GitHub GraphQL | `pageInfo.endCursor` | `hasNextPage` is false |
//! | [`ApiClient::get_with_paging`] | Azure DevOps | `x-ms-continuationtoken` | no token |
//! | [`ApiClient::get_with_paging_top_skip`] | Azure DevOps | `$skip += 1000` | empty page |
//! | [`ApiClient::get_all_start_limit`] | Bitbucket Server | `nextPageStart` | `isLastPage` |
//!
//! [`ApiClient::get_count_using_skip`] is not a walk: it finds the exact size of
//! a `$skip/$top` collection with a logarithmic number of one-item probes.
//!
//! # Example
//!
//! ```rust,no_run
//! use futures::TryStreamExt;
//! use repo_migrator::api::ApiClient;
//!
//! # async fn example(client: ApiClient) -> Result<(), repo_migrator::api::ApiError> {
//! let repos: Vec<serde_json::Value> = client
//!     .get_all("https://api.github.com/orgs/octo/repos?per_page=100", "")
//!     .try_collect()
//!     .await?;
//! println!("{} repositories", repos.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Notes
//!
//! - Item selectors are JSON pointers (`/data/organization/repositories/nodes`);
//!   the empty pointer selects the whole body
//! - A selector that does not resolve to an array fails the stream with
//!   [`ApiError::MissingField`]
//! - Page fetches go through the client's retry policy

use async_stream::try_stream;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{append_query, escape, ApiError, CONTINUATION_TOKEN_HEADER, LINK_HEADER, next_link};
use crate::api::client::{parse_json_body, ApiClient};

/// Default `first` injected into paginated GraphQL queries.
pub const DEFAULT_GRAPHQL_PAGE_SIZE: u64 = 100;

/// Window size for `$skip/$top` paging.
pub const TOP_SKIP_PAGE_SIZE: u64 = 1000;

/// Page size requested from Bitbucket Server.
pub const START_LIMIT_PAGE_SIZE: u64 = 100;

/// Initial upper bound of the exact-count search.
pub const COUNT_INITIAL_CEILING: u64 = 500;

/// Where the next page of a walk comes from.
///
/// Created as [`PageCursor::Start`], replaced after every page, and dropped
/// when the walk ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Nothing fetched yet.
    Start,

    /// Service-issued continuation: a next-page URL or an opaque token.
    Token(String),

    /// GraphQL cursor state.
    Cursor {
        cursor: Option<String>,
        has_next: bool,
    },

    /// Numeric window.
    Offset { skip: u64, page_size: u64 },
}

/// One page of a Bitbucket Server listing.
///
/// # Fields
///
/// | Field | Type | Description |
/// |-------|------|-------------|
/// | `values` | `Vec<T>` | Items of this page |
/// | `is_last_page` | `bool` | No further pages |
/// | `next_page_start` | `Option<u64>` | `start` of the following page |
#[derive(Debug, Clone, Deserialize)]
pub struct StartLimitPage<T> {
    #[serde(default = "Vec::new")]
    pub values: Vec<T>,

    #[serde(default, rename = "isLastPage")]
    pub is_last_page: bool,

    #[serde(default, rename = "nextPageStart")]
    pub next_page_start: Option<u64>,
}

impl<T> StartLimitPage<T> {
    pub fn next_start(&self) -> Option<u64> {
        if self.is_last_page {
            None
        } else {
            self.next_page_start
        }
    }
}

/// Takes the array at `pointer` out of `data`.
fn take_items(data: &mut Value, pointer: &str) -> Result<Vec<Value>, ApiError> {
    match data.pointer_mut(pointer).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(ApiError::MissingField {
            path: pointer.to_string(),
        }),
    }
}

/// Replaces (or appends) query parameters of `url`, keeping all others.
fn with_query_params(url: &str, params: &[(&str, String)]) -> Result<String, ApiError> {
    let mut parsed = Url::parse(url)?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !params.iter().any(|(name, _)| name == key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        pairs.extend_pairs(kept);
        for (name, value) in params {
            pairs.append_pair(name, value);
        }
    }

    Ok(parsed.to_string())
}

fn set_graphql_variable(body: &mut Value, name: &str, value: Value) -> Result<(), ApiError> {
    let object = body.as_object_mut().ok_or_else(|| ApiError::GraphQl {
        message: "GraphQL request body must be a JSON object".to_string(),
    })?;
    let variables = object.entry("variables").or_insert_with(|| json!({}));
    if !variables.is_object() {
        *variables = json!({});
    }
    if let Some(variables) = variables.as_object_mut() {
        variables.insert(name.to_string(), value);
    }
    Ok(())
}

impl ApiClient {
    /// Walks a REST listing by following `rel="next"` Link headers.
    ///
    /// # Parameters
    ///
    /// * `url` - First page
    /// * `items_pointer` - JSON pointer to the item array of each page (`""`
    ///   when the body is the array)
    pub fn get_all<'a>(
        &'a self,
        url: &'a str,
        items_pointer: &'a str,
    ) -> impl Stream<Item = Result<Value, ApiError>> + 'a {
        try_stream! {
            let mut cursor = Some(PageCursor::Start);

            loop {
                let page_url = match cursor.take() {
                    Some(PageCursor::Start) => url.to_string(),
                    Some(PageCursor::Token(next)) => next,
                    _ => break,
                };

                let response = self.get_response(&page_url).await?;
                let mut data = parse_json_body(&response)?;
                for item in take_items(&mut data, items_pointer)? {
                    yield item;
                }

                cursor = response.header(LINK_HEADER).and_then(next_link).map(PageCursor::Token);
            }
        }
    }

    /// Walks a GraphQL connection.
    ///
    /// `body` is the full request (`{"query": ..., "variables": {...}}`).
    /// `variables.first` defaults to [`DEFAULT_GRAPHQL_PAGE_SIZE`];
    /// `variables.after` is set to `null` for the first page and to the previous
    /// `endCursor` afterwards.
    ///
    /// # Errors
    ///
    /// - [`ApiError::MissingField`] when either pointer does not resolve, or when
    ///   `hasNextPage` is true without an `endCursor`
    /// - [`ApiError::GraphQl`] when the response carries `errors`
    pub fn post_graphql_paginated<'a>(
        &'a self,
        url: &'a str,
        body: Value,
        items_pointer: &'a str,
        page_info_pointer: &'a str,
    ) -> impl Stream<Item = Result<Value, ApiError>> + 'a {
        try_stream! {
            let mut body = body;
            if body.pointer("/variables/first").is_none() {
                set_graphql_variable(&mut body, "first", json!(DEFAULT_GRAPHQL_PAGE_SIZE))?;
            }

            let mut cursor = Some(PageCursor::Cursor { cursor: None, has_next: true });

            while let Some(PageCursor::Cursor { cursor: after, has_next: true }) = cursor.take() {
                set_graphql_variable(&mut body, "after", after.map_or(Value::Null, Value::String))?;

                let request = &body;
                let mut data = self
                    .retry_policy()
                    .retry(|| async move { self.post_graphql(url, request).await })
                    .await?;

                let page_info = data
                    .pointer(page_info_pointer)
                    .cloned()
                    .ok_or_else(|| ApiError::MissingField { path: page_info_pointer.to_string() })?;

                for item in take_items(&mut data, items_pointer)? {
                    yield item;
                }

                let has_next = page_info
                    .get("hasNextPage")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let end_cursor = page_info
                    .get("endCursor")
                    .and_then(Value::as_str)
                    .map(str::to_string);

                if has_next && end_cursor.is_none() {
                    Err::<(), _>(ApiError::MissingField { path: format!("{page_info_pointer}/endCursor") })?;
                }

                cursor = Some(PageCursor::Cursor { cursor: end_cursor, has_next });
            }
        }
    }

    /// Walks an Azure DevOps listing by continuation token, yielding the
    /// `value` array of every page.
    pub fn get_with_paging<'a>(
        &'a self,
        url: &'a str,
    ) -> impl Stream<Item = Result<Value, ApiError>> + 'a {
        try_stream! {
            let mut cursor = Some(PageCursor::Start);

            loop {
                let page_url = match cursor.take() {
                    Some(PageCursor::Start) => url.to_string(),
                    Some(PageCursor::Token(token)) => {
                        append_query(url, "continuationToken", escape(&token))
                    }
                    _ => break,
                };

                let response = self.get_response(&page_url).await?;
                let mut data = parse_json_body(&response)?;
                for item in take_items(&mut data, "/value")? {
                    yield item;
                }

                cursor = response
                    .header(CONTINUATION_TOKEN_HEADER)
                    .filter(|token| !token.is_empty())
                    .map(|token| PageCursor::Token(token.to_string()));
            }
        }
    }

    /// Walks a `$skip/$top` listing in windows of [`TOP_SKIP_PAGE_SIZE`] until
    /// a window comes back empty.
    pub fn get_with_paging_top_skip<'a>(
        &'a self,
        url: &'a str,
    ) -> impl Stream<Item = Result<Value, ApiError>> + 'a {
        try_stream! {
            let mut cursor = Some(PageCursor::Offset { skip: 0, page_size: TOP_SKIP_PAGE_SIZE });

            while let Some(PageCursor::Offset { skip, page_size }) = cursor.take() {
                let page_url = append_query(&append_query(url, "$skip", skip), "$top", page_size);

                let response = self.get_response(&page_url).await?;
                let mut data = parse_json_body(&response)?;
                let items = take_items(&mut data, "/value")?;
                if items.is_empty() {
                    break;
                }

                for item in items {
                    yield item;
                }

                cursor = Some(PageCursor::Offset { skip: skip + page_size, page_size });
            }
        }
    }

    /// Walks a Bitbucket Server listing with `start`/`limit`.
    pub fn get_all_start_limit<'a>(
        &'a self,
        url: &'a str,
    ) -> impl Stream<Item = Result<Value, ApiError>> + 'a {
        try_stream! {
            let mut cursor = Some(PageCursor::Offset { skip: 0, page_size: START_LIMIT_PAGE_SIZE });

            while let Some(PageCursor::Offset { skip, page_size }) = cursor.take() {
                let page_url = with_query_params(
                    url,
                    &[("start", skip.to_string()), ("limit", page_size.to_string())],
                )?;

                let page: StartLimitPage<Value> = self.get_json(&page_url).await?;
                let next = page.next_start();

                for item in page.values {
                    yield item;
                }

                cursor = next.map(|skip| PageCursor::Offset { skip, page_size });
            }
        }
    }

    /// Exact size of a `$skip/$top` collection that reports no total.
    ///
    /// Each probe asks for one item at some `$skip`. After a probe at 0, the
    /// ceiling starts at [`COUNT_INITIAL_CEILING`] and doubles while a probe
    /// there still finds an item; the boundary is then binary-searched.
    ///
    /// # Returns
    ///
    /// The number of items, `0` after a single probe for an empty collection.
    pub async fn get_count_using_skip(&self, url: &str) -> Result<u64, ApiError> {
        if !self.has_item_at(url, 0).await? {
            return Ok(0);
        }

        let mut floor = 1;
        let mut ceiling = COUNT_INITIAL_CEILING;

        while self.has_item_at(url, ceiling).await? {
            floor = ceiling + 1;
            ceiling *= 2;
        }

        while floor < ceiling {
            let mid = floor + (ceiling - floor) / 2;
            if self.has_item_at(url, mid).await? {
                floor = mid + 1;
            } else {
                ceiling = mid;
            }
        }

        tracing::debug!("Counted {} items at {}", floor, url);
        Ok(floor)
    }

    async fn has_item_at(&self, url: &str, skip: u64) -> Result<bool, ApiError> {
        let probe = append_query(&append_query(url, "$top", 1), "$skip", skip);
        let data: Value = self.get_json(&probe).await?;

        if let Some(count) = data.get("count").and_then(Value::as_u64) {
            return Ok(count > 0);
        }
        match data.get("value").and_then(Value::as_array) {
            Some(items) => Ok(!items.is_empty()),
            None => Err(ApiError::MissingField {
                path: "/count".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::pin::pin;
    use std::sync::Arc;

    use futures::{StreamExt, TryStreamExt};

    use super::*;
    use crate::api::rate_limit::RateLimitRules;
    use crate::api::retry::RetryPolicy;
    use crate::api::transport::{HttpRequest, HttpResponse, MockTransport};

    fn client(transport: &MockTransport) -> ApiClient {
        ApiClient::new(Arc::new(transport.clone()), RateLimitRules::GITHUB)
            .with_retry_policy(RetryPolicy::none())
    }

    fn query_value(request: &HttpRequest, name: &str) -> Option<String> {
        Url::parse(&request.url)
            .ok()?
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Serves `size` items through `$skip/$top`.
    fn windowed(size: u64) -> MockTransport {
        MockTransport::with_handler(move |request| {
            let skip: u64 = query_value(request, "$skip").and_then(|v| v.parse().ok()).unwrap_or(0);
            let top: u64 = query_value(request, "$top").and_then(|v| v.parse().ok()).unwrap_or(0);
            let end = size.min(skip + top);
            let value: Vec<Value> = (skip.min(end)..end).map(|i| json!({ "id": i })).collect();
            let body = json!({ "count": value.len(), "value": value });
            Ok(HttpResponse::new(200, body.to_string()))
        })
    }

    #[tokio::test]
    async fn test_link_pagination_walks_all_pages_in_order() {
        let transport = MockTransport::with_handler(|request| {
            let page = query_value(request, "page").unwrap_or_else(|| "1".to_string());
            let response = match page.as_str() {
                "1" => HttpResponse::new(200, "[1,2]").with_header(
                    "Link",
                    r#"<https://api.test/items?page=2>; rel="next", <https://api.test/items?page=3>; rel="last""#,
                ),
                "2" => HttpResponse::new(200, "[3,4]").with_header(
                    "Link",
                    r#"<https://api.test/items?page=1>; rel="prev", <https://api.test/items?page=3>; rel="next""#,
                ),
                _ => HttpResponse::new(200, "[5]")
                    .with_header("Link", r#"<https://api.test/items?page=2>; rel="prev""#),
            };
            Ok(response)
        });
        let client = client(&transport);

        let items: Vec<Value> = client
            .get_all("https://api.test/items", "")
            .try_collect()
            .await
            .unwrap();

        assert_eq!(items, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_link_pagination_is_lazy() {
        let transport = MockTransport::with_handler(|_| {
            Ok(HttpResponse::new(200, r#"{"repositories":[1,2]}"#)
                .with_header("Link", r#"<https://api.test/more>; rel="next""#))
        });
        let client = client(&transport);

        let mut stream = pin!(client.get_all("https://api.test/items", "/repositories"));
        assert_eq!(stream.next().await.unwrap().unwrap(), json!(1));
        assert_eq!(stream.next().await.unwrap().unwrap(), json!(2));

        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_items_field_fails_the_stream() {
        let transport = MockTransport::sequence(vec![HttpResponse::new(200, r#"{"nope":[]}"#)]);
        let client = client(&transport);

        let err = client
            .get_all("https://api.test/items", "/repositories")
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::MissingField { ref path } if path == "/repositories"));
    }

    fn graphql_page(ids: &[u32], has_next: bool, end: Option<&str>) -> HttpResponse {
        let body = json!({
            "data": { "node": { "mannequins": {
                "nodes": ids.iter().map(|id| json!({ "id": id })).collect::<Vec<_>>(),
                "pageInfo": { "hasNextPage": has_next, "endCursor": end }
            }}}
        });
        HttpResponse::new(200, body.to_string())
    }

    fn sent_variables(request: &HttpRequest) -> Value {
        let body = request.body.clone().unwrap().into_bytes();
        serde_json::from_slice::<Value>(&body).unwrap()["variables"].clone()
    }

    #[tokio::test]
    async fn test_graphql_pagination_follows_end_cursor() {
        let transport = MockTransport::sequence(vec![
            graphql_page(&[1, 2], true, Some("c1")),
            graphql_page(&[3], false, None),
        ]);
        let client = client(&transport);
        let query = json!({ "query": "query($id: ID!, $first: Int, $after: String) { ... }", "variables": { "id": "O_1" } });

        let items: Vec<Value> = client
            .post_graphql_paginated(
                "https://api.test/graphql",
                query,
                "/data/node/mannequins/nodes",
                "/data/node/mannequins/pageInfo",
            )
            .try_collect()
            .await
            .unwrap();

        assert_eq!(items.len(), 3);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);

        let first = sent_variables(&requests[0]);
        assert_eq!(first["after"], Value::Null);
        assert_eq!(first["first"], json!(DEFAULT_GRAPHQL_PAGE_SIZE));
        assert_eq!(first["id"], "O_1");

        assert_eq!(sent_variables(&requests[1])["after"], "c1");
    }

    #[tokio::test]
    async fn test_graphql_pagination_requires_end_cursor() {
        let transport = MockTransport::sequence(vec![graphql_page(&[1], true, None)]);
        let client = client(&transport);

        let err = client
            .post_graphql_paginated(
                "https://api.test/graphql",
                json!({ "query": "q" }),
                "/data/node/mannequins/nodes",
                "/data/node/mannequins/pageInfo",
            )
            .try_collect::<Vec<_>>()
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::MissingField { ref path } if path.ends_with("/endCursor")));
    }

    #[tokio::test]
    async fn test_continuation_token_pagination() {
        let transport = MockTransport::with_handler(|request| {
            Ok(match query_value(request, "continuationToken").as_deref() {
                None => HttpResponse::new(200, r#"{"value":["a","b"]}"#)
                    .with_header("x-ms-continuationtoken", "tok/1"),
                Some("tok/1") => HttpResponse::new(200, r#"{"value":["c"]}"#),
                Some(other) => HttpResponse::new(400, other.to_string()),
            })
        });
        let client = client(&transport);

        let items: Vec<Value> = client
            .get_with_paging("https://dev.azure.com/org/_apis/git/repositories?api-version=7.1")
            .try_collect()
            .await
            .unwrap();

        assert_eq!(items, vec![json!("a"), json!("b"), json!("c")]);
        assert!(transport.requests()[1].url.contains("&continuationToken=tok%2F1"));
    }

    #[tokio::test]
    async fn test_top_skip_paging_stops_on_empty_window() {
        let transport = windowed(2500);
        let client = client(&transport);

        let items: Vec<Value> = client
            .get_with_paging_top_skip("https://dev.azure.com/org/_apis/x?api-version=7.1")
            .try_collect()
            .await
            .unwrap();

        assert_eq!(items.len(), 2500);
        assert_eq!(items[2499]["id"], 2499);
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn test_start_limit_paging() {
        let transport = MockTransport::with_handler(|request| {
            let body = match query_value(request, "start").as_deref() {
                Some("0") => r#"{"values":[1,2],"isLastPage":false,"nextPageStart":2}"#,
                _ => r#"{"values":[3],"isLastPage":true}"#,
            };
            Ok(HttpResponse::new(200, body))
        });
        let client = client(&transport);

        let items: Vec<Value> = client
            .get_all_start_limit("https://bbs.test/rest/api/1.0/projects?start=7")
            .try_collect()
            .await
            .unwrap();

        assert_eq!(items, vec![json!(1), json!(2), json!(3)]);
        let second = &transport.requests()[1];
        assert_eq!(query_value(second, "start").as_deref(), Some("2"));
        assert_eq!(query_value(second, "limit").as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn test_count_using_skip_is_exact_and_logarithmic() {
        for size in [0u64, 1, 499, 500, 501, 12345] {
            let transport = windowed(size);
            let client = client(&transport);

            let count = client
                .get_count_using_skip("https://dev.azure.com/org/_apis/git/pullrequests?api-version=7.1")
                .await
                .unwrap();
            assert_eq!(count, size, "size {size}");

            let probes = transport.requests();
            let bits = u64::BITS - size.max(COUNT_INITIAL_CEILING).leading_zeros();
            assert!(probes.len() <= (2 * bits + 3) as usize, "size {size}: {} probes", probes.len());
            assert!(probes.iter().all(|p| query_value(p, "$top").as_deref() == Some("1")));
        }
    }

    #[tokio::test]
    async fn test_count_of_empty_collection_uses_one_probe() {
        let transport = windowed(0);
        let client = client(&transport);

        assert_eq!(client.get_count_using_skip("https://h/x?a=1").await.unwrap(), 0);
        assert_eq!(transport.request_count(), 1);
    }

    #[test]
    fn test_with_query_params_replaces_existing() {
        let url = with_query_params("https://h/x?start=7&q=a", &[("start", "0".to_string())]).unwrap();
        assert_eq!(url, "https://h/x?q=a&start=0");
    }
}
