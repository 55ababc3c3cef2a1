//
//  repo-migrator
//  api/common/headers.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Header extraction and URL helpers shared by every client.

use once_cell::sync::Lazy;
use regex::Regex;

/// Link-relation header used for REST pagination.
pub const LINK_HEADER: &str = "Link";

/// Continuation header used for upload sessions.
pub const LOCATION_HEADER: &str = "Location";

/// Azure DevOps continuation token header.
pub const CONTINUATION_TOKEN_HEADER: &str = "x-ms-continuationtoken";

/// One `<url>; rel="name"` entry of a Link header.
static LINK_ENTRY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<(?P<url>[^>]+)>\s*;\s*rel="(?P<rel>[^"]+)""#).unwrap());

/// Returns the first value of header `name`, compared case-insensitively.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Extracts the `rel="next"` URL from a Link header value.
///
/// Other relations (`first`, `prev`, `last`) are ignored.
///
/// ```rust
/// use repo_migrator::api::common::next_link;
///
/// let header = r#"<https://api.github.com/orgs/o/repos?page=2>; rel="next", <https://api.github.com/orgs/o/repos?page=5>; rel="last""#;
/// assert_eq!(next_link(header).as_deref(), Some("https://api.github.com/orgs/o/repos?page=2"));
/// ```
pub fn next_link(link_header: &str) -> Option<String> {
    LINK_ENTRY
        .captures_iter(link_header)
        .find(|caps| &caps["rel"] == "next")
        .map(|caps| caps["url"].to_string())
}

/// Percent-encodes a value for use as a single path segment or query value.
///
/// Spaces become `%20`, not `+`.
pub fn escape(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Appends `name=value` to `url` with the right separator.
///
/// `value` is inserted as given; escape it first if it can contain reserved
/// characters.
pub fn append_query(url: &str, name: &str, value: impl std::fmt::Display) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{name}={value}")
}
