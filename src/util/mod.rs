//
//  repo-migrator
//  util/mod.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Utility Module
//!
//! Small text helpers shared by the API layer and the CLI.
//!
//! - [`truncate`]: shorten response bodies kept in errors and logs
//! - [`format_size`]: human-readable byte counts for upload output
//!
//! ## Example
//!
//! ```rust
//! use repo_migrator::util::{format_size, truncate};
//!
//! assert_eq!(truncate("hello world", 8), "hello...");
//! assert_eq!(format_size(1536), "1.5 KiB");
//! ```

/// Shortens `s` to at most `max_chars` characters, ending in `...` when cut.
///
/// Counts characters, not bytes, so multi-byte text is never split.
pub fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some(_) if max_chars > 3 => {
            let end = s
                .char_indices()
                .nth(max_chars - 3)
                .map_or(s.len(), |(index, _)| index);
            format!("{}...", &s[..end])
        }
        Some((end, _)) => s[..end].to_string(),
    }
}

/// Formats a byte count with binary units.
///
/// # Example
///
/// ```rust
/// use repo_migrator::util::format_size;
///
/// assert_eq!(format_size(500), "500 B");
/// assert_eq!(format_size(250 * 1024 * 1024), "250.0 MiB");
/// ```
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
