// src/utils/mod.rs

//! Utility functions and helpers.

pub mod csv;
pub mod http;
pub mod log;

use url::Url;

use crate::error::{AppError, Result};

/// Placeholder replaced by the serial id in endpoint templates.
pub const SN_PLACEHOLDER: &str = "{sn}";

/// Build a request URL from a template by substituting the serial id.
///
/// Repeated slashes in the path are collapsed.
pub fn build_url(template: &str, key: u64) -> Result<Url> {
    let raw = template.replace(SN_PLACEHOLDER, &key.to_string());
    let mut url = Url::parse(&raw)?;
    if url.cannot_be_a_base() {
        return Err(AppError::config(format!("not a page URL: {raw}")));
    }
    let path = collapse_slashes(url.path());
    url.set_path(&path);
    Ok(url)
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for ch in path.chars() {
        if ch == '/' && previous_slash {
            continue;
        }
        previous_slash = ch == '/';
        out.push(ch);
    }
    out
}

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Whether two URLs point at the same path on the same host.
pub fn same_page(a: &Url, b: &str) -> bool {
    Url::parse(b)
        .map(|b| a.host_str() == b.host_str() && a.path() == b.path())
        .unwrap_or(false)
}
