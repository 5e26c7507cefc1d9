//! Prefix dispatch
//!
//! A prefix `/p` matches the path `/p` itself and anything below `/p/`.
//! It never matches `/px`.
//! Redirect routes are consulted before proxy routes; within a partition the
//! longest matching prefix wins.

use crate::cache::RoutingTable;
use crate::source::Route;
use std::collections::HashMap;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch<'a> {
    Redirect(&'a Route),
    Proxy(&'a Route),
    None,
}

pub fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

pub fn dispatch<'a>(path: &str, table: &'a RoutingTable) -> Dispatch<'a> {
    if let Some(route) = longest_match(path, &table.redirect) {
        return Dispatch::Redirect(route);
    }
    if let Some(route) = longest_match(path, &table.proxy) {
        return Dispatch::Proxy(route);
    }
    Dispatch::None
}

fn longest_match<'a>(path: &str, routes: &'a HashMap<String, Route>) -> Option<&'a Route> {
    // Matching prefixes of equal length are equal strings, and keys are
    // unique, so the maximum is unambiguous.
    routes
        .values()
        .filter(|route| matches_prefix(path, &route.prefix))
        .max_by_key(|route| route.prefix.len())
}

/// Remove `prefix` from the front of `path`. An empty remainder becomes `/`.
pub fn strip_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    match path.strip_prefix(prefix) {
        Some("") | None => "/",
        Some(rest) => rest,
    }
}

/// The URL a request for `path?query` under `prefix` is sent to.
///
/// The upstream's own path is replaced, and its query is overwritten by the
/// request's (cleared when the request has none).
pub fn target_url(upstream: &Url, prefix: &str, path: &str, query: Option<&str>) -> Url {
    let mut target = upstream.clone();
    target.set_path(strip_prefix(path, prefix));
    target.set_query(query);
    target
}
