//! Route discovery.
//!
//! A [`RouteSource`] yields the raw project list the routing table is built
//! from. [`HttpRouteSource`] reads a JSON array from a remote document,
//! [`StaticRouteSource`] serves a fixed list from configuration.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("route document request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("route document returned status {0}")]
    Status(StatusCode),

    #[error("route document is malformed: {0}")]
    Malformed(String),
}

/// One element of the route document.
///
/// Unknown fields are ignored. `labUrl` and `pagesWorkerUrl` are required
/// for the record to become a [`Route`], but their absence is not a
/// deserialization error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    #[serde(default)]
    pub lab_url: Option<String>,
    #[serde(default)]
    pub pages_worker_url: Option<String>,
    #[serde(default)]
    pub is_proxied: Option<bool>,
}

impl ProjectRecord {
    pub fn new(lab_url: &str, pages_worker_url: &str, is_proxied: Option<bool>) -> Self {
        Self {
            lab_url: Some(lab_url.to_string()),
            pages_worker_url: Some(pages_worker_url.to_string()),
            is_proxied,
        }
    }

    /// Convert into a routing entry, or explain why the record is unusable.
    pub fn into_route(self) -> Result<Route, String> {
        let prefix = self
            .lab_url
            .filter(|p| !p.is_empty())
            .ok_or_else(|| "missing labUrl".to_string())?;
        let origin = self
            .pages_worker_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| "missing pagesWorkerUrl".to_string())?;

        Route::new(&prefix, &origin, self.is_proxied.unwrap_or(true))
    }
}

/// A prefix mapped to the deployment that serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    /// Leading path segment, e.g. `/aic`. Never ends with `/`.
    pub prefix: String,
    /// Upstream origin exactly as the source wrote it; used for `<base href>`.
    pub origin: String,
    #[serde(skip)]
    pub upstream: Url,
    pub proxied: bool,
}

impl Route {
    pub fn new(prefix: &str, origin: &str, proxied: bool) -> Result<Self, String> {
        if !prefix.starts_with('/') {
            return Err(format!("prefix {prefix:?} does not start with '/'"));
        }
        let trimmed = prefix.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err("prefix must name at least one path segment".to_string());
        }

        let upstream = Url::parse(origin).map_err(|e| format!("upstream {origin:?}: {e}"))?;
        if upstream.cannot_be_a_base() || !matches!(upstream.scheme(), "http" | "https") {
            return Err(format!("upstream {origin:?} is not an absolute http(s) URL"));
        }

        Ok(Self {
            prefix: trimmed.to_string(),
            origin: origin.to_string(),
            upstream,
            proxied,
        })
    }
}

#[async_trait]
pub trait RouteSource: Send + Sync {
    async fn fetch_projects(&self) -> Result<Vec<ProjectRecord>, FetchError>;

    /// Human readable location of the source, for logs.
    fn describe(&self) -> String;
}

/// Fetches the project list from a JSON document over HTTP.
pub struct HttpRouteSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpRouteSource {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl RouteSource for HttpRouteSource {
    async fn fetch_projects(&self) -> Result<Vec<ProjectRecord>, FetchError> {
        let response = self.client.get(self.url.clone()).send().await?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status()));
        }

        let body = response.bytes().await?;
        parse_projects(&body)
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

/// Parse a route document. The whole payload must be a JSON array; elements
/// that are not objects of the expected shape are dropped individually.
pub fn parse_projects(body: &[u8]) -> Result<Vec<ProjectRecord>, FetchError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    let serde_json::Value::Array(elements) = value else {
        return Err(FetchError::Malformed("expected a JSON array".to_string()));
    };

    let mut records = Vec::with_capacity(elements.len());
    for (index, element) in elements.into_iter().enumerate() {
        match serde_json::from_value::<ProjectRecord>(element) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(index, "Skipping unreadable project record: {}", e),
        }
    }

    Ok(records)
}

/// A fixed project list. Never fails and costs nothing to query.
#[derive(Debug, Clone, Default)]
pub struct StaticRouteSource {
    records: Vec<ProjectRecord>,
}

impl StaticRouteSource {
    pub fn new(records: Vec<ProjectRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl RouteSource for StaticRouteSource {
    async fn fetch_projects(&self) -> Result<Vec<ProjectRecord>, FetchError> {
        Ok(self.records.clone())
    }

    fn describe(&self) -> String {
        format!("static list ({} entries)", self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_projects_defaults_and_extra_fields() {
        let body = br#"[
            {"name": "Time Capsule", "labUrl": "/timecapsule", "pagesWorkerUrl": "https://timecapsule-d3y.pages.dev"},
            {"labUrl": "/aic", "pagesWorkerUrl": "https://aic.pages.dev", "isProxied": false},
            {"labUrl": "/draft"}
        ]"#;

        let records = parse_projects(body).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].is_proxied, None);
        assert_eq!(records[1].is_proxied, Some(false));
        assert_eq!(records[2].pages_worker_url, None);
    }

    #[test]
    fn test_parse_projects_skips_unreadable_elements() {
        let body = br#"[42, {"labUrl": 7}, {"labUrl": "/ok", "pagesWorkerUrl": "https://ok.dev"}]"#;
        let records = parse_projects(body).unwrap();
        assert_eq!(records, vec![ProjectRecord::new("/ok", "https://ok.dev", None)]);
    }

    #[test]
    fn test_parse_projects_rejects_non_array() {
        assert!(matches!(
            parse_projects(br#"{"labUrl": "/x"}"#),
            Err(FetchError::Malformed(_))
        ));
        assert!(matches!(
            parse_projects(b"<html>not json</html>"),
            Err(FetchError::Malformed(_))
        ));
    }

    #[test]
    fn test_into_route() {
        let route = ProjectRecord::new("/aic/", "https://u.pages.dev", None)
            .into_route()
            .unwrap();
        assert_eq!(route.prefix, "/aic");
        assert_eq!(route.origin, "https://u.pages.dev");
        assert!(route.proxied);

        assert!(ProjectRecord::default().into_route().is_err());
        assert!(ProjectRecord::new("aic", "https://u.pages.dev", None)
            .into_route()
            .is_err());
        assert!(ProjectRecord::new("/", "https://u.pages.dev", None)
            .into_route()
            .is_err());
        assert!(ProjectRecord::new("/aic", "not a url", None)
            .into_route()
            .is_err());
        assert!(ProjectRecord::new("/aic", "mailto:a@b.c", None)
            .into_route()
            .is_err());
    }

    #[tokio::test]
    async fn test_http_source_fetches_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/labs-projects.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"[{"labUrl": "/aic", "pagesWorkerUrl": "https://aic.pages.dev"}]"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/labs-projects.json", server.uri())).unwrap();
        let source = HttpRouteSource::new(url, Duration::from_secs(5)).unwrap();

        let records = source.fetch_projects().await.unwrap();
        assert_eq!(records, vec![ProjectRecord::new("/aic", "https://aic.pages.dev", None)]);
    }

    #[tokio::test]
    async fn test_http_source_non_200_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let source = HttpRouteSource::new(url, Duration::from_secs(5)).unwrap();

        match source.fetch_projects().await {
            Err(FetchError::Status(status)) => assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE),
            other => panic!("expected status error, got {other:?}"),
        }
    }
}
