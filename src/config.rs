use crate::source::{ProjectRecord, Route};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub routes: RoutesConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub fallthrough: FallthroughConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,

    pub control_auth: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutesConfig {
    /// JSON document listing the projects. When absent, `static` is used.
    pub source_url: Option<String>,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Seconds to keep serving a stale table after a failed fetch
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,

    #[serde(default, rename = "static")]
    pub static_routes: Vec<StaticRoute>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticRoute {
    pub prefix: String,
    pub upstream: String,
    #[serde(default = "default_proxied")]
    pub proxied: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Seconds to wait for an upstream's response headers
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Add `Access-Control-Allow-Origin: *` to proxied responses
    #[serde(default)]
    pub allow_any_origin: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FallthroughConfig {
    /// Where unmatched requests go. Without it they get a JSON 404.
    pub origin: Option<String>,

    #[serde(default = "default_not_found_message")]
    pub not_found_message: String,
}

fn default_control_port() -> u16 {
    17809
}

fn default_proxy_port() -> u16 {
    3000
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_retry_secs() -> u64 {
    30
}

fn default_proxied() -> bool {
    true
}

fn default_upstream_timeout_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    3
}

fn default_not_found_message() -> String {
    "No project is served at this path".to_string()
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.routes.cache_ttl_secs == 0 {
            bail!("routes.cache_ttl_secs must be greater than zero");
        }
        if self.upstream.timeout_secs == 0 {
            bail!("upstream.timeout_secs must be greater than zero");
        }
        if let Some(url) = &self.routes.source_url {
            parse_absolute(url).context("routes.source_url")?;
        }
        if let Some(origin) = &self.fallthrough.origin {
            parse_absolute(origin).context("fallthrough.origin")?;
        }
        for entry in &self.routes.static_routes {
            if let Err(reason) = Route::new(&entry.prefix, &entry.upstream, entry.proxied) {
                bail!("routes.static entry {}: {}", entry.prefix, reason);
            }
        }
        Ok(())
    }

    pub fn source_url(&self) -> Result<Option<Url>> {
        self.routes
            .source_url
            .as_deref()
            .map(parse_absolute)
            .transpose()
    }

    pub fn fallthrough_origin(&self) -> Result<Option<Url>> {
        self.fallthrough
            .origin
            .as_deref()
            .map(parse_absolute)
            .transpose()
    }

    pub fn static_records(&self) -> Vec<ProjectRecord> {
        self.routes
            .static_routes
            .iter()
            .map(|r| ProjectRecord::new(&r.prefix, &r.upstream, Some(r.proxied)))
            .collect()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.routes.cache_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.routes.fetch_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.routes.retry_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.connect_timeout_secs)
    }
}

fn parse_absolute(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid URL {raw:?}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("{raw:?} is not an http(s) URL");
    }
    Ok(url)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            control_port: default_control_port(),
            proxy_port: default_proxy_port(),
            control_auth: None,
        }
    }
}

impl Default for RoutesConfig {
    fn default() -> Self {
        Self {
            source_url: None,
            cache_ttl_secs: default_cache_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            retry_secs: default_retry_secs(),
            static_routes: Vec::new(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_upstream_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            allow_any_origin: false,
        }
    }
}

impl Default for FallthroughConfig {
    fn default() -> Self {
        Self {
            origin: None,
            not_found_message: default_not_found_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.proxy_port, 3000);
        assert_eq!(config.server.control_port, 17809);
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.upstream_timeout(), Duration::from_secs(5));
        assert_eq!(config.retry_backoff(), Duration::from_secs(30));
        assert!(config.routes.source_url.is_none());
        assert!(config.fallthrough.origin.is_none());
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml(
            r#"
            [server]
            proxy_port = 8080
            control_auth = "secret"

            [routes]
            source_url = "https://srirams.me/labs-projects.json"
            cache_ttl_secs = 3600

            [[routes.static]]
            prefix = "/aic"
            upstream = "https://aic.pages.dev"

            [[routes.static]]
            prefix = "/blog"
            upstream = "https://blog.example"
            proxied = false

            [upstream]
            allow_any_origin = true

            [fallthrough]
            origin = "https://static.example"
            not_found_message = "Visit https://labs.srirams.me"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.proxy_port, 8080);
        assert_eq!(config.server.control_auth.as_deref(), Some("secret"));
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert!(config.upstream.allow_any_origin);
        assert_eq!(
            config.source_url().unwrap().unwrap().as_str(),
            "https://srirams.me/labs-projects.json"
        );

        let records = config.static_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].is_proxied, Some(true));
        assert_eq!(records[1].is_proxied, Some(false));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(Config::from_toml("[routes]\ncache_ttl_secs = 0").is_err());
        assert!(Config::from_toml("[upstream]\ntimeout_secs = 0").is_err());
        assert!(Config::from_toml("[routes]\nsource_url = \"not a url\"").is_err());
        assert!(Config::from_toml("[fallthrough]\norigin = \"ftp://files.example\"").is_err());
        assert!(Config::from_toml(
            "[[routes.static]]\nprefix = \"aic\"\nupstream = \"https://aic.pages.dev\""
        )
        .is_err());
    }
}
