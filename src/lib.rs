pub mod cache;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod handler;
pub mod proxy;
pub mod rewrite;
pub mod source;

use axum::Router;
use cache::RouteTableCache;
use config::Config;
use handler::{Fallthrough, RouterState};
use proxy::ProxyForwarder;
use source::{HttpRouteSource, RouteSource, StaticRouteSource};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// The main library interface for using lab-router as a library.
/// Returns the routing service and a handle on its route table cache.
pub fn create_router(config: &Config) -> anyhow::Result<(Router, RouteTableCache)> {
    let (source, ttl): (Arc<dyn RouteSource>, Duration) = match config.source_url()? {
        Some(url) => (
            Arc::new(HttpRouteSource::new(url, config.fetch_timeout())?) as Arc<dyn RouteSource>,
            config.cache_ttl(),
        ),
        // A fixed list never goes stale.
        None => (
            Arc::new(StaticRouteSource::new(config.static_records())) as Arc<dyn RouteSource>,
            Duration::MAX,
        ),
    };

    let cache = RouteTableCache::with_retry_backoff(source, ttl, config.retry_backoff());
    let app = create_router_with_cache(config, cache.clone())?;

    Ok((app, cache))
}

/// Create the routing service around an existing cache
pub fn create_router_with_cache(config: &Config, cache: RouteTableCache) -> anyhow::Result<Router> {
    let forwarder = ProxyForwarder::new(config.upstream_timeout(), config.connect_timeout())?;

    let fallthrough = match config.fallthrough_origin()? {
        Some(origin) => Fallthrough::Origin(origin),
        None => Fallthrough::NotFound {
            message: config.fallthrough.not_found_message.clone(),
        },
    };

    let state = Arc::new(RouterState {
        cache,
        forwarder,
        fallthrough,
        allow_any_origin: config.upstream.allow_any_origin,
    });

    Ok(Router::new()
        .fallback(handler::route_handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_router_from_static_config() {
        let config = Config::from_toml(
            "[[routes.static]]\nprefix = \"/aic\"\nupstream = \"https://aic.pages.dev\"",
        )
        .unwrap();

        let (_app, cache) = create_router(&config).unwrap();
        assert_eq!(cache.ttl(), Duration::MAX);

        let table = cache.get_table().await;
        assert!(table.proxy.contains_key("/aic"));
    }
}
