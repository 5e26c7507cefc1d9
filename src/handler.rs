use crate::cache::{RouteTableCache, RoutingTable};
use crate::dispatch::{dispatch, target_url, Dispatch};
use crate::proxy::{stream_response, ProxyForwarder, UpstreamError};
use crate::rewrite::rewrite;
use crate::source::Route;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use url::Url;

/// What happens to a request no route claims.
#[derive(Debug, Clone)]
pub enum Fallthrough {
    /// Answer `404` with the list of known projects.
    NotFound { message: String },
    /// Forward the request unchanged to a static site.
    Origin(Url),
}

pub struct RouterState {
    pub cache: RouteTableCache,
    pub forwarder: ProxyForwarder,
    pub fallthrough: Fallthrough,
    pub allow_any_origin: bool,
}

/// Entry point for every inbound request.
pub async fn route_handler(
    State(state): State<Arc<RouterState>>,
    req: Request<Body>,
) -> Response {
    let table = state.cache.get_table().await;
    let path = req.uri().path().to_string();

    match dispatch(&path, &table) {
        Dispatch::Redirect(route) => {
            let target = target_url(&route.upstream, &route.prefix, &path, req.uri().query());
            tracing::info!("{} {} -> redirect {}", req.method(), path, target);
            (StatusCode::FOUND, [(header::LOCATION, target.as_str())]).into_response()
        }
        Dispatch::Proxy(route) => {
            tracing::info!("{} {} -> proxy {}", req.method(), path, route.origin);
            match proxy(&state, req, route).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(prefix = %route.prefix, "Upstream {} failed: {}", route.origin, e);
                    e.into_response()
                }
            }
        }
        Dispatch::None => {
            tracing::debug!("{} {} matched no route", req.method(), path);
            fallthrough(&state, req, &table).await
        }
    }
}

async fn proxy(
    state: &RouterState,
    req: Request<Body>,
    route: &Route,
) -> Result<Response, UpstreamError> {
    let upstream = state.forwarder.forward(req, route).await?;
    let mut response = rewrite(upstream, &route.origin).await?;

    if state.allow_any_origin {
        response.headers_mut().insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
    }

    Ok(response)
}

async fn fallthrough(state: &RouterState, req: Request<Body>, table: &RoutingTable) -> Response {
    match &state.fallthrough {
        Fallthrough::NotFound { message } => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": "Project not found",
                "availableProjects": table.prefixes(),
                "message": message,
            })),
        )
            .into_response(),
        Fallthrough::Origin(origin) => {
            let target = target_url(origin, "", req.uri().path(), req.uri().query());
            match state.forwarder.forward_to(req, target).await {
                Ok(upstream) => stream_response(upstream),
                Err(e) => {
                    tracing::error!("Fallthrough origin {} failed: {}", origin, e);
                    e.into_response()
                }
            }
        }
    }
}
