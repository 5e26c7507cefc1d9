use crate::cache::{RouteTableCache, RoutingTable};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct ControlState {
    cache: RouteTableCache,
    auth_token: Option<String>,
}

impl ControlState {
    pub fn new(cache: RouteTableCache, auth_token: Option<String>) -> Self {
        Self { cache, auth_token }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), StatusCode> {
        let Some(required_token) = &self.auth_token else {
            return Ok(());
        };

        let auth_header = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let expected = format!("Bearer {}", required_token);

        if auth_header != Some(expected.as_str()) {
            tracing::warn!("Unauthorized control request");
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(())
    }
}

/// Handler for POST /refresh-routes endpoint
async fn refresh_routes_handler(
    State(state): State<Arc<ControlState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    state.authorize(&headers)?;

    let table = state.cache.refresh().await;
    tracing::info!("Route refresh triggered via control endpoint");

    Ok(Json(json!({
        "redirect": table.redirect.len(),
        "proxy": table.proxy.len(),
    })))
}

/// Handler for GET /routes endpoint
async fn routes_handler(
    State(state): State<Arc<ControlState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    state.authorize(&headers)?;

    let snapshot = state.cache.snapshot();
    let age_secs = snapshot.as_ref().map(|r| r.fetched_at.elapsed().as_secs());
    let empty = RoutingTable::default();
    let table = snapshot.as_ref().map(|r| r.table.as_ref()).unwrap_or(&empty);

    Ok(Json(json!({
        "ageSecs": age_secs,
        "ttlSecs": state.cache.ttl().as_secs(),
        "redirect": table.redirect,
        "proxy": table.proxy,
    })))
}

/// Create the control server router
pub fn create_control_router(cache: RouteTableCache, auth_token: Option<String>) -> Router {
    let state = Arc::new(ControlState::new(cache, auth_token));

    Router::new()
        .route("/refresh-routes", post(refresh_routes_handler))
        .route("/routes", get(routes_handler))
        .with_state(state)
}
