use crate::dispatch::target_url;
use crate::source::Route;
use axum::{
    body::{Body, HttpBody},
    http::{header, HeaderMap, HeaderName, Request, Response, StatusCode},
    response::IntoResponse,
};
use std::time::Duration;
use url::Url;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [HeaderName; 5] = [
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("failed to read upstream body: {0}")]
    Body(String),
}

impl UpstreamError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::Transport(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Sends requests on to upstream deployments.
///
/// Upstream redirects are handed back to the caller untouched, and the
/// time allowed for response headers is bounded. Bodies stream in both
/// directions.
#[derive(Clone)]
pub struct ProxyForwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl ProxyForwarder {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self { client, timeout })
    }

    /// Forward `req` to the deployment behind `route`, with the route's
    /// prefix stripped from the path.
    pub async fn forward(
        &self,
        req: Request<Body>,
        route: &Route,
    ) -> Result<reqwest::Response, UpstreamError> {
        let target = target_url(
            &route.upstream,
            &route.prefix,
            req.uri().path(),
            req.uri().query(),
        );
        self.forward_to(req, target).await
    }

    /// Forward `req` unchanged except for its destination.
    pub async fn forward_to(
        &self,
        req: Request<Body>,
        target: Url,
    ) -> Result<reqwest::Response, UpstreamError> {
        let (parts, body) = req.into_parts();
        tracing::debug!("Forwarding {} to {}", parts.method, target);

        let mut outbound = self
            .client
            .request(parts.method, target)
            .headers(forward_headers(&parts.headers));

        // An empty body stays empty rather than turning into a chunked one.
        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        match tokio::time::timeout(self.timeout, outbound.send()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(UpstreamError::Timeout(self.timeout)),
        }
    }
}

/// Copy request headers for the outbound request. `Host` is derived from
/// the target URL instead.
fn forward_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = strip_hop_by_hop(headers);
    forwarded.remove(header::HOST);
    forwarded
}

pub(crate) fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut stripped = headers.clone();
    for name in &HOP_BY_HOP {
        stripped.remove(name);
    }
    stripped.remove("keep-alive");
    stripped.remove("proxy-connection");
    stripped
}

/// Turn an upstream response into a downstream one without buffering it.
pub fn stream_response(response: reqwest::Response) -> Response<Body> {
    let mut downstream = Response::new(Body::empty());
    *downstream.status_mut() = response.status();
    *downstream.headers_mut() = strip_hop_by_hop(response.headers());
    *downstream.body_mut() = Body::from_stream(response.bytes_stream());
    downstream
}
