//! HTML base-tag injection for proxied responses.
//!
//! A proxied app writes its asset URLs relative to its own origin. Serving
//! it under a prefix breaks them, so HTML documents get a
//! `<base href="{origin}">` right after `<head>`. Everything else streams
//! through untouched.

use crate::proxy::{stream_response, strip_hop_by_hop, UpstreamError};
use axum::{
    body::Body,
    http::{header, HeaderMap, Response, StatusCode},
};
use std::io::Read;

pub async fn rewrite(
    response: reqwest::Response,
    origin: &str,
) -> Result<Response<Body>, UpstreamError> {
    if !is_html(response.headers()) {
        return Ok(stream_response(response));
    }

    let encoding = content_encoding(response.headers());
    if !can_decode(encoding.as_deref()) {
        tracing::warn!(
            encoding = encoding.as_deref().unwrap_or_default(),
            "Cannot decode HTML body, passing it through without a base tag"
        );
        return Ok(stream_response(response));
    }

    let status = response.status();
    let mut headers = strip_hop_by_hop(response.headers());
    let raw = response
        .bytes()
        .await
        .map_err(|e| UpstreamError::Body(e.to_string()))?;

    // HEAD replies, 204s and 304s carry no document to fix.
    if raw.is_empty() {
        return Ok(build(status, headers, Body::empty()));
    }

    let decoded = match decode(&raw, encoding.as_deref()) {
        Ok(decoded) => decoded,
        Err(e) => {
            tracing::warn!(
                encoding = encoding.as_deref().unwrap_or_default(),
                "Failed to decode HTML body, passing it through without a base tag: {}",
                e
            );
            return Ok(build(status, headers, Body::from(raw)));
        }
    };
    let html = inject_base_tag(&String::from_utf8_lossy(&decoded), origin);

    // The body is re-sent as plain text; the old framing no longer applies.
    headers.remove(header::CONTENT_ENCODING);
    headers.remove(header::CONTENT_LENGTH);

    Ok(build(status, headers, Body::from(html)))
}

fn build(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

pub fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("text/html"))
        .unwrap_or(false)
}

/// Insert the base tag after the first `<head>`, else the first `<HEAD>`,
/// else at the very start of the document.
pub fn inject_base_tag(html: &str, origin: &str) -> String {
    let base_tag = format!("<base href=\"{}\">", origin.replace('"', "&quot;"));

    for head in ["<head>", "<HEAD>"] {
        if let Some(pos) = html.find(head) {
            let at = pos + head.len();
            return format!("{}{}{}", &html[..at], base_tag, &html[at..]);
        }
    }

    format!("{base_tag}{html}")
}

fn content_encoding(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

fn can_decode(encoding: Option<&str>) -> bool {
    matches!(
        encoding,
        None | Some("identity") | Some("gzip") | Some("x-gzip") | Some("deflate") | Some("br")
    )
}

fn decode(raw: &[u8], encoding: Option<&str>) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    match encoding {
        Some("gzip") | Some("x-gzip") => {
            flate2::read::GzDecoder::new(raw).read_to_end(&mut out)?;
        }
        Some("deflate") => {
            // Servers disagree on whether "deflate" is zlib-wrapped.
            if flate2::read::ZlibDecoder::new(raw)
                .read_to_end(&mut out)
                .is_err()
            {
                out.clear();
                flate2::read::DeflateDecoder::new(raw).read_to_end(&mut out)?;
            }
        }
        Some("br") => {
            brotli::Decompressor::new(raw, 4096).read_to_end(&mut out)?;
        }
        _ => out.extend_from_slice(raw),
    }
    Ok(out)
}
