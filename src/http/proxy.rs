//! Streaming reverse proxy for the dumb-protocol file routes.
//!
//! Forwards the incoming request to a per-request CGI backend and streams
//! the response straight back. Bodies are never buffered; chunked framing is
//! left to the HTTP stacks on either side. `Content-Encoding` crosses
//! unmodified because `git http-backend` inflates gzip request bodies
//! itself.

use std::net::SocketAddr;

use anyhow::{Context as _, Result};
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderName};
use axum::response::Response;
use futures::StreamExt;
use tracing::{debug, instrument};

// ---------------------------------------------------------------------------
// Header filtering
// ---------------------------------------------------------------------------

// Hop-by-hop headers never cross the proxy in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Everything end-to-end except the client's `Authorization`, which the
/// gateway has already consumed. The original `Host` passes through.
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut outbound = HeaderMap::new();
    for (name, value) in headers {
        if is_hop_by_hop(name) || *name == header::AUTHORIZATION {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }
    outbound
}

// ---------------------------------------------------------------------------
// Forwarding
// ---------------------------------------------------------------------------

/// Forward `request` to the backend at `addr` under `path_and_query`,
/// streaming both bodies.
///
/// The upstream path is supplied by the caller, assembled from the
/// authorized repository identity; the inbound URI is never trusted here.
/// `guard` rides inside the response body stream and drops when the stream
/// ends or the client disconnects; the raw-file handler passes the
/// per-request backend handle here so its teardown waits for the response.
#[instrument(
    skip(client, request, guard),
    fields(%addr, method = %request.method(), path = %path_and_query)
)]
pub async fn forward<G>(
    client: &reqwest::Client,
    addr: SocketAddr,
    path_and_query: &str,
    request: Request,
    guard: G,
) -> Result<Response>
where
    G: Send + 'static,
{
    let (parts, body) = request.into_parts();

    let url = format!("http://{addr}{path_and_query}");

    let upstream = client
        .request(parts.method, &url)
        .headers(forwardable_headers(&parts.headers))
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await
        .with_context(|| format!("failed to reach CGI backend at {addr}"))?;

    debug!(status = %upstream.status(), "backend responded");

    let mut response = Response::builder().status(upstream.status());
    for (name, value) in upstream.headers() {
        if is_hop_by_hop(name) {
            continue;
        }
        response = response.header(name, value);
    }

    let body_stream = upstream.bytes_stream().map(move |chunk| {
        let _backend = &guard;
        chunk
    });
    response
        .body(Body::from_stream(body_stream))
        .context("failed to assemble proxied response")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
