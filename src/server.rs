//! HTTP host that answers every request through the worker.
//!
//! The path and query of each incoming request are resolved against the
//! worker's base URL, so pointing a browser at the host serves the
//! application cache-first. Targets that resolve outside the base URL's
//! origin or path are refused without touching the cache or the network.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use reqwest::Url;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::CacheStorage;
use crate::error::{Error, Result};
use crate::network::Network;
use crate::request::{Request, Response};
use crate::worker::{ResponseSource, ServiceWorker};

/// Largest request body forwarded to the network.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Header added to every answered response naming its source.
pub const SOURCE_HEADER: &str = "x-latexer-sw-source";

/// Connection-level headers that must not be copied between hops.
const HOP_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_header(name: &str) -> bool {
    HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Whether `url` has the base URL's scheme, host and port and sits under its
/// directory.
fn within_base(base: &Url, url: &Url) -> bool {
    let path = base.path();
    let scope = path.rfind('/').map_or("/", |i| &path[..=i]);
    url.scheme() == base.scheme()
        && url.host_str() == base.host_str()
        && url.port_or_known_default() == base.port_or_known_default()
        && url.path().starts_with(scope)
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
    let header_value =
        HeaderValue::from_str(value).map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
    Ok((header_name, header_value))
}

/// Builds the router for a worker.
pub fn router<S, N>(worker: Arc<ServiceWorker<S, N>>) -> Router
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .fallback(intercept::<S, N>)
        .layer(cors)
        .with_state(worker)
}

async fn intercept<S, N>(
    State(worker): State<Arc<ServiceWorker<S, N>>>,
    req: axum::extract::Request,
) -> HttpResponse
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    let (parts, body) = req.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map_or("/", axum::http::uri::PathAndQuery::as_str);

    let url = match worker.base_url().join(target.trim_start_matches('/')) {
        Ok(url) => url,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    if !within_base(worker.base_url(), &url) {
        log::warn!("Refusing {url}: outside {}", worker.base_url());
        return (StatusCode::NOT_FOUND, "outside the application origin").into_response();
    }
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };

    let mut headers = HeaderMap::new();
    for (name, value) in &parts.headers {
        if !is_hop_header(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    let request = Request::new(parts.method, url)
        .with_headers(headers)
        .with_body(body);

    match worker.handle_fetch(&request).await {
        Ok(outcome) => to_http(outcome.response, outcome.source),
        Err(e) => {
            log::error!("Fetch failed for {}: {e}", request.url);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Converts a worker response into an HTTP response.
fn to_http(response: Response, source: ResponseSource) -> HttpResponse {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut http = HttpResponse::new(Body::from(response.body));
    *http.status_mut() = status;

    let headers = http.headers_mut();
    for (name, value) in &response.headers {
        if is_hop_header(name) {
            continue;
        }
        match header_pair(name, value) {
            Ok((name, value)) => {
                headers.append(name, value);
            }
            Err(e) => log::warn!("Dropping response header: {e}"),
        }
    }
    let tag = match source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
    };
    headers.insert(SOURCE_HEADER, HeaderValue::from_static(tag));
    http
}

/// Serves the worker on `listener` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve<S, N>(
    listener: TcpListener,
    worker: Arc<ServiceWorker<S, N>>,
    shutdown: CancellationToken,
) -> Result<()>
where
    S: CacheStorage + 'static,
    N: Network + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("Serving {} on http://{addr}", worker.base_url());
    }
    axum::serve(listener, router(Arc::clone(&worker)))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("Server stopped: {}", worker.counters().snapshot());
    Ok(())
}
