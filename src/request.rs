//! Request and response types shared by the cache and the network.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Resolves a resource reference against a base URL.
///
/// Absolute URLs are returned as-is; relative ones (`/`, `index.html`) are
/// joined onto `base`. Only `http` and `https` results are accepted.
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] if the text does not parse or uses another scheme.
pub fn resolve_url(base: &Url, text: &str) -> Result<Url> {
    let url = base.join(text).map_err(|e| Error::InvalidUrl {
        url: text.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidUrl {
            url: text.to_string(),
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: Url,
    /// Request headers, forwarded to the network on a cache miss.
    pub headers: HeaderMap,
    /// Request body, forwarded to the network on a cache miss.
    pub body: Bytes,
}

impl Request {
    /// Creates a request with an explicit method and no headers.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a `GET` request.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a `GET` request for `text` resolved against `base`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the URL cannot be resolved.
    pub fn resolve(base: &Url, text: &str) -> Result<Self> {
        resolve_url(base, text).map(Self::get)
    }

    /// Adds headers to the request.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the identity used to store and look up this request.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(&self.method, &self.url)
    }
}

/// Request identity within a cache partition: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    method: String,
    url: String,
}

impl CacheKey {
    /// Builds a normalized key.
    #[must_use]
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The normalized URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether this key can be answered from a cache. Only `GET` is matched.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET.as_str()
    }

    /// A stable, filesystem-safe identifier for this key.
    #[must_use]
    pub fn file_id(&self) -> String {
        hashed_id(&format!("{} {}", self.method, self.url))
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// URL-safe base64 of the SHA-256 of `text`.
pub(crate) fn hashed_id(text: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(text.as_bytes()))
}

/// A response, either fresh from the network or stored in a cache partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Reason phrase, empty if unknown.
    pub status_text: String,
    /// Response headers in received order.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
    /// Final URL after redirects.
    pub url: String,
}

impl Response {
    /// Creates a response with no headers.
    #[must_use]
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: Vec::new(),
            body: body.into(),
            url: url.into(),
        }
    }

    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns the first header value with the given name, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
