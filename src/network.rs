//! Network access for cache misses and pre-caching.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::request::{Request, Response};

/// Abstraction over the network for testability.
#[async_trait]
pub trait Network: Send + Sync {
    /// Performs the request and returns the response as received.
    ///
    /// Any HTTP status is a successful fetch; only transport failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Default network implementation using `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestNetwork {
    client: reqwest::Client,
}

impl ReqwestNetwork {
    /// Creates a network with a client tuned for many small asset requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Network for ReqwestNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        log::debug!("Network fetch {} {}", request.method, request.url);
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        let resp = builder.send().await?;

        let status = resp.status();
        let url = resp.url().to_string();
        let headers = resp
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = resp.bytes().await?;

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reqwest_network_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReqwestNetwork>();
    }

    #[tokio::test]
    async fn unreachable_host_is_an_error() {
        let network = ReqwestNetwork::new().unwrap();
        // Port 9 (discard) on loopback is closed in any sane test environment.
        let url = reqwest::Url::parse("http://127.0.0.1:9/").unwrap();
        assert!(network.fetch(&Request::get(url)).await.is_err());
    }
}
