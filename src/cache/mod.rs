//! Named cache partitions mapping request identity to stored responses.
//!
//! [`CacheStorage`] is the backend seam: [`MemoryCacheStorage`] keeps
//! everything in process, [`DiskCacheStorage`] survives restarts. [`Cache`]
//! is a view of one partition with the fetch-and-store batch used by install.

mod disk;
mod memory;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};

use crate::error::{Error, Result};
use crate::network::Network;
use crate::request::{CacheKey, Request, Response};
use crate::worker::InstallProgress;

pub use disk::DiskCacheStorage;
pub use memory::MemoryCacheStorage;

/// Storage for named cache partitions.
///
/// Partitions are kept in creation order; [`match_any`](Self::match_any)
/// searches them in that order.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens the named partition, creating it if absent.
    async fn open(&self, name: &str) -> Result<()>;

    /// Returns whether the named partition exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Deletes the named partition. Returns `false` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Lists partition names in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Lists the request keys stored in a partition.
    async fn entries(&self, name: &str) -> Result<Vec<CacheKey>>;

    /// Stores every entry or none of them. Later entries overwrite earlier
    /// ones with the same key.
    async fn put_all(&self, name: &str, entries: Vec<(CacheKey, Response)>) -> Result<()>;

    /// Looks up a key in one partition. A missing partition is a miss.
    async fn match_in(&self, name: &str, key: &CacheKey) -> Result<Option<Response>>;

    /// Stores a single entry.
    async fn put(&self, name: &str, key: CacheKey, response: Response) -> Result<()> {
        self.put_all(name, vec![(key, response)]).await
    }

    /// Looks up a key across every partition, oldest partition first.
    async fn match_any(&self, key: &CacheKey) -> Result<Option<Response>> {
        for name in self.keys().await? {
            if let Some(response) = self.match_in(&name, key).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }
}

/// Outcome of a successful [`Cache::add_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Number of entries stored.
    pub entries: usize,
    /// Total body bytes stored.
    pub bytes: u64,
}

/// An open cache partition.
pub struct Cache<'a, S: CacheStorage + ?Sized> {
    storage: &'a S,
    name: String,
}

impl<'a, S: CacheStorage + ?Sized> Cache<'a, S> {
    /// Opens (creating if absent) the named partition.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot create the partition.
    pub async fn open(storage: &'a S, name: &str) -> Result<Self> {
        storage.open(name).await?;
        Ok(Self {
            storage,
            name: name.to_string(),
        })
    }

    /// The partition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a request in this partition. Non-`GET` requests never match.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub async fn match_request(&self, request: &Request) -> Result<Option<Response>> {
        let key = request.cache_key();
        if !key.is_cacheable() {
            return Ok(None);
        }
        self.storage.match_in(&self.name, &key).await
    }

    /// Stores a response for a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    pub async fn put(&self, request: &Request, response: Response) -> Result<()> {
        self.storage
            .put(&self.name, request.cache_key(), response)
            .await
    }

    /// Lists the stored request keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition is gone or unreadable.
    pub async fn keys(&self) -> Result<Vec<CacheKey>> {
        self.storage.entries(&self.name).await
    }

    /// Fetches every request and stores all responses as one batch.
    ///
    /// Fetches run concurrently, at most `concurrency` at a time, in no
    /// particular order. The first network failure or non-2xx status aborts
    /// the batch and nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Install`] naming the failing URL, or a storage error.
    pub async fn add_all<N: Network + ?Sized>(
        &self,
        network: &N,
        requests: Vec<Request>,
        concurrency: usize,
        progress: &dyn InstallProgress,
    ) -> Result<BatchStats> {
        let entries: Vec<(CacheKey, Response)> = stream::iter(requests)
            .map(|request| async move {
                let url = request.url.to_string();
                progress.on_fetch_start(&url);
                match fetch_ok(network, &request).await {
                    Ok(response) => {
                        progress.on_fetch_complete(&url, response.body.len() as u64);
                        Ok((request.cache_key(), response))
                    }
                    Err(e) => {
                        progress.on_error(&url, &e.to_string());
                        Err(Error::Install {
                            url,
                            source: Box::new(e),
                        })
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await?;

        let stats = BatchStats {
            entries: entries.len(),
            bytes: entries.iter().map(|(_, r)| r.body.len() as u64).sum(),
        };
        self.storage.put_all(&self.name, entries).await?;
        Ok(stats)
    }
}

/// Fetches a request and rejects non-2xx responses.
async fn fetch_ok<N: Network + ?Sized>(network: &N, request: &Request) -> Result<Response> {
    let response = network.fetch(request).await?;
    if response.is_ok() {
        Ok(response)
    } else {
        Err(Error::Status {
            url: request.url.to_string(),
            status: response.status,
        })
    }
}
