//! latexer-sw - Offline asset cache for the LaTeXer web application.
//!
//! On install, a fixed list of static assets is fetched and stored in a named
//! cache partition as one all-or-nothing batch. Afterwards every request is
//! answered from the cache when possible and from the network otherwise.
//!
//! # Example
//!
//! ```no_run
//! use latexer_sw::{DiskCacheStorage, NoProgress, ReqwestNetwork, ServiceWorker, WorkerConfig};
//!
//! # async fn example() -> latexer_sw::Result<()> {
//! let config = WorkerConfig::default().with_base_url("https://latexer.example/");
//! let storage = DiskCacheStorage::new("/var/cache/latexer-sw");
//! let mut worker = ServiceWorker::new(config, storage, ReqwestNetwork::new()?)?;
//!
//! // Pre-cache every asset, then drop caches left by older versions
//! let stats = worker.install(&NoProgress).await?;
//! worker.activate().await?;
//! println!("Cached {} assets", stats.entries);
//!
//! // Answer a request cache-first
//! let outcome = worker.handle_fetch(&worker.request("index.html")?).await?;
//! println!("{} from {:?}", outcome.response.status, outcome.source);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod network;
pub mod request;
#[cfg(feature = "server")]
pub mod server;
pub mod stats;
pub mod worker;

// Re-export main types for convenience
pub use cache::{BatchStats, Cache, CacheStorage, DiskCacheStorage, MemoryCacheStorage};
pub use config::{AppConfig, MatchScope, PathConfig, ServerConfig, WorkerConfig};
pub use error::{Error, Result};
pub use network::{Network, ReqwestNetwork};
pub use request::{CacheKey, Request, Response, resolve_url};
pub use stats::{FetchCounters, FetchSnapshot, InstallStats};
pub use worker::{
    FetchOutcome, InstallProgress, NoProgress, ResponseSource, ServiceWorker, WorkerState,
};
