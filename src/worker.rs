//! The offline worker: install, activation and fetch interception.

use std::time::Instant;

use reqwest::Url;

use crate::cache::{Cache, CacheStorage, DiskCacheStorage};
use crate::config::{MatchScope, WorkerConfig};
use crate::error::{Error, Result};
use crate::network::{Network, ReqwestNetwork};
use crate::request::{Request, Response};
use crate::stats::{FetchCounters, InstallStats};

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, install not yet attempted.
    Parsed,
    /// Pre-caching in progress.
    Installing,
    /// Pre-cache batch stored, waiting to activate.
    Installed,
    /// Stale partitions being swept.
    Activating,
    /// Active and controlling requests.
    Activated,
    /// Install failed; the worker will never activate.
    Redundant,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Parsed => "parsed",
            Self::Installing => "installing",
            Self::Installed => "installed",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Trait for receiving install progress updates.
///
/// All methods have default no-op implementations for convenience.
/// Fetches run concurrently, so callbacks for different URLs interleave.
pub trait InstallProgress: Send + Sync {
    /// Called when a pre-cache fetch starts.
    fn on_fetch_start(&self, _url: &str) {}

    /// Called when a pre-cache fetch returns a usable response.
    fn on_fetch_complete(&self, _url: &str, _bytes: u64) {}

    /// Called when a pre-cache fetch fails.
    fn on_error(&self, _url: &str, _error: &str) {}
}

/// A null progress implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl InstallProgress for NoProgress {}

/// Where an intercepted request's response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// A stored response from a cache partition.
    Cache,
    /// A live network response.
    Network,
}

/// The response to an intercepted request.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// The response, unmodified from its source.
    pub response: Response,
    /// Where it came from.
    pub source: ResponseSource,
}

/// Pre-caches application assets and answers requests cache-first.
pub struct ServiceWorker<S: CacheStorage = DiskCacheStorage, N: Network = ReqwestNetwork> {
    config: WorkerConfig,
    base_url: Url,
    storage: S,
    network: N,
    state: WorkerState,
    counters: FetchCounters,
}

impl<S: CacheStorage, N: Network> ServiceWorker<S, N> {
    /// Creates a worker in the [`WorkerState::Parsed`] state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the configured base URL does not parse.
    pub fn new(config: WorkerConfig, storage: S, network: N) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| Error::InvalidUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            config,
            base_url,
            storage,
            network,
            state: WorkerState::Parsed,
            counters: FetchCounters::new(),
        })
    }

    /// Returns the worker configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Returns the base URL relative resources resolve against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the cache storage.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Returns the network.
    #[must_use]
    pub const fn network(&self) -> &N {
        &self.network
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> WorkerState {
        self.state
    }

    /// Returns the fetch counters.
    #[must_use]
    pub const fn counters(&self) -> &FetchCounters {
        &self.counters
    }

    /// Builds a `GET` request for `text` relative to the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the URL cannot be resolved.
    pub fn request(&self, text: &str) -> Result<Request> {
        Request::resolve(&self.base_url, text)
    }

    fn expect_state(&self, expected: WorkerState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    /// Pre-caches every configured resource into the named partition.
    ///
    /// The batch is all-or-nothing: if any resource cannot be resolved,
    /// fetched, or returns a non-2xx status, nothing is stored and the worker
    /// becomes [`WorkerState::Redundant`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the worker is freshly parsed,
    /// otherwise the first failure encountered.
    pub async fn install(&mut self, progress: &dyn InstallProgress) -> Result<InstallStats> {
        self.expect_state(WorkerState::Parsed)?;
        self.state = WorkerState::Installing;

        let start = Instant::now();
        match self.populate(progress).await {
            Ok(batch) => {
                self.state = WorkerState::Installed;
                Ok(InstallStats {
                    cache_name: self.config.cache_name.clone(),
                    entries: batch.entries,
                    total_bytes: batch.bytes,
                    elapsed: start.elapsed(),
                })
            }
            Err(e) => {
                self.state = WorkerState::Redundant;
                Err(e)
            }
        }
    }

    async fn populate(&self, progress: &dyn InstallProgress) -> Result<crate::cache::BatchStats> {
        let cache = Cache::open(&self.storage, &self.config.cache_name).await?;
        log::info!("Opened cache {}", cache.name());

        let requests = self
            .config
            .precache
            .iter()
            .map(|text| {
                self.request(text).map_err(|e| Error::Install {
                    url: text.clone(),
                    source: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        cache
            .add_all(
                &self.network,
                requests,
                self.config.concurrent_fetches,
                progress,
            )
            .await
    }

    /// Marks a freshly parsed worker as installed when an earlier run already
    /// stored every configured resource in its partition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheNotFound`] if the partition does not exist,
    /// [`Error::InvalidState`] if the worker is not freshly parsed or a
    /// configured resource is missing from the partition.
    pub async fn restore_installed(&mut self) -> Result<()> {
        self.expect_state(WorkerState::Parsed)?;
        let name = &self.config.cache_name;
        if !self.storage.has(name).await? {
            return Err(Error::CacheNotFound(name.clone()));
        }

        let stored = self.storage.entries(name).await?;
        for text in &self.config.precache {
            let key = self.request(text)?.cache_key();
            if !stored.contains(&key) {
                log::warn!("Cache {name} has no entry for {key}");
                return Err(Error::InvalidState {
                    expected: WorkerState::Installed,
                    actual: self.state,
                });
            }
        }
        log::debug!("Restored installed worker from cache {name}");
        self.state = WorkerState::Installed;
        Ok(())
    }

    /// Activates an installed worker, sweeping partitions with other names.
    ///
    /// Returns the names of the deleted partitions. A failed sweep still
    /// leaves the worker activated; the error is returned for reporting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the worker is installed, or a
    /// storage error from the sweep.
    pub async fn activate(&mut self) -> Result<Vec<String>> {
        self.expect_state(WorkerState::Installed)?;
        self.state = WorkerState::Activating;
        let swept = if self.config.cleanup_on_activate {
            self.sweep().await
        } else {
            Ok(Vec::new())
        };
        self.state = WorkerState::Activated;
        swept
    }

    async fn sweep(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for name in self.storage.keys().await? {
            if name == self.config.cache_name {
                continue;
            }
            if self.storage.delete(&name).await? {
                log::info!("Deleted stale cache {name}");
                deleted.push(name);
            }
        }
        Ok(deleted)
    }

    /// Looks up a stored response according to the configured scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be read.
    pub async fn lookup(&self, request: &Request) -> Result<Option<Response>> {
        let key = request.cache_key();
        if !key.is_cacheable() {
            return Ok(None);
        }
        match self.config.match_scope {
            MatchScope::AllCaches => self.storage.match_any(&key).await,
            MatchScope::Named => self.storage.match_in(&self.config.cache_name, &key).await,
        }
    }

    /// Answers an intercepted request: stored response if any, else the network.
    ///
    /// Network responses are returned as received and never written back.
    ///
    /// # Errors
    ///
    /// Returns the storage error, or the network error on a miss.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome> {
        let outcome = self.respond(request).await;
        match &outcome {
            Ok(FetchOutcome {
                response,
                source: ResponseSource::Cache,
            }) => self.counters.record_cache_hit(response.body.len() as u64),
            Ok(_) => self.counters.record_network_hit(),
            Err(_) => self.counters.record_failure(),
        }
        outcome
    }

    async fn respond(&self, request: &Request) -> Result<FetchOutcome> {
        if let Some(response) = self.lookup(request).await? {
            log::debug!("Cache hit for {}", request.url);
            return Ok(FetchOutcome {
                response,
                source: ResponseSource::Cache,
            });
        }

        log::debug!("Cache miss for {}", request.url);
        let response = self.network.fetch(request).await?;
        Ok(FetchOutcome {
            response,
            source: ResponseSource::Network,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use reqwest::Method;
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::cache::tests::MockNetwork;

    const BASE: &str = "https://latexer.example/";

    fn config(precache: &[&str]) -> WorkerConfig {
        WorkerConfig::new()
            .with_base_url(BASE)
            .with_precache(precache.iter().copied())
    }

    fn worker(
        config: WorkerConfig,
        network: MockNetwork,
    ) -> ServiceWorker<MemoryCacheStorage, MockNetwork> {
        ServiceWorker::new(config, MemoryCacheStorage::new(), network).unwrap()
    }

    fn app_network() -> MockNetwork {
        MockNetwork::new()
            .route("https://latexer.example/", 200, "<html>root</html>")
            .route("https://latexer.example/index.html", 200, "<html>index</html>")
    }

    #[tokio::test]
    async fn install_then_serve_root_from_cache() {
        let mut sw = worker(config(&["/", "index.html"]), app_network());

        let stats = sw.install(&NoProgress).await.unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.cache_name, "latexer-cache-v1");
        assert_eq!(sw.state(), WorkerState::Installed);
        assert_eq!(
            sw.storage().entries("latexer-cache-v1").await.unwrap().len(),
            2
        );
        let calls_after_install = sw.network().calls();
        assert_eq!(calls_after_install, 2);

        let outcome = sw.handle_fetch(&sw.request("/").unwrap()).await.unwrap();
        assert_eq!(outcome.source, ResponseSource::Cache);
        assert_eq!(outcome.response.status, 200);
        assert_eq!(outcome.response.body.as_ref(), b"<html>root</html>");
        assert_eq!(sw.network().calls(), calls_after_install);
    }

    #[tokio::test]
    async fn every_precached_url_matches_after_install() {
        let mut sw = worker(config(&["/", "index.html"]), app_network());
        sw.install(&NoProgress).await.unwrap();

        for text in ["/", "index.html"] {
            let hit = sw.lookup(&sw.request(text).unwrap()).await.unwrap();
            let hit = hit.unwrap_or_else(|| panic!("{text} not cached"));
            assert_eq!(hit.status, 200);
            assert!(!hit.body.is_empty());
        }
    }

    #[tokio::test]
    async fn unreachable_resource_fails_whole_install() {
        let mut sw = worker(
            config(&["/", "index.html", "manifest.json"]),
            app_network(),
        );

        let err = sw.install(&NoProgress).await.unwrap_err();
        assert!(matches!(err, Error::Install { ref url, .. } if url.ends_with("manifest.json")));
        assert_eq!(sw.state(), WorkerState::Redundant);
        assert!(
            sw.storage()
                .entries("latexer-cache-v1")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unresolvable_resource_fails_install() {
        let mut sw = worker(config(&["/", "ftp://mirror.example/a.js"]), app_network());
        let err = sw.install(&NoProgress).await.unwrap_err();
        assert!(matches!(err.root(), Error::InvalidUrl { .. }));
        assert_eq!(sw.state(), WorkerState::Redundant);
        assert_eq!(sw.network().calls(), 0);

        // The partition is opened before the list is resolved, and stays empty.
        assert_eq!(sw.storage().keys().await.unwrap(), vec!["latexer-cache-v1"]);
        assert!(
            sw.storage()
                .entries("latexer-cache-v1")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn miss_goes_to_network_without_write_back() {
        let network = app_network().route("https://latexer.example/compile", 200, "pdf");
        let mut sw = worker(config(&["/"]), network);
        sw.install(&NoProgress).await.unwrap();
        let before = sw.storage().entries("latexer-cache-v1").await.unwrap();

        let outcome = sw
            .handle_fetch(&sw.request("/compile").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.source, ResponseSource::Network);
        assert_eq!(outcome.response.body.as_ref(), b"pdf");

        let after = sw.storage().entries("latexer-cache-v1").await.unwrap();
        assert_eq!(before, after);
        assert_eq!(sw.storage().keys().await.unwrap(), vec!["latexer-cache-v1"]);
    }

    #[tokio::test]
    async fn error_status_from_network_is_returned_verbatim() {
        let network = app_network().route("https://latexer.example/missing", 404, "nope");
        let sw = worker(config(&[]), network);
        let outcome = sw
            .handle_fetch(&sw.request("/missing").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome.response.status, 404);
        assert_eq!(outcome.source, ResponseSource::Network);
    }

    #[tokio::test]
    async fn miss_with_network_failure_propagates() {
        let mut sw = worker(config(&["/"]), app_network());
        sw.install(&NoProgress).await.unwrap();

        let result = sw.handle_fetch(&sw.request("/offline.png").unwrap()).await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(sw.counters().snapshot().failures, 1);
    }

    #[tokio::test]
    async fn post_bypasses_cache() {
        let network = app_network();
        let mut sw = worker(config(&["/"]), network);
        sw.install(&NoProgress).await.unwrap();
        let calls = sw.network().calls();

        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/x-tex"));
        let request = Request::new(Method::POST, sw.request("/").unwrap().url)
            .with_headers(headers)
            .with_body("\\documentclass{article}");
        let outcome = sw.handle_fetch(&request).await.unwrap();
        assert_eq!(outcome.source, ResponseSource::Network);
        assert_eq!(sw.network().calls(), calls + 1);

        let sent = sw.network().last_request().unwrap();
        assert_eq!(sent.method, Method::POST);
        assert_eq!(sent.body.as_ref(), b"\\documentclass{article}");
        assert_eq!(sent.headers["content-type"], "application/x-tex");
    }

    #[tokio::test]
    async fn restore_installed_allows_activation_in_a_later_run() {
        let storage = MemoryCacheStorage::new();
        let mut first =
            ServiceWorker::new(config(&["/", "index.html"]), storage.clone(), app_network())
                .unwrap();
        first.install(&NoProgress).await.unwrap();
        storage.open("latexer-cache-v0").await.unwrap();

        let mut second =
            ServiceWorker::new(config(&["/", "index.html"]), storage, MockNetwork::new()).unwrap();
        second.restore_installed().await.unwrap();
        assert_eq!(second.state(), WorkerState::Installed);
        assert_eq!(second.activate().await.unwrap(), vec!["latexer-cache-v0"]);
        assert_eq!(second.state(), WorkerState::Activated);
        assert_eq!(second.network().calls(), 0);
    }

    #[tokio::test]
    async fn restore_installed_needs_a_complete_partition() {
        let mut missing = worker(config(&["/"]), app_network());
        assert!(matches!(
            missing.restore_installed().await,
            Err(Error::CacheNotFound(_))
        ));
        assert_eq!(missing.state(), WorkerState::Parsed);

        let storage = MemoryCacheStorage::new();
        let mut first = ServiceWorker::new(config(&["/"]), storage.clone(), app_network()).unwrap();
        first.install(&NoProgress).await.unwrap();

        let mut partial =
            ServiceWorker::new(config(&["/", "index.html"]), storage, app_network()).unwrap();
        assert!(matches!(
            partial.restore_installed().await,
            Err(Error::InvalidState {
                expected: WorkerState::Installed,
                actual: WorkerState::Parsed
            })
        ));
        assert_eq!(partial.state(), WorkerState::Parsed);
    }

    async fn with_stale_partition(scope: MatchScope) -> ServiceWorker<MemoryCacheStorage, MockNetwork> {
        let network = app_network().route("https://latexer.example/old.js", 200, "fresh");
        let storage = MemoryCacheStorage::new();
        storage.open("latexer-cache-v0").await.unwrap();
        let old = Request::resolve(&Url::parse(BASE).unwrap(), "old.js").unwrap();
        storage
            .put(
                "latexer-cache-v0",
                old.cache_key(),
                Response::new(200, old.url.as_str(), "stale"),
            )
            .await
            .unwrap();

        let config = config(&["/"])
            .with_match_scope(scope)
            .with_cleanup_on_activate(false);
        let mut sw = ServiceWorker::new(config, storage, network).unwrap();
        sw.install(&NoProgress).await.unwrap();
        sw
    }

    #[tokio::test]
    async fn all_caches_scope_finds_other_partitions() {
        let sw = with_stale_partition(MatchScope::AllCaches).await;
        let outcome = sw.handle_fetch(&sw.request("old.js").unwrap()).await.unwrap();
        assert_eq!(outcome.source, ResponseSource::Cache);
        assert_eq!(outcome.response.body.as_ref(), b"stale");
    }

    #[tokio::test]
    async fn named_scope_ignores_other_partitions() {
        let sw = with_stale_partition(MatchScope::Named).await;
        let outcome = sw.handle_fetch(&sw.request("old.js").unwrap()).await.unwrap();
        assert_eq!(outcome.source, ResponseSource::Network);
        assert_eq!(outcome.response.body.as_ref(), b"fresh");
    }

    #[tokio::test]
    async fn activate_sweeps_stale_partitions() {
        let storage = MemoryCacheStorage::new();
        storage.open("latexer-cache-v0").await.unwrap();
        storage.open("scratch").await.unwrap();
        let mut sw = ServiceWorker::new(config(&["/"]), storage, app_network()).unwrap();
        sw.install(&NoProgress).await.unwrap();

        let mut deleted = sw.activate().await.unwrap();
        deleted.sort();
        assert_eq!(deleted, vec!["latexer-cache-v0", "scratch"]);
        assert_eq!(sw.state(), WorkerState::Activated);
        assert_eq!(sw.storage().keys().await.unwrap(), vec!["latexer-cache-v1"]);
    }

    #[tokio::test]
    async fn activate_without_cleanup_keeps_partitions() {
        let mut sw = with_stale_partition(MatchScope::AllCaches).await;
        assert!(sw.activate().await.unwrap().is_empty());
        assert_eq!(sw.storage().keys().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn lifecycle_order_is_enforced() {
        let mut sw = worker(config(&["/"]), app_network());
        let err = sw.activate().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                expected: WorkerState::Installed,
                actual: WorkerState::Parsed
            }
        ));

        sw.install(&NoProgress).await.unwrap();
        assert!(matches!(
            sw.install(&NoProgress).await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn redundant_worker_cannot_activate() {
        let mut sw = worker(config(&["/nowhere"]), app_network());
        assert!(sw.install(&NoProgress).await.is_err());
        assert!(matches!(
            sw.activate().await,
            Err(Error::InvalidState {
                actual: WorkerState::Redundant,
                ..
            })
        ));
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: Mutex<Vec<String>>,
    }

    impl InstallProgress for RecordingProgress {
        fn on_fetch_start(&self, url: &str) {
            self.events.lock().unwrap().push(format!("start {url}"));
        }

        fn on_fetch_complete(&self, url: &str, bytes: u64) {
            self.events.lock().unwrap().push(format!("done {url} {bytes}"));
        }

        fn on_error(&self, url: &str, _error: &str) {
            self.events.lock().unwrap().push(format!("error {url}"));
        }
    }

    #[tokio::test]
    async fn progress_sees_each_fetch() {
        let mut sw = worker(
            config(&["/", "index.html"]).with_concurrent_fetches(1),
            app_network(),
        );
        let progress = RecordingProgress::default();
        sw.install(&progress).await.unwrap();

        let events = progress.events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert!(events.contains(&"done https://latexer.example/ 17".to_string()));
        assert!(events.contains(&"done https://latexer.example/index.html 18".to_string()));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = ServiceWorker::new(
            WorkerConfig::new().with_base_url("not a url"),
            MemoryCacheStorage::new(),
            MockNetwork::new(),
        );
        assert!(matches!(result, Err(Error::InvalidUrl { .. })));
    }

    #[test]
    fn state_display() {
        assert_eq!(WorkerState::Activated.to_string(), "activated");
        assert_eq!(WorkerState::Redundant.to_string(), "redundant");
    }
}
