//! Configuration types for the worker, its storage and the HTTP host.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Cache name used by the deployed LaTeXer worker.
pub const DEFAULT_CACHE_NAME: &str = "latexer-cache-v1";

/// Assets pre-cached by the deployed LaTeXer worker.
pub const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "index.html",
    "manifest.json",
    "sw.js",
    "https://unpkg.com/split.js/dist/split.min.js",
    "https://raw.githubusercontent.com/SulmanOlieko/latexer/master/latexer-sticker-1.png",
];

/// Which partitions the fetch interceptor searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchScope {
    /// Search every partition in the storage, oldest first.
    #[default]
    AllCaches,
    /// Search only the worker's own partition.
    Named,
}

/// Configuration for install, activation and fetch handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the partition populated on install.
    pub cache_name: String,
    /// Resources to pre-cache, relative to `base_url` or absolute.
    pub precache: Vec<String>,
    /// Origin (and path) the application is served from.
    pub base_url: String,
    /// Lookup scope for intercepted requests.
    pub match_scope: MatchScope,
    /// Maximum number of pre-cache fetches in flight.
    pub concurrent_fetches: usize,
    /// Whether activation deletes partitions with other names.
    pub cleanup_on_activate: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            precache: DEFAULT_PRECACHE.iter().map(ToString::to_string).collect(),
            base_url: "http://127.0.0.1:3838/".to_string(),
            match_scope: MatchScope::AllCaches,
            concurrent_fetches: 4,
            cleanup_on_activate: true,
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache partition name.
    #[must_use]
    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }

    /// Replaces the pre-cache list.
    #[must_use]
    pub fn with_precache<I, T>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.precache = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the base URL relative entries are resolved against.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the lookup scope.
    #[must_use]
    pub const fn with_match_scope(mut self, scope: MatchScope) -> Self {
        self.match_scope = scope;
        self
    }

    /// Sets the number of concurrent pre-cache fetches.
    #[must_use]
    pub const fn with_concurrent_fetches(mut self, concurrent: usize) -> Self {
        self.concurrent_fetches = concurrent;
        self
    }

    /// Sets whether activation removes stale partitions.
    #[must_use]
    pub const fn with_cleanup_on_activate(mut self, cleanup: bool) -> Self {
        self.cleanup_on_activate = cleanup;
        self
    }
}

/// Path configuration for the config file and cache storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory holding the on-disk cache storage.
    pub cache_dir: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            cache_dir: data_dir.join("latexer-sw").join("caches"),
        }
    }
}

impl PathConfig {
    /// Default location of the configuration file.
    #[must_use]
    pub fn default_config_file() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("latexer-sw")
            .join("config.toml")
    }
}

/// HTTP host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Worker configuration.
    pub worker: WorkerConfig,
    /// Path configuration.
    pub paths: PathConfig,
    /// HTTP host configuration.
    pub server: ServerConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses configuration from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema.
    pub fn from_toml(text: &str) -> crate::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads configuration from `path`, or defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> crate::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                log::info!("Loaded config from {}", path.display());
                Self::from_toml(&text)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}
